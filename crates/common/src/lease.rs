//! Keyed exclusive leases
//!
//! A [`KeyedLease`] hands out at most one [`LeaseGuard`] per key at a time.
//! Different keys never contend. The sync engine keys leases by connection id
//! so two passes for the same connection cannot interleave.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lease acquisition failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("lease for '{key}' not acquired within {waited:?}")]
    Timeout { key: String, waited: Duration },

    #[error("lease for '{key}' is held")]
    Busy { key: String },
}

/// Held lease. Released on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Per-key mutual exclusion
#[derive(Debug, Default)]
pub struct KeyedLease {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLease {
    /// Create an empty lease table.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        // The map shard lock is released before any await on the slot.
        Arc::clone(self.slots.entry(key.to_string()).or_default().value())
    }

    /// Wait up to `timeout` for the lease on `key`.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<LeaseGuard, LeaseError> {
        let slot = self.slot(key);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(LeaseGuard { key: key.to_string(), _guard: guard }),
            Err(_) => Err(LeaseError::Timeout { key: key.to_string(), waited: timeout }),
        }
    }

    /// Take the lease only if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Result<LeaseGuard, LeaseError> {
        self.slot(key)
            .try_lock_owned()
            .map(|guard| LeaseGuard { key: key.to_string(), _guard: guard })
            .map_err(|_| LeaseError::Busy { key: key.to_string() })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.try_lock().is_err())
    }
}
