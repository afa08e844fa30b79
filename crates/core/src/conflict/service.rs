//! Explicit conflict resolution

use std::sync::Arc;

use calsync_common::{Clock, SystemClock};
use calsync_domain::{
    BulkResolution, CalSyncError, CalendarEvent, ConflictType, FailedItem, Resolution, Result,
    SyncConflict,
};
use tracing::{info, instrument, warn};

use crate::sync::ports::{ConflictRepository, EventRepository};

const MAX_APPLY_ATTEMPTS: u32 = 5;

/// Applies a chosen side to a conflicted event.
///
/// `use_remote` is final once the mirror is written. `use_local` leaves the
/// event dirty; the conflict counts as applied after the next successful
/// push of that event.
pub struct ConflictResolver {
    events: Arc<dyn EventRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    clock: Arc<dyn Clock>,
}

impl ConflictResolver {
    /// Create a resolver over the event and conflict stores.
    pub fn new(events: Arc<dyn EventRepository>, conflicts: Arc<dyn ConflictRepository>) -> Self {
        Self { events, conflicts, clock: Arc::new(SystemClock) }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn list_open(&self, connection_id: Option<&str>) -> Result<Vec<SyncConflict>> {
        self.conflicts.list_open(connection_id).await
    }

    pub async fn get(&self, conflict_id: &str) -> Result<SyncConflict> {
        self.conflicts
            .get(conflict_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("conflict {conflict_id}")))
    }

    /// Resolve one conflict.
    ///
    /// Repeating the resolution a conflict already carries is a no-op;
    /// choosing the other side afterwards is rejected.
    #[instrument(skip(self))]
    pub async fn resolve(&self, conflict_id: &str, resolution: Resolution) -> Result<SyncConflict> {
        let conflict = self.get(conflict_id).await?;
        if let Some(existing) = conflict.resolution {
            return if existing == resolution {
                Ok(conflict)
            } else {
                Err(CalSyncError::InvalidInput(format!(
                    "conflict {conflict_id} is already resolved with {existing}"
                )))
            };
        }

        self.apply_to_event(&conflict, resolution).await?;

        let now = self.clock.now();
        if !self.conflicts.save_resolution(conflict_id, resolution, now).await? {
            // Lost a race with another resolver; report whatever won.
            let current = self.get(conflict_id).await?;
            return match current.resolution {
                Some(existing) if existing == resolution => Ok(current),
                _ => Err(CalSyncError::InvalidInput(format!(
                    "conflict {conflict_id} was resolved concurrently"
                ))),
            };
        }
        if resolution == Resolution::UseRemote {
            self.conflicts.mark_applied(conflict_id, now).await?;
        }

        info!(
            conflict_id,
            event_id = %conflict.event_id,
            conflict_type = %conflict.conflict_type,
            resolution = %resolution,
            "Conflict resolved"
        );
        self.get(conflict_id).await
    }

    /// Resolve several conflicts independently.
    ///
    /// Not transactional: each success stays applied even when others fail.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn resolve_all(&self, items: Vec<(String, Resolution)>) -> BulkResolution {
        let mut outcome = BulkResolution::default();
        for (conflict_id, resolution) in items {
            match self.resolve(&conflict_id, resolution).await {
                Ok(_) => outcome.resolved.push(conflict_id),
                Err(err) => {
                    warn!(conflict_id = %conflict_id, error = %err, "Bulk resolution item failed");
                    outcome.failed.push(FailedItem::new(conflict_id, err));
                }
            }
        }
        outcome
    }

    async fn apply_to_event(&self, conflict: &SyncConflict, resolution: Resolution) -> Result<()> {
        for _ in 0..MAX_APPLY_ATTEMPTS {
            let current = self
                .events
                .get(&conflict.event_id)
                .await?
                .ok_or_else(|| CalSyncError::NotFound(format!("event {}", conflict.event_id)))?;
            let updated = match resolution {
                Resolution::UseLocal => self.keep_local(&current, conflict),
                Resolution::UseRemote => self.take_remote(&current, conflict),
            };
            if self.events.replace(&updated, current.local_version).await? {
                return Ok(());
            }
        }
        Err(CalSyncError::Internal(format!(
            "event {} kept changing while resolving conflict {}",
            conflict.event_id, conflict.id
        )))
    }

    /// Keep the local side and queue it for push over the remote state the
    /// conflict captured.
    fn keep_local(&self, current: &CalendarEvent, conflict: &SyncConflict) -> CalendarEvent {
        let mut event = current.clone();
        event.remote_last_modified = conflict.remote_snapshot.last_modified;
        if conflict.conflict_type == ConflictType::DeleteUpdate {
            // The provider copy is gone; the next push recreates it.
            event.provider_event_id = None;
        }
        event.local_version = current.local_version + 1;
        event.updated_at = self.clock.now();
        event
    }

    /// Overwrite the mirror with the remote side; nothing is left to push.
    fn take_remote(&self, current: &CalendarEvent, conflict: &SyncConflict) -> CalendarEvent {
        let now = self.clock.now();
        let mut event = current.clone();
        let remote = &conflict.remote_snapshot;
        match (&remote.content, remote.deleted) {
            (Some(content), false) => {
                event.content = content.clone();
                event.deleted_at = None;
            }
            _ => {
                event.deleted_at = Some(event.deleted_at.unwrap_or(now));
            }
        }
        event.pending_delete = false;
        event.remote_last_modified = remote.last_modified;
        event.synced_version = current.local_version;
        event.updated_at = now;
        event
    }
}
