//! Shared utilities for Calsync crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: clocks, identifier redaction, retry backoff math
//! - `runtime`: async retry execution, keyed leases
//! - `platform`: SQLCipher connection pooling
//! - `test-utils`: temporary encrypted databases for tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod privacy;
#[cfg(feature = "foundation")]
pub mod resilience;
#[cfg(feature = "foundation")]
pub mod time;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod lease;

// Platform tier
// -------------------------------------------------------------------
#[cfg(feature = "platform")]
pub mod storage;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "test-utils")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use lease::{KeyedLease, LeaseError, LeaseGuard};
#[cfg(feature = "foundation")]
pub use privacy::redact_identifier;
#[cfg(feature = "foundation")]
pub use resilience::{RetryError, RetryStrategy};
#[cfg(feature = "platform")]
pub use storage::{SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig, StorageError};
#[cfg(feature = "foundation")]
pub use time::{Clock, MockClock, SystemClock};
