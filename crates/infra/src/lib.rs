//! # Calsync Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - SQLCipher repositories for connections, credentials, events, conflicts
//!   and webhook subscriptions
//! - Provider adapters (Google Calendar, Outlook, CalDAV) over a retrying
//!   HTTP client, plus the OAuth token exchange
//! - Configuration loading and database key management
//! - Cron sweeps and the webhook sync dispatcher
//!
//! ## Architecture
//! - Implements traits defined in `calsync-core`
//! - Contains all "impure" code (I/O, network, keychain)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod key_manager;
pub mod scheduling;

// Re-export commonly used items
pub use database::{
    DbManager, SqlCipherCalendarRepository, SqlCipherConflictRepository,
    SqlCipherConnectionRepository, SqlCipherCredentialRepository, SqlCipherEventRepository,
    SqlCipherSubscriptionRepository,
};
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder};
pub use integrations::calendar::{build_registry, NotificationRouter};
pub use key_manager::KeyManager;
pub use scheduling::{BackgroundTasks, SyncDispatcher};
