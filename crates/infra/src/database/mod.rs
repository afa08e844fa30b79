//! SQLCipher persistence for connections, events, conflicts and webhook
//! subscriptions.

mod columns;
pub mod conflict_repository;
pub mod connection_repository;
pub mod event_repository;
pub mod manager;
pub mod subscription_repository;

pub use conflict_repository::SqlCipherConflictRepository;
pub use connection_repository::{
    SqlCipherCalendarRepository, SqlCipherConnectionRepository, SqlCipherCredentialRepository,
};
pub use event_repository::SqlCipherEventRepository;
pub use manager::DbManager;
pub use subscription_repository::SqlCipherSubscriptionRepository;
