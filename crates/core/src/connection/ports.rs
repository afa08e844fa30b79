//! Connection persistence ports

use async_trait::async_trait;
use calsync_domain::{CalendarConnection, Credential, Result, SyncedCalendar};
use chrono::{DateTime, Utc};

/// Persistence for provider connections
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<CalendarConnection>>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CalendarConnection>>;

    /// Connections with `is_active = true`, sync-enabled or not.
    async fn list_active(&self) -> Result<Vec<CalendarConnection>>;

    async fn insert(&self, connection: &CalendarConnection) -> Result<()>;

    async fn set_sync_enabled(&self, id: &str, enabled: bool, at: DateTime<Utc>) -> Result<()>;

    /// Mark the connection primary for its (user, provider) pair, clearing the
    /// flag on its siblings in the same write.
    async fn set_primary(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Quarantine or disconnect. The row is kept.
    async fn deactivate(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<()>;

    async fn reactivate(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn update_last_sync(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Persistence for per-calendar settings
#[async_trait]
pub trait CalendarRepository: Send + Sync {
    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<SyncedCalendar>>;

    async fn get(&self, connection_id: &str, calendar_id: &str) -> Result<Option<SyncedCalendar>>;

    async fn upsert(&self, calendar: &SyncedCalendar) -> Result<()>;
}

/// Persistence for credentials, one per connection
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get(&self, connection_id: &str) -> Result<Option<Credential>>;

    /// Insert or atomically replace the connection's credential.
    async fn save(&self, credential: &Credential) -> Result<()>;

    async fn delete(&self, connection_id: &str) -> Result<()>;
}
