//! Event mirror and conflict persistence ports

use async_trait::async_trait;
use calsync_domain::{CalendarEvent, EventSnapshot, Resolution, Result, SyncConflict};
use chrono::{DateTime, Utc};

/// Persistence for the local event mirror
///
/// Writers that read-modify-write a row use [`EventRepository::replace`],
/// which only succeeds while `local_version` still has the value they read.
/// A failed replace means a local edit landed in between.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<CalendarEvent>>;

    async fn find_by_provider_id(
        &self,
        connection_id: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<Option<CalendarEvent>>;

    async fn insert(&self, event: &CalendarEvent) -> Result<()>;

    /// Compare-and-swap on `local_version`. Returns `false` when the stored
    /// version no longer equals `expected_local_version`.
    async fn replace(&self, event: &CalendarEvent, expected_local_version: i64) -> Result<bool>;

    /// Record a successful upsert push of `pushed_version`.
    ///
    /// `synced_version` never moves backwards, so edits made while the push
    /// was in flight stay pending.
    async fn mark_pushed(
        &self,
        id: &str,
        pushed_version: i64,
        provider_event_id: &str,
        remote_last_modified: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a successful delete push: soft-delete the row.
    async fn finalize_delete(&self, id: &str, pushed_version: i64, at: DateTime<Utc>)
        -> Result<()>;

    /// Rows with `local_version > synced_version` that are not soft-deleted.
    async fn list_pending_push(&self, connection_id: &str) -> Result<Vec<CalendarEvent>>;

    /// Live rows in one calendar overlapping `[start, end)`.
    async fn list_overlapping(
        &self,
        connection_id: &str,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    /// Live rows of a connection, ordered by start time.
    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<CalendarEvent>>;
}

/// Persistence for sync conflicts
#[async_trait]
pub trait ConflictRepository: Send + Sync {
    /// Insert a new open conflict. Implementations reject a second open
    /// conflict for the same event.
    async fn insert(&self, conflict: &SyncConflict) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<SyncConflict>>;

    async fn find_open_for_event(&self, event_id: &str) -> Result<Option<SyncConflict>>;

    /// Open conflicts, oldest first, optionally limited to one connection.
    async fn list_open(&self, connection_id: Option<&str>) -> Result<Vec<SyncConflict>>;

    async fn count_open(&self, connection_id: &str) -> Result<u32>;

    /// Resolved conflicts for `event_id` whose chosen side has not reached
    /// the provider yet.
    async fn list_awaiting_apply(&self, event_id: &str) -> Result<Vec<SyncConflict>>;

    /// Record a resolution. Returns `false` if the conflict was no longer
    /// open.
    async fn save_resolution(
        &self,
        id: &str,
        resolution: Resolution,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn mark_applied(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Keep an open conflict's remote side current when the provider changes
    /// the event again.
    async fn update_remote_snapshot(&self, id: &str, snapshot: &EventSnapshot) -> Result<()>;
}
