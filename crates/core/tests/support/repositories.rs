//! In-memory implementations of the core persistence ports

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use calsync_core::{
    CalendarRepository, ConflictRepository, ConnectionRepository, CredentialRepository,
    EventRepository, SubscriptionRepository,
};
use calsync_domain::{
    CalSyncError, CalendarConnection, CalendarEvent, Credential, EventSnapshot, Resolution,
    Result as DomainResult, SyncConflict, SyncedCalendar, WebhookSubscription,
};
use chrono::{DateTime, Utc};

#[derive(Default)]
pub struct MockConnectionRepository {
    rows: Mutex<HashMap<String, CalendarConnection>>,
}

impl MockConnectionRepository {
    pub fn snapshot(&self, id: &str) -> Option<CalendarConnection> {
        self.rows.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl ConnectionRepository for MockConnectionRepository {
    async fn get(&self, id: &str) -> DomainResult<Option<CalendarConnection>> {
        Ok(self.snapshot(id))
    }

    async fn list_by_user(&self, user_id: &str) -> DomainResult<Vec<CalendarConnection>> {
        let mut rows: Vec<_> =
            self.rows.lock().unwrap().values().filter(|c| c.user_id == user_id).cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_active(&self) -> DomainResult<Vec<CalendarConnection>> {
        let mut rows: Vec<_> =
            self.rows.lock().unwrap().values().filter(|c| c.is_active).cloned().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn insert(&self, connection: &CalendarConnection) -> DomainResult<()> {
        self.rows.lock().unwrap().insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn set_sync_enabled(&self, id: &str, enabled: bool, at: DateTime<Utc>) -> DomainResult<()> {
        self.update(id, |c| {
            c.sync_enabled = enabled;
            c.updated_at = at;
        })
    }

    async fn set_primary(&self, id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let target = rows.get(id).cloned().ok_or_else(|| CalSyncError::NotFound(id.to_string()))?;
        for row in rows.values_mut() {
            if row.user_id == target.user_id && row.provider == target.provider {
                row.is_primary = row.id == id;
                row.updated_at = at;
            }
        }
        Ok(())
    }

    async fn deactivate(&self, id: &str, reason: &str, at: DateTime<Utc>) -> DomainResult<()> {
        self.update(id, |c| {
            c.is_active = false;
            c.is_primary = false;
            c.deactivated_reason = Some(reason.to_string());
            c.updated_at = at;
        })
    }

    async fn reactivate(&self, id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        self.update(id, |c| {
            c.is_active = true;
            c.deactivated_reason = None;
            c.updated_at = at;
        })
    }

    async fn update_last_sync(&self, id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        self.update(id, |c| c.last_sync_at = Some(at))
    }
}

impl MockConnectionRepository {
    fn update(&self, id: &str, apply: impl FnOnce(&mut CalendarConnection)) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(id).ok_or_else(|| CalSyncError::NotFound(id.to_string()))?;
        apply(row);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockCalendarRepository {
    rows: Mutex<Vec<SyncedCalendar>>,
}

#[async_trait]
impl CalendarRepository for MockCalendarRepository {
    async fn list_for_connection(&self, connection_id: &str) -> DomainResult<Vec<SyncedCalendar>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.connection_id == connection_id)
            .cloned()
            .collect())
    }

    async fn get(&self, connection_id: &str, calendar_id: &str) -> DomainResult<Option<SyncedCalendar>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.connection_id == connection_id && c.calendar_id == calendar_id)
            .cloned())
    }

    async fn upsert(&self, calendar: &SyncedCalendar) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|c| c.connection_id == calendar.connection_id && c.calendar_id == calendar.calendar_id)
        {
            Some(row) => *row = calendar.clone(),
            None => rows.push(calendar.clone()),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockCredentialRepository {
    rows: Mutex<HashMap<String, Credential>>,
}

impl MockCredentialRepository {
    pub fn snapshot(&self, connection_id: &str) -> Option<Credential> {
        self.rows.lock().unwrap().get(connection_id).cloned()
    }

    pub fn put(&self, credential: Credential) {
        self.rows.lock().unwrap().insert(credential.connection_id.clone(), credential);
    }
}

#[async_trait]
impl CredentialRepository for MockCredentialRepository {
    async fn get(&self, connection_id: &str) -> DomainResult<Option<Credential>> {
        Ok(self.snapshot(connection_id))
    }

    async fn save(&self, credential: &Credential) -> DomainResult<()> {
        self.put(credential.clone());
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> DomainResult<()> {
        self.rows.lock().unwrap().remove(connection_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEventRepository {
    rows: Mutex<HashMap<String, CalendarEvent>>,
}

impl MockEventRepository {
    pub fn snapshot(&self, id: &str) -> Option<CalendarEvent> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn by_provider_id(&self, provider_event_id: &str) -> Option<CalendarEvent> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .find(|e| e.provider_event_id.as_deref() == Some(provider_event_id))
            .cloned()
    }

    pub fn all(&self) -> Vec<CalendarEvent> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Simulate an application edit landing outside the engine.
    pub fn edit_in_place(&self, id: &str, apply: impl FnOnce(&mut CalendarEvent)) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(id) {
            apply(row);
            row.local_version += 1;
        }
    }
}

#[async_trait]
impl EventRepository for MockEventRepository {
    async fn get(&self, id: &str) -> DomainResult<Option<CalendarEvent>> {
        Ok(self.snapshot(id))
    }

    async fn find_by_provider_id(
        &self,
        connection_id: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> DomainResult<Option<CalendarEvent>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|e| {
                e.connection_id == connection_id
                    && e.calendar_id == calendar_id
                    && e.provider_event_id.as_deref() == Some(provider_event_id)
            })
            .cloned())
    }

    async fn insert(&self, event: &CalendarEvent) -> DomainResult<()> {
        self.rows.lock().unwrap().insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn replace(&self, event: &CalendarEvent, expected_local_version: i64) -> DomainResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&event.id) {
            Some(row) if row.local_version == expected_local_version => {
                *row = event.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CalSyncError::NotFound(event.id.clone())),
        }
    }

    async fn mark_pushed(
        &self,
        id: &str,
        pushed_version: i64,
        provider_event_id: &str,
        remote_last_modified: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(id).ok_or_else(|| CalSyncError::NotFound(id.to_string()))?;
        row.synced_version = row.synced_version.max(pushed_version);
        row.provider_event_id = Some(provider_event_id.to_string());
        row.remote_last_modified = Some(remote_last_modified);
        row.updated_at = at;
        Ok(())
    }

    async fn finalize_delete(&self, id: &str, pushed_version: i64, at: DateTime<Utc>) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(id).ok_or_else(|| CalSyncError::NotFound(id.to_string()))?;
        row.synced_version = row.synced_version.max(pushed_version);
        row.deleted_at = Some(at);
        row.updated_at = at;
        Ok(())
    }

    async fn list_pending_push(&self, connection_id: &str) -> DomainResult<Vec<CalendarEvent>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.connection_id == connection_id && e.is_dirty() && e.deleted_at.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_overlapping(
        &self,
        connection_id: &str,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DomainResult<Vec<CalendarEvent>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| {
                e.connection_id == connection_id
                    && e.calendar_id == calendar_id
                    && e.is_live()
                    && e.content.overlaps(start, end)
            })
            .cloned()
            .collect())
    }

    async fn list_for_connection(&self, connection_id: &str) -> DomainResult<Vec<CalendarEvent>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.connection_id == connection_id && e.deleted_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.content.start_time);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MockConflictRepository {
    rows: Mutex<Vec<SyncConflict>>,
}

impl MockConflictRepository {
    pub fn all(&self) -> Vec<SyncConflict> {
        self.rows.lock().unwrap().clone()
    }

    pub fn snapshot(&self, id: &str) -> Option<SyncConflict> {
        self.rows.lock().unwrap().iter().find(|c| c.id == id).cloned()
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut SyncConflict)) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.iter_mut().find(|c| c.id == id).ok_or_else(|| CalSyncError::NotFound(id.to_string()))?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl ConflictRepository for MockConflictRepository {
    async fn insert(&self, conflict: &SyncConflict) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|c| c.event_id == conflict.event_id && c.is_open()) {
            return Err(CalSyncError::Database(format!(
                "event {} already has an open conflict",
                conflict.event_id
            )));
        }
        rows.push(conflict.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<SyncConflict>> {
        Ok(self.snapshot(id))
    }

    async fn find_open_for_event(&self, event_id: &str) -> DomainResult<Option<SyncConflict>> {
        Ok(self.rows.lock().unwrap().iter().find(|c| c.event_id == event_id && c.is_open()).cloned())
    }

    async fn list_open(&self, connection_id: Option<&str>) -> DomainResult<Vec<SyncConflict>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_open() && connection_id.map_or(true, |id| c.connection_id == id))
            .cloned()
            .collect())
    }

    async fn count_open(&self, connection_id: &str) -> DomainResult<u32> {
        let count = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_open() && c.connection_id == connection_id)
            .count();
        Ok(u32::try_from(count).unwrap())
    }

    async fn list_awaiting_apply(&self, event_id: &str) -> DomainResult<Vec<SyncConflict>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.event_id == event_id && c.awaiting_apply())
            .cloned()
            .collect())
    }

    async fn save_resolution(&self, id: &str, resolution: Resolution, at: DateTime<Utc>) -> DomainResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|c| c.id == id) {
            Some(row) if row.is_open() => {
                row.resolution = Some(resolution);
                row.resolved_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CalSyncError::NotFound(id.to_string())),
        }
    }

    async fn mark_applied(&self, id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        self.update(id, |c| c.applied_at = Some(at))
    }

    async fn update_remote_snapshot(&self, id: &str, snapshot: &EventSnapshot) -> DomainResult<()> {
        self.update(id, |c| c.remote_snapshot = snapshot.clone())
    }
}

#[derive(Default)]
pub struct MockSubscriptionRepository {
    rows: Mutex<HashMap<String, WebhookSubscription>>,
}

impl MockSubscriptionRepository {
    pub fn snapshot(&self, connection_id: &str) -> Option<WebhookSubscription> {
        self.rows.lock().unwrap().get(connection_id).cloned()
    }

    pub fn put(&self, subscription: WebhookSubscription) {
        self.rows.lock().unwrap().insert(subscription.connection_id.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionRepository for MockSubscriptionRepository {
    async fn get_for_connection(&self, connection_id: &str) -> DomainResult<Option<WebhookSubscription>> {
        Ok(self.snapshot(connection_id))
    }

    async fn find_by_channel(&self, channel_id: &str) -> DomainResult<Option<WebhookSubscription>> {
        Ok(self.rows.lock().unwrap().values().find(|s| s.channel_id == channel_id).cloned())
    }

    async fn list_all(&self) -> DomainResult<Vec<WebhookSubscription>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn save(&self, subscription: &WebhookSubscription) -> DomainResult<()> {
        self.put(subscription.clone());
        Ok(())
    }

    async fn delete_for_connection(&self, connection_id: &str) -> DomainResult<()> {
        self.rows.lock().unwrap().remove(connection_id);
        Ok(())
    }
}
