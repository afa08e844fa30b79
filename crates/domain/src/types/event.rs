//! Mirrored calendar events and their provider-side counterparts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::EventSnapshot;
use super::connection::Provider;
use crate::errors::{CalSyncError, Result};

/// The user-visible content of an event. Two sides whose content is equal
/// are considered converged, whatever their timestamps say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContent {
    pub summary: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    /// Attendee addresses, normalized: lowercase, sorted, deduplicated.
    pub attendees: Vec<String>,
}

impl EventContent {
    /// Validated content; fails when the event ends before it starts.
    pub fn new(
        summary: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self> {
        if end_time <= start_time {
            return Err(CalSyncError::InvalidInput(format!(
                "event end {end_time} must be after start {start_time}"
            )));
        }
        Ok(Self {
            summary: summary.into(),
            start_time,
            end_time,
            location: None,
            attendees: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_attendees<I, S>(mut self, attendees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attendees = attendees.into_iter().map(Into::into).collect();
        self.normalized()
    }

    /// Canonical form used for storage and comparison.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.summary = self.summary.trim().to_string();
        self.location = self.location.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        for attendee in &mut self.attendees {
            *attendee = attendee.trim().to_ascii_lowercase();
        }
        self.attendees.retain(|a| !a.is_empty());
        self.attendees.sort();
        self.attendees.dedup();
        self
    }

    /// Content equality after normalization.
    pub fn same_as(&self, other: &Self) -> bool {
        self.clone().normalized() == other.clone().normalized()
    }

    /// Half-open interval overlap: `[start, end)` against `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// Local mirror of a provider event.
///
/// The event has been modified locally since the last consistent checkpoint
/// exactly when `local_version > synced_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub connection_id: String,
    pub provider: Provider,
    pub calendar_id: String,
    /// Unset until the event has been created on the provider.
    pub provider_event_id: Option<String>,
    pub content: EventContent,
    pub remote_last_modified: Option<DateTime<Utc>>,
    pub local_version: i64,
    pub synced_version: i64,
    /// Local delete intent, not yet confirmed by the provider.
    pub pending_delete: bool,
    /// Soft-delete marker. Deleted rows stay for conflict history.
    pub deleted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    /// Mirror row for an event first seen on the provider.
    pub fn from_remote(
        connection_id: impl Into<String>,
        provider: Provider,
        calendar_id: impl Into<String>,
        provider_event_id: impl Into<String>,
        content: EventContent,
        last_modified: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            connection_id: connection_id.into(),
            provider,
            calendar_id: calendar_id.into(),
            provider_event_id: Some(provider_event_id.into()),
            content: content.normalized(),
            remote_last_modified: Some(last_modified),
            local_version: 0,
            synced_version: 0,
            pending_delete: false,
            deleted_at: None,
            updated_at: now,
        }
    }

    /// Mirror row for an event created locally and not yet pushed.
    pub fn new_local(
        connection_id: impl Into<String>,
        provider: Provider,
        calendar_id: impl Into<String>,
        content: EventContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            connection_id: connection_id.into(),
            provider,
            calendar_id: calendar_id.into(),
            provider_event_id: None,
            content: content.normalized(),
            remote_last_modified: None,
            local_version: 1,
            synced_version: 0,
            pending_delete: false,
            deleted_at: None,
            updated_at: now,
        }
    }

    pub const fn is_dirty(&self) -> bool {
        self.local_version > self.synced_version
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Neither soft-deleted nor awaiting a local delete push.
    pub const fn is_live(&self) -> bool {
        self.deleted_at.is_none() && !self.pending_delete
    }

    /// Snapshot of the local side for conflict records.
    pub fn local_snapshot(&self) -> EventSnapshot {
        if self.pending_delete || self.is_deleted() {
            EventSnapshot::deleted(Some(self.updated_at))
        } else {
            EventSnapshot::live(self.content.clone(), Some(self.updated_at))
        }
    }
}

/// An event as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub provider_event_id: String,
    /// Absent for cancelled events whose payload the provider no longer
    /// returns.
    pub content: Option<EventContent>,
    pub last_modified: DateTime<Utc>,
    pub cancelled: bool,
}

impl RemoteEvent {
    pub fn live(
        provider_event_id: impl Into<String>,
        content: EventContent,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_event_id: provider_event_id.into(),
            content: Some(content.normalized()),
            last_modified,
            cancelled: false,
        }
    }

    pub fn cancelled(provider_event_id: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            provider_event_id: provider_event_id.into(),
            content: None,
            last_modified,
            cancelled: true,
        }
    }

    pub const fn is_deleted(&self) -> bool {
        self.cancelled || self.content.is_none()
    }

    pub fn snapshot(&self) -> EventSnapshot {
        match (&self.content, self.is_deleted()) {
            (Some(content), false) => EventSnapshot::live(content.clone(), Some(self.last_modified)),
            _ => EventSnapshot::deleted(Some(self.last_modified)),
        }
    }
}
