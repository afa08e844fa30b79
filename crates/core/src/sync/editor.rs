//! Local edits to the event mirror
//!
//! Every edit bumps `local_version`, which queues the event for the next
//! push. Edits never take the sync lease; they race a running pass through
//! the repository's version check instead.

use std::sync::Arc;

use calsync_common::{Clock, SystemClock};
use calsync_domain::constants::PRIMARY_CALENDAR_ID;
use calsync_domain::{CalSyncError, CalendarEvent, EventContent, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::ports::EventRepository;
use crate::connection::ports::ConnectionRepository;

const MAX_EDIT_ATTEMPTS: u32 = 5;

/// Application-side writer for the event mirror
pub struct LocalEventEditor {
    connections: Arc<dyn ConnectionRepository>,
    events: Arc<dyn EventRepository>,
    clock: Arc<dyn Clock>,
}

impl LocalEventEditor {
    /// Create an editor over the connection and event stores.
    pub fn new(connections: Arc<dyn ConnectionRepository>, events: Arc<dyn EventRepository>) -> Self {
        Self { connections, events, clock: Arc::new(SystemClock) }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create an event that exists only locally until the next push.
    #[instrument(skip(self, content))]
    pub async fn create(
        &self,
        connection_id: &str,
        calendar_id: Option<&str>,
        content: EventContent,
    ) -> Result<CalendarEvent> {
        let connection = self
            .connections
            .get(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;
        let event = CalendarEvent::new_local(
            &connection.id,
            connection.provider,
            calendar_id.unwrap_or(PRIMARY_CALENDAR_ID),
            content,
            self.clock.now(),
        );
        self.events.insert(&event).await?;
        debug!(event_id = %event.id, "Local event created");
        Ok(event)
    }

    /// Replace an event's content.
    #[instrument(skip(self, content))]
    pub async fn update(&self, event_id: &str, content: EventContent) -> Result<CalendarEvent> {
        let content = content.normalized();
        self.edit(event_id, |event| {
            event.content = content.clone();
            Ok(())
        })
        .await
    }

    /// Move an event, keeping everything else.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        event_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<CalendarEvent> {
        if end_time <= start_time {
            return Err(CalSyncError::InvalidInput("end_time must be after start_time".into()));
        }
        self.edit(event_id, |event| {
            event.content.start_time = start_time;
            event.content.end_time = end_time;
            Ok(())
        })
        .await
    }

    /// Mark an event for deletion. The row is soft-deleted once the provider
    /// confirms.
    #[instrument(skip(self))]
    pub async fn delete(&self, event_id: &str) -> Result<CalendarEvent> {
        self.edit(event_id, |event| {
            event.pending_delete = true;
            Ok(())
        })
        .await
    }

    async fn edit<F>(&self, event_id: &str, mut apply: F) -> Result<CalendarEvent>
    where
        F: FnMut(&mut CalendarEvent) -> Result<()> + Send,
    {
        for _ in 0..MAX_EDIT_ATTEMPTS {
            let current = self
                .events
                .get(event_id)
                .await?
                .ok_or_else(|| CalSyncError::NotFound(format!("event {event_id}")))?;
            if current.is_deleted() || current.pending_delete {
                return Err(CalSyncError::InvalidInput(format!("event {event_id} is deleted")));
            }

            let mut updated = current.clone();
            apply(&mut updated)?;
            updated.local_version = current.local_version + 1;
            updated.updated_at = self.clock.now();
            if self.events.replace(&updated, current.local_version).await? {
                return Ok(updated);
            }
            debug!(event_id, "Concurrent write to event; retrying edit");
        }
        Err(CalSyncError::Internal(format!(
            "event {event_id} kept changing; edit abandoned after {MAX_EDIT_ATTEMPTS} attempts"
        )))
    }
}
