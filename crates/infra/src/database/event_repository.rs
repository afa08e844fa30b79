//! SqlCipher-backed implementation of the EventRepository port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::SqlCipherPool;
use calsync_core::EventRepository;
use calsync_domain::{CalSyncError, CalendarEvent, EventContent, Provider, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, instrument};

use super::columns::{blocking, instant, opt_instant, opt_millis, parse_json, parse_text, to_millis};
use crate::errors::InfraError;

const EVENT_COLUMNS: &str = "id, connection_id, provider, calendar_id, provider_event_id, \
     summary, start_time, end_time, location, attendees_json, remote_last_modified, \
     local_version, synced_version, pending_delete, deleted_at, updated_at";

fn map_event(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    let provider: String = row.get(2)?;
    let attendees: String = row.get(9)?;
    Ok(CalendarEvent {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        provider: parse_text::<Provider>(2, &provider)?,
        calendar_id: row.get(3)?,
        provider_event_id: row.get(4)?,
        content: EventContent {
            summary: row.get(5)?,
            start_time: instant(6, row.get(6)?)?,
            end_time: instant(7, row.get(7)?)?,
            location: row.get(8)?,
            attendees: parse_json(9, &attendees)?,
        },
        remote_last_modified: opt_instant(10, row.get(10)?)?,
        local_version: row.get(11)?,
        synced_version: row.get(12)?,
        pending_delete: row.get(13)?,
        deleted_at: opt_instant(14, row.get(14)?)?,
        updated_at: instant(15, row.get(15)?)?,
    })
}

fn query_events(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<CalendarEvent>> {
    let mut stmt = conn.prepare(sql).map_err(InfraError::from)?;
    let rows = stmt
        .query_map(params, map_event)
        .map_err(InfraError::from)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(InfraError::from)?;
    Ok(rows)
}

/// SqlCipher implementation of [`EventRepository`]
pub struct SqlCipherEventRepository {
    pool: Arc<SqlCipherPool>,
}

impl SqlCipherEventRepository {
    /// Create a new event repository over the shared pool.
    pub fn new(pool: Arc<SqlCipherPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for SqlCipherEventRepository {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<CalendarEvent>> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], map_event).optional().map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn find_by_provider_id(
        &self,
        connection_id: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<Option<CalendarEvent>> {
        let key = (connection_id.to_string(), calendar_id.to_string(), provider_event_id.to_string());
        blocking(&self.pool, move |conn| {
            let (connection_id, calendar_id, provider_event_id) = key;
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM calendar_events
                 WHERE connection_id = ?1 AND calendar_id = ?2 AND provider_event_id = ?3"
            );
            Ok(conn
                .query_row(&sql, params![connection_id, calendar_id, provider_event_id], map_event)
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, connection_id = %event.connection_id))]
    async fn insert(&self, event: &CalendarEvent) -> Result<()> {
        let event = event.clone();
        blocking(&self.pool, move |conn| {
            let attendees =
                serde_json::to_string(&event.content.attendees).map_err(InfraError::from)?;
            conn.execute(
                "INSERT INTO calendar_events (id, connection_id, provider, calendar_id,
                     provider_event_id, summary, start_time, end_time, location, attendees_json,
                     remote_last_modified, local_version, synced_version, pending_delete,
                     deleted_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    event.id,
                    event.connection_id,
                    event.provider.as_str(),
                    event.calendar_id,
                    event.provider_event_id,
                    event.content.summary,
                    to_millis(event.content.start_time),
                    to_millis(event.content.end_time),
                    event.content.location,
                    attendees,
                    opt_millis(event.remote_last_modified),
                    event.local_version,
                    event.synced_version,
                    event.pending_delete,
                    opt_millis(event.deleted_at),
                    to_millis(event.updated_at),
                ],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await?;
        debug!("event inserted");
        Ok(())
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, new_version = event.local_version))]
    async fn replace(&self, event: &CalendarEvent, expected_local_version: i64) -> Result<bool> {
        let event = event.clone();
        let replaced = blocking(&self.pool, move |conn| {
            let attendees =
                serde_json::to_string(&event.content.attendees).map_err(InfraError::from)?;
            let changed = conn
                .execute(
                    "UPDATE calendar_events SET
                         provider_event_id = ?3, summary = ?4, start_time = ?5, end_time = ?6,
                         location = ?7, attendees_json = ?8, remote_last_modified = ?9,
                         local_version = ?10, synced_version = ?11, pending_delete = ?12,
                         deleted_at = ?13, updated_at = ?14
                     WHERE id = ?1 AND local_version = ?2",
                    params![
                        event.id,
                        expected_local_version,
                        event.provider_event_id,
                        event.content.summary,
                        to_millis(event.content.start_time),
                        to_millis(event.content.end_time),
                        event.content.location,
                        attendees,
                        opt_millis(event.remote_last_modified),
                        event.local_version,
                        event.synced_version,
                        event.pending_delete,
                        opt_millis(event.deleted_at),
                        to_millis(event.updated_at),
                    ],
                )
                .map_err(InfraError::from)?;
            if changed == 1 {
                return Ok(true);
            }

            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM calendar_events WHERE id = ?1)",
                    params![event.id],
                    |row| row.get(0),
                )
                .map_err(InfraError::from)?;
            if exists {
                Ok(false)
            } else {
                Err(CalSyncError::NotFound(format!("event {}", event.id)))
            }
        })
        .await?;
        if !replaced {
            debug!(expected_local_version, "local version moved, replace rejected");
        }
        Ok(replaced)
    }

    #[instrument(skip(self))]
    async fn mark_pushed(
        &self,
        id: &str,
        pushed_version: i64,
        provider_event_id: &str,
        remote_last_modified: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        let provider_event_id = provider_event_id.to_string();
        blocking(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE calendar_events SET
                         synced_version = MAX(synced_version, ?2),
                         provider_event_id = ?3,
                         remote_last_modified = ?4,
                         updated_at = ?5
                     WHERE id = ?1",
                    params![
                        id,
                        pushed_version,
                        provider_event_id,
                        to_millis(remote_last_modified),
                        to_millis(at)
                    ],
                )
                .map_err(InfraError::from)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("event {id}")));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn finalize_delete(&self, id: &str, pushed_version: i64, at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE calendar_events SET
                         synced_version = MAX(synced_version, ?2),
                         deleted_at = ?3,
                         updated_at = ?3
                     WHERE id = ?1",
                    params![id, pushed_version, to_millis(at)],
                )
                .map_err(InfraError::from)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("event {id}")));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_pending_push(&self, connection_id: &str) -> Result<Vec<CalendarEvent>> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM calendar_events
                 WHERE connection_id = ?1 AND local_version > synced_version AND deleted_at IS NULL
                 ORDER BY updated_at, id"
            );
            query_events(conn, &sql, params![connection_id])
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_overlapping(
        &self,
        connection_id: &str,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let connection_id = connection_id.to_string();
        let calendar_id = calendar_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM calendar_events
                 WHERE connection_id = ?1 AND calendar_id = ?2
                   AND deleted_at IS NULL AND pending_delete = 0
                   AND start_time < ?4 AND end_time > ?3
                 ORDER BY start_time, id"
            );
            query_events(
                conn,
                &sql,
                params![connection_id, calendar_id, to_millis(start), to_millis(end)],
            )
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<CalendarEvent>> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM calendar_events
                 WHERE connection_id = ?1 AND deleted_at IS NULL
                 ORDER BY start_time, id"
            );
            query_events(conn, &sql, params![connection_id])
        })
        .await
    }
}
