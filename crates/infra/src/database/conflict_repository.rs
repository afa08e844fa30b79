//! SqlCipher-backed implementation of the ConflictRepository port.
//!
//! Snapshots are stored as JSON documents. A partial unique index on
//! `event_id` keeps at most one open conflict per event.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::SqlCipherPool;
use calsync_core::ConflictRepository;
use calsync_domain::{
    CalSyncError, ConflictType, EventSnapshot, Resolution, Result, SyncConflict,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, instrument};

use super::columns::{blocking, instant, opt_instant, opt_millis, parse_json, parse_text, to_millis};
use crate::errors::InfraError;

const CONFLICT_COLUMNS: &str = "id, event_id, connection_id, conflict_type, local_snapshot, \
     remote_snapshot, resolution, detected_at, resolved_at, applied_at";

fn map_conflict(row: &Row<'_>) -> rusqlite::Result<SyncConflict> {
    let conflict_type: String = row.get(3)?;
    let local: String = row.get(4)?;
    let remote: String = row.get(5)?;
    let resolution: Option<String> = row.get(6)?;
    Ok(SyncConflict {
        id: row.get(0)?,
        event_id: row.get(1)?,
        connection_id: row.get(2)?,
        conflict_type: parse_text::<ConflictType>(3, &conflict_type)?,
        local_snapshot: parse_json(4, &local)?,
        remote_snapshot: parse_json(5, &remote)?,
        resolution: resolution.as_deref().map(|r| parse_text::<Resolution>(6, r)).transpose()?,
        detected_at: instant(7, row.get(7)?)?,
        resolved_at: opt_instant(8, row.get(8)?)?,
        applied_at: opt_instant(9, row.get(9)?)?,
    })
}

fn query_conflicts(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<SyncConflict>> {
    let mut stmt = conn.prepare(sql).map_err(InfraError::from)?;
    let rows = stmt
        .query_map(params, map_conflict)
        .map_err(InfraError::from)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(InfraError::from)?;
    Ok(rows)
}

/// SqlCipher implementation of [`ConflictRepository`]
pub struct SqlCipherConflictRepository {
    pool: Arc<SqlCipherPool>,
}

impl SqlCipherConflictRepository {
    /// Create a new conflict repository over the shared pool.
    pub fn new(pool: Arc<SqlCipherPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConflictRepository for SqlCipherConflictRepository {
    #[instrument(skip(self, conflict), fields(conflict_id = %conflict.id, event_id = %conflict.event_id, kind = %conflict.conflict_type))]
    async fn insert(&self, conflict: &SyncConflict) -> Result<()> {
        let conflict = conflict.clone();
        blocking(&self.pool, move |conn| {
            let local = serde_json::to_string(&conflict.local_snapshot).map_err(InfraError::from)?;
            let remote =
                serde_json::to_string(&conflict.remote_snapshot).map_err(InfraError::from)?;
            conn.execute(
                "INSERT INTO sync_conflicts (id, event_id, connection_id, conflict_type,
                     local_snapshot, remote_snapshot, resolution, detected_at, resolved_at, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    conflict.id,
                    conflict.event_id,
                    conflict.connection_id,
                    conflict.conflict_type.as_str(),
                    local,
                    remote,
                    conflict.resolution.map(|r| r.as_str()),
                    to_millis(conflict.detected_at),
                    opt_millis(conflict.resolved_at),
                    opt_millis(conflict.applied_at),
                ],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await?;
        debug!("conflict recorded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<SyncConflict>> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], map_conflict).optional().map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn find_open_for_event(&self, event_id: &str) -> Result<Option<SyncConflict>> {
        let event_id = event_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                 WHERE event_id = ?1 AND resolution IS NULL"
            );
            Ok(conn
                .query_row(&sql, params![event_id], map_conflict)
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_open(&self, connection_id: Option<&str>) -> Result<Vec<SyncConflict>> {
        let connection_id = connection_id.map(str::to_string);
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                 WHERE resolution IS NULL AND (?1 IS NULL OR connection_id = ?1)
                 ORDER BY detected_at, id"
            );
            query_conflicts(conn, &sql, params![connection_id])
        })
        .await
    }

    #[instrument(skip(self))]
    async fn count_open(&self, connection_id: &str) -> Result<u32> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            let count: u32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sync_conflicts
                     WHERE connection_id = ?1 AND resolution IS NULL",
                    params![connection_id],
                    |row| row.get(0),
                )
                .map_err(InfraError::from)?;
            Ok(count)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_awaiting_apply(&self, event_id: &str) -> Result<Vec<SyncConflict>> {
        let event_id = event_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                 WHERE event_id = ?1 AND resolution IS NOT NULL AND applied_at IS NULL
                 ORDER BY resolved_at, id"
            );
            query_conflicts(conn, &sql, params![event_id])
        })
        .await
    }

    #[instrument(skip(self))]
    async fn save_resolution(
        &self,
        id: &str,
        resolution: Resolution,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_conflicts SET resolution = ?2, resolved_at = ?3
                     WHERE id = ?1 AND resolution IS NULL",
                    params![id, resolution.as_str(), to_millis(at)],
                )
                .map_err(InfraError::from)?;
            if changed == 1 {
                return Ok(true);
            }

            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sync_conflicts WHERE id = ?1)",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(InfraError::from)?;
            if exists {
                Ok(false)
            } else {
                Err(CalSyncError::NotFound(format!("conflict {id}")))
            }
        })
        .await
    }

    #[instrument(skip(self))]
    async fn mark_applied(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_conflicts SET applied_at = ?2 WHERE id = ?1",
                    params![id, to_millis(at)],
                )
                .map_err(InfraError::from)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("conflict {id}")));
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, snapshot))]
    async fn update_remote_snapshot(&self, id: &str, snapshot: &EventSnapshot) -> Result<()> {
        let id = id.to_string();
        let remote = serde_json::to_string(snapshot).map_err(InfraError::from)?;
        blocking(&self.pool, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sync_conflicts SET remote_snapshot = ?2 WHERE id = ?1",
                    params![id, remote],
                )
                .map_err(InfraError::from)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("conflict {id}")));
            }
            Ok(())
        })
        .await
    }
}
