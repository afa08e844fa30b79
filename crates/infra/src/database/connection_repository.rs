//! SqlCipher-backed connection, calendar and credential repositories.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::SqlCipherPool;
use calsync_core::{CalendarRepository, ConnectionRepository, CredentialRepository};
use calsync_domain::{
    CalSyncError, CalendarConnection, Credential, Provider, Result, SyncedCalendar,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, instrument};

use super::columns::{blocking, instant, opt_instant, opt_millis, parse_text, to_millis};
use crate::errors::InfraError;

const CONNECTION_COLUMNS: &str = "id, user_id, provider, provider_account_id, is_primary, \
     is_active, sync_enabled, last_sync_at, deactivated_reason, created_at, updated_at";

fn map_connection(row: &Row<'_>) -> rusqlite::Result<CalendarConnection> {
    let provider: String = row.get(2)?;
    Ok(CalendarConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: parse_text::<Provider>(2, &provider)?,
        provider_account_id: row.get(3)?,
        is_primary: row.get(4)?,
        is_active: row.get(5)?,
        sync_enabled: row.get(6)?,
        last_sync_at: opt_instant(7, row.get(7)?)?,
        deactivated_reason: row.get(8)?,
        created_at: instant(9, row.get(9)?)?,
        updated_at: instant(10, row.get(10)?)?,
    })
}

fn not_found(id: &str) -> CalSyncError {
    CalSyncError::NotFound(format!("connection {id}"))
}

fn query_connections(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<CalendarConnection>> {
    let mut stmt = conn.prepare(sql).map_err(InfraError::from)?;
    let rows = stmt
        .query_map(params, map_connection)
        .map_err(InfraError::from)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(InfraError::from)?;
    Ok(rows)
}

/// SqlCipher implementation of [`ConnectionRepository`]
pub struct SqlCipherConnectionRepository {
    pool: Arc<SqlCipherPool>,
}

impl SqlCipherConnectionRepository {
    /// Create a new connection repository over the shared pool.
    pub fn new(pool: Arc<SqlCipherPool>) -> Self {
        Self { pool }
    }

    /// Run a single-row update; zero rows touched means the id is unknown.
    async fn update_one<F>(&self, id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<usize> + Send + 'static,
    {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let changed = update(conn).map_err(InfraError::from)?;
            if changed == 0 {
                return Err(not_found(&id));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ConnectionRepository for SqlCipherConnectionRepository {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<CalendarConnection>> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let sql =
                format!("SELECT {CONNECTION_COLUMNS} FROM calendar_connections WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![id], map_connection)
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CalendarConnection>> {
        let user_id = user_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {CONNECTION_COLUMNS} FROM calendar_connections
                 WHERE user_id = ?1 ORDER BY created_at, id"
            );
            query_connections(conn, &sql, params![user_id])
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_active(&self) -> Result<Vec<CalendarConnection>> {
        blocking(&self.pool, |conn| {
            let sql = format!(
                "SELECT {CONNECTION_COLUMNS} FROM calendar_connections WHERE is_active = 1 ORDER BY id"
            );
            query_connections(conn, &sql, params![])
        })
        .await
    }

    #[instrument(skip(self, connection), fields(connection_id = %connection.id, provider = %connection.provider))]
    async fn insert(&self, connection: &CalendarConnection) -> Result<()> {
        let connection = connection.clone();
        blocking(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO calendar_connections (id, user_id, provider, provider_account_id,
                     is_primary, is_active, sync_enabled, last_sync_at, deactivated_reason,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    connection.id,
                    connection.user_id,
                    connection.provider.as_str(),
                    connection.provider_account_id,
                    connection.is_primary,
                    connection.is_active,
                    connection.sync_enabled,
                    opt_millis(connection.last_sync_at),
                    connection.deactivated_reason,
                    to_millis(connection.created_at),
                    to_millis(connection.updated_at),
                ],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await?;
        debug!("connection inserted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_sync_enabled(&self, id: &str, enabled: bool, at: DateTime<Utc>) -> Result<()> {
        let key = id.to_string();
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE calendar_connections SET sync_enabled = ?2, updated_at = ?3 WHERE id = ?1",
                params![key, enabled, to_millis(at)],
            )
        })
        .await
    }

    #[instrument(skip(self))]
    async fn set_primary(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        blocking(&self.pool, move |conn| {
            let tx = conn.transaction().map_err(InfraError::from)?;

            let owner: Option<(String, String)> = tx
                .query_row(
                    "SELECT user_id, provider FROM calendar_connections WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(InfraError::from)?;
            let (user_id, provider) = owner.ok_or_else(|| not_found(&id))?;

            // Clear first: the partial unique index allows one primary at a time.
            tx.execute(
                "UPDATE calendar_connections SET is_primary = 0, updated_at = ?3
                 WHERE user_id = ?1 AND provider = ?2 AND is_primary = 1",
                params![user_id, provider, to_millis(at)],
            )
            .map_err(InfraError::from)?;
            tx.execute(
                "UPDATE calendar_connections SET is_primary = 1, updated_at = ?2 WHERE id = ?1",
                params![id, to_millis(at)],
            )
            .map_err(InfraError::from)?;

            tx.commit().map_err(InfraError::from)?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
        let key = id.to_string();
        let reason = reason.to_string();
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE calendar_connections
                 SET is_active = 0, is_primary = 0, deactivated_reason = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![key, reason, to_millis(at)],
            )
        })
        .await
    }

    #[instrument(skip(self))]
    async fn reactivate(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let key = id.to_string();
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE calendar_connections
                 SET is_active = 1, deactivated_reason = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![key, to_millis(at)],
            )
        })
        .await
    }

    #[instrument(skip(self))]
    async fn update_last_sync(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let key = id.to_string();
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE calendar_connections SET last_sync_at = ?2 WHERE id = ?1",
                params![key, to_millis(at)],
            )
        })
        .await
    }
}

/// SqlCipher implementation of [`CalendarRepository`]
pub struct SqlCipherCalendarRepository {
    pool: Arc<SqlCipherPool>,
}

impl SqlCipherCalendarRepository {
    /// Create a new calendar repository over the shared pool.
    pub fn new(pool: Arc<SqlCipherPool>) -> Self {
        Self { pool }
    }
}

fn map_calendar(row: &Row<'_>) -> rusqlite::Result<SyncedCalendar> {
    Ok(SyncedCalendar {
        connection_id: row.get(0)?,
        calendar_id: row.get(1)?,
        name: row.get(2)?,
        sync_enabled: row.get(3)?,
        check_availability: row.get(4)?,
    })
}

#[async_trait]
impl CalendarRepository for SqlCipherCalendarRepository {
    #[instrument(skip(self))]
    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<SyncedCalendar>> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT connection_id, calendar_id, name, sync_enabled, check_availability
                     FROM connection_calendars WHERE connection_id = ?1 ORDER BY calendar_id",
                )
                .map_err(InfraError::from)?;
            let rows = stmt
                .query_map(params![connection_id], map_calendar)
                .map_err(InfraError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(InfraError::from)?;
            Ok(rows)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get(&self, connection_id: &str, calendar_id: &str) -> Result<Option<SyncedCalendar>> {
        let key = (connection_id.to_string(), calendar_id.to_string());
        blocking(&self.pool, move |conn| {
            let (connection_id, calendar_id) = key;
            Ok(conn
                .query_row(
                    "SELECT connection_id, calendar_id, name, sync_enabled, check_availability
                     FROM connection_calendars WHERE connection_id = ?1 AND calendar_id = ?2",
                    params![connection_id, calendar_id],
                    map_calendar,
                )
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self, calendar), fields(connection_id = %calendar.connection_id, calendar_id = %calendar.calendar_id))]
    async fn upsert(&self, calendar: &SyncedCalendar) -> Result<()> {
        let calendar = calendar.clone();
        blocking(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO connection_calendars
                     (connection_id, calendar_id, name, sync_enabled, check_availability)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(connection_id, calendar_id) DO UPDATE SET
                     name = excluded.name,
                     sync_enabled = excluded.sync_enabled,
                     check_availability = excluded.check_availability",
                params![
                    calendar.connection_id,
                    calendar.calendar_id,
                    calendar.name,
                    calendar.sync_enabled,
                    calendar.check_availability,
                ],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
    }
}

/// SqlCipher implementation of [`CredentialRepository`]
///
/// Tokens live inside the encrypted database; nothing here logs them.
pub struct SqlCipherCredentialRepository {
    pool: Arc<SqlCipherPool>,
}

impl SqlCipherCredentialRepository {
    /// Create a new credential repository over the shared pool.
    pub fn new(pool: Arc<SqlCipherPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for SqlCipherCredentialRepository {
    #[instrument(skip(self))]
    async fn get(&self, connection_id: &str) -> Result<Option<Credential>> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            Ok(conn
                .query_row(
                    "SELECT connection_id, access_token, refresh_token, expires_at, scope,
                            last_refreshed_at, refresh_count
                     FROM credentials WHERE connection_id = ?1",
                    params![connection_id],
                    |row| {
                        Ok(Credential {
                            connection_id: row.get(0)?,
                            access_token: row.get(1)?,
                            refresh_token: row.get(2)?,
                            expires_at: opt_instant(3, row.get(3)?)?,
                            scope: row.get(4)?,
                            last_refreshed_at: opt_instant(5, row.get(5)?)?,
                            refresh_count: row.get(6)?,
                        })
                    },
                )
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self, credential), fields(connection_id = %credential.connection_id))]
    async fn save(&self, credential: &Credential) -> Result<()> {
        let credential = credential.clone();
        blocking(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO credentials (connection_id, access_token, refresh_token, expires_at,
                     scope, last_refreshed_at, refresh_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(connection_id) DO UPDATE SET
                     access_token = excluded.access_token,
                     refresh_token = excluded.refresh_token,
                     expires_at = excluded.expires_at,
                     scope = excluded.scope,
                     last_refreshed_at = excluded.last_refreshed_at,
                     refresh_count = excluded.refresh_count",
                params![
                    credential.connection_id,
                    credential.access_token,
                    credential.refresh_token,
                    opt_millis(credential.expires_at),
                    credential.scope,
                    opt_millis(credential.last_refreshed_at),
                    credential.refresh_count,
                ],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, connection_id: &str) -> Result<()> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            conn.execute("DELETE FROM credentials WHERE connection_id = ?1", params![connection_id])
                .map_err(InfraError::from)?;
            Ok(())
        })
        .await
    }
}
