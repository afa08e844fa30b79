//! Column encoding shared by the repositories.
//!
//! Instants are stored as UTC milliseconds, enums as their snake_case names.

use std::str::FromStr;
use std::sync::Arc;

use calsync_common::{SqlCipherConnection, SqlCipherPool};
use calsync_domain::{CalSyncError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use tokio::task;

use crate::errors::InfraError;

fn checkout(pool: &SqlCipherPool) -> Result<SqlCipherConnection> {
    Ok(pool.get_sqlcipher_connection().map_err(InfraError::from)?)
}

/// Check out a pooled connection and run `work` on the blocking pool.
///
/// Pool waits and SQLite I/O never run on the async worker threads.
pub(crate) async fn blocking<T, F>(pool: &Arc<SqlCipherPool>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut SqlCipherConnection) -> Result<T> + Send + 'static,
{
    let pool = Arc::clone(pool);
    task::spawn_blocking(move || -> Result<T> {
        let mut conn = checkout(&pool)?;
        work(&mut conn)
    })
    .await
    .map_err(map_join_error)?
}

fn map_join_error(err: task::JoinError) -> CalSyncError {
    if err.is_cancelled() {
        CalSyncError::Internal("blocking database task cancelled".into())
    } else {
        CalSyncError::Internal(format!("blocking database task failed: {err}"))
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_millis)
}

pub(crate) fn instant(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

pub(crate) fn opt_instant(idx: usize, millis: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    millis.map(|m| instant(idx, m)).transpose()
}

pub(crate) fn parse_text<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
