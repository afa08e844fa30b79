//! Database connection manager backed by the shared SQLCipher pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use calsync_common::{SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig};
use calsync_domain::{CalSyncError, DatabaseConfig, Result};
use rusqlite::params;
use tracing::info;

use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Database manager that wraps an [`SqlCipherPool`].
pub struct DbManager {
    pool: Arc<SqlCipherPool>,
    path: PathBuf,
}

impl DbManager {
    /// Create a new manager with the given pool size and SQLCipher key.
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        pool_size: u32,
        encryption_key: Option<&str>,
    ) -> Result<Self> {
        let key = encryption_key
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| CalSyncError::Security("database encryption key not provided".into()))?;

        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalSyncError::Database(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let config =
            SqlCipherPoolConfig { max_size: pool_size.max(1), ..SqlCipherPoolConfig::default() };
        let pool = SqlCipherPool::new(&path, key, config).map_err(InfraError::from)?;

        info!(db_path = %path.display(), max_connections = pool_size.max(1), "sqlcipher pool initialised");

        Ok(Self { pool: Arc::new(pool), path })
    }

    /// Open the database described by `config` with the resolved key.
    pub fn from_config(config: &DatabaseConfig, encryption_key: &str) -> Result<Self> {
        Self::new(&config.path, config.pool_size, Some(encryption_key))
    }

    /// Wrap an existing pool, e.g. one created by test helpers.
    pub fn from_pool(pool: Arc<SqlCipherPool>, path: impl Into<PathBuf>) -> Self {
        Self { pool, path: path.into() }
    }

    /// Borrow the underlying SQLCipher pool.
    pub fn pool(&self) -> &Arc<SqlCipherPool> {
        &self.pool
    }

    /// Acquire a SQLCipher connection from the pool.
    pub fn get_connection(&self) -> Result<SqlCipherConnection> {
        Ok(self.pool.get_sqlcipher_connection().map_err(InfraError::from)?)
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(InfraError::from)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, CAST(strftime('%s','now') AS INTEGER) * 1000)",
            params![SCHEMA_VERSION],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the database is reachable and the key is accepted.
    pub fn health_check(&self) -> Result<()> {
        Ok(self.pool.health_check().map_err(InfraError::from)?)
    }
}
