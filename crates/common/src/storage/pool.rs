//! SQLCipher connection pool

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::{Duration, Instant};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};

use super::error::{StorageError, StorageResult};

const CIPHER_COMPATIBILITY: i32 = 4;

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCipherPoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub busy_timeout: Duration,
    pub enable_wal: bool,
}

impl Default for SqlCipherPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            enable_wal: true,
        }
    }
}

/// Pooled encrypted connection. Returned to the pool on drop.
pub struct SqlCipherConnection {
    inner: PooledConnection<SqliteConnectionManager>,
}

impl Deref for SqlCipherConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.inner
    }
}

impl DerefMut for SqlCipherConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.inner
    }
}

/// SQLCipher connection pool
///
/// Every connection is keyed, switched to WAL and given foreign key
/// enforcement before it is handed out.
#[derive(Debug)]
pub struct SqlCipherPool {
    pool: Pool<SqliteConnectionManager>,
    config: SqlCipherPoolConfig,
}

impl SqlCipherPool {
    /// Open (or create) the database at `path` and verify the key.
    #[instrument(skip(encryption_key), fields(db_path = ?path, pool_size = config.max_size))]
    pub fn new(
        path: &Path,
        encryption_key: String,
        config: SqlCipherPoolConfig,
    ) -> StorageResult<Self> {
        if encryption_key.is_empty() {
            return Err(StorageError::InvalidConfig("encryption key must not be empty".into()));
        }
        if config.max_size == 0 {
            return Err(StorageError::InvalidConfig("pool size must be at least 1".into()));
        }

        let init_config = config.clone();
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| configure_connection(conn, &encryption_key, &init_config));

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| {
                warn!(error = %e, "Failed to create connection pool");
                StorageError::from_open_failure(e.to_string())
            })?;

        {
            let conn = pool.get().map_err(|e| StorageError::from_open_failure(e.to_string()))?;
            verify_key(&conn)?;
        }

        info!("SQLCipher pool created with {} connections", config.max_size);
        Ok(Self { pool, config })
    }

    /// Check out a connection.
    #[instrument(skip(self), fields(pool_size = self.config.max_size))]
    pub fn get_sqlcipher_connection(&self) -> StorageResult<SqlCipherConnection> {
        let start = Instant::now();
        let inner = self.pool.get().map_err(|e| {
            warn!(error = %e, "Failed to acquire pooled connection");
            StorageError::Connection(format!("failed to acquire connection: {e}"))
        })?;
        debug!(elapsed_ms = start.elapsed().as_millis(), "Connection acquired");
        Ok(SqlCipherConnection { inner })
    }

    /// Round-trip a trivial query through a pooled connection.
    pub fn health_check(&self) -> StorageResult<()> {
        let conn = self.get_sqlcipher_connection()?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        if one == 1 {
            Ok(())
        } else {
            Err(StorageError::Query(format!("health check returned {one}")))
        }
    }

    pub const fn config(&self) -> &SqlCipherPoolConfig {
        &self.config
    }
}

fn configure_connection(
    conn: &mut Connection,
    key: &str,
    config: &SqlCipherPoolConfig,
) -> rusqlite::Result<()> {
    // The key pragma must run before anything touches the file.
    conn.pragma_update(None, "key", key)?;
    conn.pragma_update(None, "cipher_compatibility", CIPHER_COMPATIBILITY)?;

    let mut pragmas = String::new();
    if config.enable_wal {
        pragmas.push_str("PRAGMA journal_mode=WAL;\nPRAGMA wal_autocheckpoint=1000;\n");
    }
    pragmas.push_str("PRAGMA synchronous=NORMAL;\nPRAGMA foreign_keys=ON;\n");
    conn.execute_batch(&pragmas)?;
    conn.busy_timeout(config.busy_timeout)
}

fn verify_key(conn: &Connection) -> StorageResult<()> {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .map(|_| ())
        .map_err(|e| StorageError::from_open_failure(e.to_string()))
}
