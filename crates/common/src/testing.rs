//! Test helpers shared by downstream crates
//!
//! Enabled with the `test-utils` feature.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::storage::{SqlCipherPool, SqlCipherPoolConfig, StorageResult};

/// Fixed SQLCipher key for tests.
pub const TEST_DB_KEY: &str = "test_key_64_chars_long_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Encrypted database in a temporary directory, removed on drop.
pub struct TempSqlCipherDb {
    pub pool: Arc<SqlCipherPool>,
    path: PathBuf,
    _dir: TempDir,
}

impl TempSqlCipherDb {
    /// Open a pool over a fresh database in a temp dir.
    pub fn new() -> StorageResult<Self> {
        let dir = TempDir::new().map_err(|e| {
            crate::storage::StorageError::Connection(format!("failed to create temp dir: {e}"))
        })?;
        let path = dir.path().join("calsync-test.db");
        let config = SqlCipherPoolConfig { max_size: 4, ..SqlCipherPoolConfig::default() };
        let pool = Arc::new(SqlCipherPool::new(&path, TEST_DB_KEY.to_string(), config)?);
        Ok(Self { pool, path, _dir: dir })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
