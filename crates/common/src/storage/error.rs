//! Storage error types

use thiserror::Error;

/// Storage error type
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Database encryption error: {0}")]
    Encryption(String),

    #[error("Wrong encryption key or database not encrypted")]
    WrongKeyOrNotEncrypted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    R2d2(#[from] r2d2::Error),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Pool exhaustion and SQLite lock contention clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::R2d2(_) => true,
            Self::Rusqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Classify an error raised while opening or keying a database.
    pub(crate) fn from_open_failure(message: String) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("file is not a database")
            || lowered.contains("file is encrypted")
            || lowered.contains("notadb")
        {
            Self::WrongKeyOrNotEncrypted
        } else {
            Self::Connection(message)
        }
    }
}
