//! Conversions from external infrastructure errors into domain errors.

use calsync_common::StorageError;
use calsync_domain::CalSyncError;
use keyring::Error as KeyringError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CalSyncError);

impl From<InfraError> for CalSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CalSyncError> for InfraError {
    fn from(value: CalSyncError) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for InfraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InfraError {}

trait IntoCalSyncError {
    fn into_calsync(self) -> CalSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for SqlError {
    fn into_calsync(self) -> CalSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        fn looks_like_wrong_key(message: &str) -> bool {
            let lower = message.to_ascii_lowercase();
            lower.contains("not a database") || lower.contains("encrypted")
        }

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => CalSyncError::Database("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        CalSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        CalSyncError::Database(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        CalSyncError::Database("foreign key constraint violation".into())
                    }
                    (_, _) if looks_like_wrong_key(&message) => CalSyncError::Security(
                        "SQLCipher key rejected or database not encrypted".into(),
                    ),
                    _ => CalSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => CalSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CalSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                CalSyncError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidQuery => CalSyncError::Database("invalid SQL query".into()),
            other => CalSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        Self(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* StorageError → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for StorageError {
    fn into_calsync(self) -> CalSyncError {
        match self {
            StorageError::WrongKeyOrNotEncrypted | StorageError::Encryption(_) => {
                CalSyncError::Security(self.to_string())
            }
            StorageError::InvalidConfig(msg) => CalSyncError::Config(msg),
            StorageError::Rusqlite(err) => err.into_calsync(),
            other => CalSyncError::Database(other.to_string()),
        }
    }
}

impl From<StorageError> for InfraError {
    fn from(value: StorageError) -> Self {
        Self(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* keyring::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for KeyringError {
    fn into_calsync(self) -> CalSyncError {
        match self {
            KeyringError::NoEntry => CalSyncError::NotFound("keychain entry not found".into()),
            KeyringError::BadEncoding(_) => {
                CalSyncError::Security("credential in keychain is not valid UTF-8".into())
            }
            KeyringError::PlatformFailure(err) => {
                CalSyncError::Security(format!("keychain platform error: {err}"))
            }
            KeyringError::NoStorageAccess(err) => {
                CalSyncError::Security(format!("unable to access secure storage: {err}"))
            }
            other => CalSyncError::Security(other.to_string()),
        }
    }
}

impl From<KeyringError> for InfraError {
    fn from(value: KeyringError) -> Self {
        Self(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for HttpError {
    fn into_calsync(self) -> CalSyncError {
        if self.is_timeout() {
            return CalSyncError::TransientProvider("HTTP request timed out".into());
        }

        if self.is_connect() {
            return CalSyncError::TransientProvider("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => CalSyncError::Auth(message),
                404 | 410 => CalSyncError::NotFound(message),
                429 | 500..=599 => CalSyncError::TransientProvider(message),
                400..=499 => CalSyncError::InvalidInput(message),
                _ => CalSyncError::Network(message),
            };
        }

        if self.is_decode() {
            return CalSyncError::InvalidInput(format!("unexpected response body: {self}"));
        }

        CalSyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        Self(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        Self(CalSyncError::Internal(format!("JSON (de)serialization failed: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
