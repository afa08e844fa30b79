//! Error types used throughout the service

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Calsync
///
/// The last five variants form the sync error taxonomy. Conflicts and partial
/// push failures are *outcomes* reported through
/// [`SyncSummary`](crate::SyncSummary), never errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CalSyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// The provider rejected the refresh token. The connection is quarantined
    /// until the user re-authorizes.
    #[error("Reauthorization required: {0}")]
    ReauthRequired(String),

    /// Network failure, 5xx, or rate limiting. Safe to retry with backoff.
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Webhook renewal failed: {0}")]
    WebhookRenewalFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Another sync pass holds the connection lease.
    #[error("Connection busy: {0}")]
    LeaseBusy(String),
}

impl CalSyncError {
    /// Whether a retry with backoff may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProvider(_) | Self::Network(_) | Self::Timeout(_))
    }

    /// Whether the user must re-authorize before anything else can succeed.
    pub const fn requires_reauth(&self) -> bool {
        matches!(self, Self::ReauthRequired(_))
    }

    /// Stable machine-readable label, used in logs and API error bodies.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::Security(_) => "security",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
            Self::ReauthRequired(_) => "reauth_required",
            Self::TransientProvider(_) => "transient_provider_error",
            Self::WebhookRenewalFailed(_) => "webhook_renewal_failed",
            Self::Timeout(_) => "timeout",
            Self::LeaseBusy(_) => "lease_busy",
        }
    }
}

/// Result type alias for Calsync operations
pub type Result<T> = std::result::Result<T, CalSyncError>;
