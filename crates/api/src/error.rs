//! HTTP error mapping
//!
//! Every failure leaves the service as `{ "error": label, "message": ... }`
//! where `label` is the stable [`CalSyncError::label`].

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use calsync_domain::CalSyncError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::utils::logging::error_label;

/// JSON body for error responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] CalSyncError),

    /// Request could not be parsed into the operation's input.
    #[error("{0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Domain(err) => status_for(err),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_input",
            Self::Domain(err) => error_label(err),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(message) => message.clone(),
            Self::Domain(err) => err.to_string(),
        }
    }
}

/// Status code for a domain error.
pub fn status_for(err: &CalSyncError) -> StatusCode {
    match err {
        CalSyncError::NotFound(_) => StatusCode::NOT_FOUND,
        CalSyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CalSyncError::Auth(_) => StatusCode::UNAUTHORIZED,
        CalSyncError::Security(_) => StatusCode::FORBIDDEN,
        CalSyncError::ReauthRequired(_) | CalSyncError::LeaseBusy(_) => StatusCode::CONFLICT,
        CalSyncError::TransientProvider(_)
        | CalSyncError::Network(_)
        | CalSyncError::WebhookRenewalFailed(_) => StatusCode::BAD_GATEWAY,
        CalSyncError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CalSyncError::Database(_) | CalSyncError::Config(_) | CalSyncError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let label = self.label();
        let message = self.message();

        if status.is_server_error() {
            error!(error = label, status = status.as_u16(), %message, "request failed");
        } else {
            warn!(error = label, status = status.as_u16(), %message, "request rejected");
        }

        let body = ErrorResponse { error: label.to_string(), message };
        (status, Json(body)).into_response()
    }
}
