//! Provider HTTP status classification
//!
//! Maps provider responses onto the sync error taxonomy. Token endpoint
//! failures are classified separately because a rejected refresh token means
//! the user has to reauthorize, while a 401 on a data call only means the
//! access token in hand is stale.

use calsync_domain::{CalSyncError, Result};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::warn;

const BODY_SNIPPET_LEN: usize = 200;

/// Pass successful responses through, classify the rest.
pub(crate) async fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body, context))
}

/// Like [`ensure_success`] for deletes: an already-gone resource counts as
/// deleted.
pub(crate) async fn ensure_deleted(response: Response, context: &str) -> Result<()> {
    if is_gone(response.status()) {
        return Ok(());
    }
    ensure_success(response, context).await.map(|_| ())
}

pub(crate) fn is_gone(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

/// Classify a failed data call.
pub(crate) fn classify_status(status: StatusCode, body: &str, context: &str) -> CalSyncError {
    let message = format!("{context}: HTTP {} {}", status.as_u16(), snippet(body));
    match status.as_u16() {
        401 | 403 => CalSyncError::Auth(message),
        404 | 410 => CalSyncError::NotFound(message),
        408 | 429 | 500..=599 => CalSyncError::TransientProvider(message),
        400..=499 => CalSyncError::InvalidInput(message),
        _ => CalSyncError::Network(message),
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Classify a failed refresh-token exchange.
///
/// `invalid_grant` (revoked or expired consent) and 401 mean the refresh
/// token is dead. Rate limits and server errors stay transient so the next
/// sweep can try again without quarantining the connection.
pub(crate) fn classify_refresh_failure(status: StatusCode, body: &str) -> CalSyncError {
    let parsed: Option<TokenErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.error.as_deref()).unwrap_or("");
    let description =
        parsed.as_ref().and_then(|b| b.error_description.as_deref()).unwrap_or_else(|| snippet(body));

    match status.as_u16() {
        408 | 429 | 500..=599 => CalSyncError::TransientProvider(format!(
            "token endpoint unavailable: HTTP {}",
            status.as_u16()
        )),
        401 => CalSyncError::ReauthRequired(format!("token endpoint rejected client or token: {description}")),
        400 if code == "invalid_grant" => {
            CalSyncError::ReauthRequired(format!("refresh token rejected: {description}"))
        }
        _ => {
            warn!(status = status.as_u16(), error = code, "unexpected token endpoint failure");
            CalSyncError::Auth(format!(
                "token refresh failed: HTTP {} {code} {description}",
                status.as_u16()
            ))
        }
    }
}

fn snippet(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}
