use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use super::AppState;
use crate::utils::health::HealthStatus;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// 200 when healthy, 503 otherwise; the body is the same either way.
async fn health(State(ctx): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = ctx.health().await;
    let code = if status.is_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}
