//! Inbound push notifications
//!
//! Handlers only validate and enqueue; the sync pass runs on the dispatcher.
//! Unknown or stale channels still get a 2xx so providers do not retry them.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use calsync_infra::integrations::calendar::notifications::{
    GOOGLE_CHANNEL_ID_HEADER, GOOGLE_RESOURCE_ID_HEADER, GOOGLE_RESOURCE_STATE_HEADER,
};
use calsync_infra::integrations::calendar::{google_notice, outlook_notices};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiResult;
use crate::utils::command_helpers::execute_logged;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/google", post(google))
        .route("/webhooks/outlook", post(outlook))
}

async fn google(State(ctx): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    execute_logged("webhooks::google", async {
        let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
        let notice = google_notice(
            header(GOOGLE_CHANNEL_ID_HEADER),
            header(GOOGLE_RESOURCE_ID_HEADER),
            header(GOOGLE_RESOURCE_STATE_HEADER),
        )?;
        let Some(notice) = notice else {
            return Ok(StatusCode::OK);
        };
        ctx.notifications.route(&[notice]).await?;
        Ok(StatusCode::ACCEPTED)
    })
    .await
}

#[derive(Debug, Deserialize)]
struct OutlookQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

async fn outlook(
    State(ctx): State<AppState>,
    query: Result<Query<OutlookQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Response> {
    let Query(query) = query?;
    // Graph endpoint validation: echo the token as plain text within 10s.
    if let Some(token) = query.validation_token {
        return Ok((StatusCode::OK, [(CONTENT_TYPE, "text/plain")], token).into_response());
    }

    execute_logged("webhooks::outlook", async {
        let notices = outlook_notices(&body)?;
        ctx.notifications.route(&notices).await?;
        Ok(StatusCode::ACCEPTED.into_response())
    })
    .await
}
