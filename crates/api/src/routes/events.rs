//! Local event edits
//!
//! Edits land in the mirror first and are pushed by the next pass for the
//! connection, which is requested right away.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post, put};
use axum::{Json, Router};
use calsync_domain::{CalendarEvent, EventContent};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{request_pass, AppState};
use crate::error::ApiResult;
use crate::utils::command_helpers::execute_logged;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connections/{id}/events", post(create))
        .route("/events/{event_id}", put(update).delete(delete))
        .route("/events/{event_id}/time", patch(reschedule))
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    /// Defaults to the connection's primary calendar.
    #[serde(default)]
    pub calendar_id: Option<String>,
    pub summary: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

impl EventRequest {
    fn content(&self) -> calsync_domain::Result<EventContent> {
        let mut content = EventContent::new(self.summary.clone(), self.start_time, self.end_time)?
            .with_attendees(self.attendees.iter().cloned());
        if let Some(location) = &self.location {
            content = content.with_location(location.clone());
        }
        Ok(content)
    }
}

async fn create(
    State(ctx): State<AppState>,
    Path(connection_id): Path<String>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CalendarEvent>)> {
    let Json(request) = body?;
    execute_logged("events::create", async {
        let event = ctx
            .editor
            .create(&connection_id, request.calendar_id.as_deref(), request.content()?)
            .await?;
        request_pass(&ctx, &event.connection_id);
        Ok((StatusCode::CREATED, Json(event)))
    })
    .await
}

async fn update(
    State(ctx): State<AppState>,
    Path(event_id): Path<String>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult<Json<CalendarEvent>> {
    let Json(request) = body?;
    execute_logged("events::update", async {
        let event = ctx.editor.update(&event_id, request.content()?).await?;
        request_pass(&ctx, &event.connection_id);
        Ok(Json(event))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

async fn reschedule(
    State(ctx): State<AppState>,
    Path(event_id): Path<String>,
    body: Result<Json<RescheduleRequest>, JsonRejection>,
) -> ApiResult<Json<CalendarEvent>> {
    let Json(request) = body?;
    execute_logged("events::reschedule", async {
        let event = ctx.editor.reschedule(&event_id, request.start_time, request.end_time).await?;
        request_pass(&ctx, &event.connection_id);
        Ok(Json(event))
    })
    .await
}

async fn delete(
    State(ctx): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<CalendarEvent>> {
    execute_logged("events::delete", async {
        let event = ctx.editor.delete(&event_id).await?;
        request_pass(&ctx, &event.connection_id);
        Ok(Json(event))
    })
    .await
}
