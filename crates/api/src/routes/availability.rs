//! Availability queries over a user's checked calendars

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use calsync_domain::{BusyInterval, CalSyncError, SlotAvailability, SlotCheck};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiResult;
use crate::utils::command_helpers::execute_logged;

/// Longest slot a free-slot query may ask for.
const MAX_SLOT_MINUTES: i64 = 24 * 60;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/availability", get(check_slot))
        .route("/users/{user_id}/busy", get(busy_intervals))
        .route("/users/{user_id}/free-slots", post(free_slots))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

async fn check_slot(
    State(ctx): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<SlotCheck>> {
    let Query(range) = query?;
    execute_logged("availability::check_slot", async {
        Ok(Json(ctx.availability.check_slot(&user_id, range.start, range.end).await?))
    })
    .await
}

async fn busy_intervals(
    State(ctx): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<BusyInterval>>> {
    let Query(range) = query?;
    execute_logged("availability::busy", async {
        Ok(Json(ctx.availability.busy_intervals(&user_id, range.start, range.end).await?))
    })
    .await
}

/// Candidate start times are wall-clock `HH:MM` (or `HH:MM:SS`) in the
/// default schedule's timezone.
#[derive(Debug, Deserialize)]
pub struct FreeSlotsRequest {
    pub day: NaiveDate,
    pub candidate_times: Vec<String>,
    pub slot_minutes: i64,
}

async fn free_slots(
    State(ctx): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<FreeSlotsRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<SlotAvailability>>> {
    let Json(request) = body?;
    execute_logged("availability::free_slots", async {
        if request.slot_minutes > MAX_SLOT_MINUTES {
            return Err(CalSyncError::InvalidInput(format!(
                "slot_minutes must be at most {MAX_SLOT_MINUTES}"
            ))
            .into());
        }
        let times = request
            .candidate_times
            .iter()
            .map(|raw| parse_wall_clock(raw))
            .collect::<calsync_domain::Result<Vec<_>>>()?;
        let slots = ctx
            .availability
            .list_free_slots(&user_id, request.day, &times, Duration::minutes(request.slot_minutes))
            .await?;
        Ok(Json(slots))
    })
    .await
}

fn parse_wall_clock(raw: &str) -> calsync_domain::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| CalSyncError::InvalidInput(format!("invalid candidate time '{raw}'")))
}
