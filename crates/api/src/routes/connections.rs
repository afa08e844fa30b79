//! Operator surface for connections and their calendars

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use calsync_core::NewConnection;
use calsync_domain::{
    CalSyncError, CalendarConnection, ConnectionHealth, RefreshOutcome, SyncSummary,
    SyncTrigger, SyncedCalendar, TokenGrant, WebhookSubscription,
};
use serde::{Deserialize, Serialize};

use super::{parse_provider, request_pass, AppState};
use crate::error::ApiResult;
use crate::utils::command_helpers::execute_logged;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/connections", get(list_for_user))
        .route("/connections", post(connect_with_password))
        .route("/connections/{id}", get(get_connection).delete(disconnect))
        .route("/connections/{id}/sync-enabled", put(set_sync_enabled))
        .route("/connections/{id}/primary", post(set_primary))
        .route("/connections/{id}/health", get(health))
        .route("/connections/{id}/calendars", get(list_calendars).post(add_calendar))
        .route("/connections/{id}/calendars/{calendar_id}", patch(update_calendar))
        .route("/connections/{id}/sync", post(manual_sync))
        .route("/connections/{id}/refresh", post(manual_refresh))
        .route("/connections/{id}/webhook", post(subscribe).delete(unsubscribe))
}

async fn list_for_user(
    State(ctx): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<CalendarConnection>>> {
    execute_logged("connections::list", async {
        Ok(Json(ctx.connections.list_for_user(&user_id).await?))
    })
    .await
}

/// Link an Apple or CalDAV account with an app-specific password. OAuth
/// providers go through `/oauth/{provider}/authorize` instead.
#[derive(Debug, Deserialize)]
pub struct PasswordConnectRequest {
    pub user_id: String,
    pub provider: String,
    pub username: String,
    pub app_password: String,
    #[serde(default)]
    pub calendar_name: Option<String>,
}

async fn connect_with_password(
    State(ctx): State<AppState>,
    body: Result<Json<PasswordConnectRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CalendarConnection>)> {
    let Json(request) = body?;
    execute_logged("connections::connect_password", async {
        let provider = parse_provider(&request.provider)?;
        if provider.uses_oauth() {
            return Err(CalSyncError::InvalidInput(format!(
                "{provider} accounts are linked through /oauth/{provider}/authorize"
            ))
            .into());
        }
        if request.app_password.is_empty() {
            return Err(CalSyncError::InvalidInput("app_password is required".into()).into());
        }
        let connection = ctx
            .connections
            .connect(
                NewConnection {
                    user_id: request.user_id,
                    provider,
                    provider_account_id: request.username,
                    primary_calendar_name: request.calendar_name,
                },
                TokenGrant {
                    access_token: request.app_password,
                    refresh_token: None,
                    expires_in: None,
                    scope: None,
                },
            )
            .await?;
        request_pass(&ctx, &connection.id);
        Ok((StatusCode::CREATED, Json(connection)))
    })
    .await
}

async fn get_connection(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CalendarConnection>> {
    execute_logged("connections::get", async { Ok(Json(ctx.connections.get(&id).await?)) }).await
}

async fn disconnect(State(ctx): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    execute_logged("connections::disconnect", async {
        ctx.connections.disconnect(&id).await?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

async fn set_sync_enabled(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> ApiResult<Json<CalendarConnection>> {
    let Json(request) = body?;
    execute_logged("connections::set_sync_enabled", async {
        Ok(Json(ctx.connections.set_sync_enabled(&id, request.enabled).await?))
    })
    .await
}

async fn set_primary(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CalendarConnection>> {
    execute_logged("connections::set_primary", async {
        Ok(Json(ctx.connections.set_primary(&id).await?))
    })
    .await
}

async fn health(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConnectionHealth>> {
    execute_logged("connections::health", async { Ok(Json(ctx.connections.health(&id).await?)) })
        .await
}

async fn list_calendars(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<SyncedCalendar>>> {
    execute_logged("calendars::list", async {
        Ok(Json(ctx.connections.list_calendars(&id).await?))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct AddCalendarRequest {
    pub calendar_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

async fn add_calendar(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AddCalendarRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncedCalendar>)> {
    let Json(request) = body?;
    execute_logged("calendars::add", async {
        let calendar = ctx.connections.add_calendar(&id, &request.calendar_id, request.name).await?;
        Ok((StatusCode::CREATED, Json(calendar)))
    })
    .await
}

/// Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct CalendarSettingsRequest {
    #[serde(default)]
    pub sync_enabled: Option<bool>,
    #[serde(default)]
    pub check_availability: Option<bool>,
}

async fn update_calendar(
    State(ctx): State<AppState>,
    Path((id, calendar_id)): Path<(String, String)>,
    body: Result<Json<CalendarSettingsRequest>, JsonRejection>,
) -> ApiResult<Json<SyncedCalendar>> {
    let Json(request) = body?;
    execute_logged("calendars::update", async {
        let calendar = ctx
            .connections
            .update_calendar(&id, &calendar_id, request.sync_enabled, request.check_availability)
            .await?;
        Ok(Json(calendar))
    })
    .await
}

async fn manual_sync(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SyncSummary>> {
    execute_logged("connections::sync", async {
        Ok(Json(ctx.engine.sync_connection(&id, SyncTrigger::Manual).await?))
    })
    .await
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub outcome: RefreshOutcome,
}

async fn manual_refresh(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RefreshResponse>> {
    execute_logged("connections::refresh", async {
        let outcome = ctx.tokens.manual_refresh(&id).await?;
        Ok(Json(RefreshResponse { outcome }))
    })
    .await
}

async fn subscribe(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookSubscription>> {
    execute_logged("webhooks::subscribe", async { Ok(Json(ctx.webhooks.subscribe(&id).await?)) })
        .await
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub removed: bool,
}

async fn unsubscribe(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UnsubscribeResponse>> {
    execute_logged("webhooks::unsubscribe", async {
        let removed = ctx.webhooks.unsubscribe(&id).await?;
        Ok(Json(UnsubscribeResponse { removed }))
    })
    .await
}
