//! Conflict review and resolution

use std::collections::BTreeSet;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use calsync_domain::{BulkResolution, Resolution, SyncConflict};
use serde::Deserialize;

use super::{request_pass, AppState};
use crate::error::ApiResult;
use crate::utils::command_helpers::execute_logged;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conflicts", get(list_open))
        .route("/conflicts/resolve", post(resolve_bulk))
        .route("/conflicts/{id}", get(get_conflict))
        .route("/conflicts/{id}/resolve", post(resolve))
}

#[derive(Debug, Deserialize)]
pub struct ConflictFilter {
    #[serde(default)]
    pub connection_id: Option<String>,
}

async fn list_open(
    State(ctx): State<AppState>,
    query: Result<Query<ConflictFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<SyncConflict>>> {
    let Query(filter) = query?;
    execute_logged("conflicts::list", async {
        Ok(Json(ctx.conflicts.list_open(filter.connection_id.as_deref()).await?))
    })
    .await
}

async fn get_conflict(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SyncConflict>> {
    execute_logged("conflicts::get", async { Ok(Json(ctx.conflicts.get(&id).await?)) }).await
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution: Resolution,
}

async fn resolve(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> ApiResult<Json<SyncConflict>> {
    let Json(request) = body?;
    execute_logged("conflicts::resolve", async {
        let conflict = ctx.conflicts.resolve(&id, request.resolution).await?;
        if conflict.resolution == Some(Resolution::UseLocal) {
            request_pass(&ctx, &conflict.connection_id);
        }
        Ok(Json(conflict))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct BulkItem {
    pub conflict_id: String,
    pub resolution: Resolution,
}

#[derive(Debug, Deserialize)]
pub struct BulkResolveRequest {
    pub items: Vec<BulkItem>,
}

/// Each item succeeds or fails on its own.
async fn resolve_bulk(
    State(ctx): State<AppState>,
    body: Result<Json<BulkResolveRequest>, JsonRejection>,
) -> ApiResult<Json<BulkResolution>> {
    let Json(request) = body?;
    execute_logged("conflicts::resolve_bulk", async {
        let local_ids: BTreeSet<String> = request
            .items
            .iter()
            .filter(|item| item.resolution == Resolution::UseLocal)
            .map(|item| item.conflict_id.clone())
            .collect();
        let items =
            request.items.into_iter().map(|item| (item.conflict_id, item.resolution)).collect();
        let outcome = ctx.conflicts.resolve_all(items).await;

        let mut connections = BTreeSet::new();
        for id in outcome.resolved.iter().filter(|id| local_ids.contains(*id)) {
            if let Ok(conflict) = ctx.conflicts.get(id).await {
                connections.insert(conflict.connection_id);
            }
        }
        for connection_id in &connections {
            request_pass(&ctx, connection_id);
        }
        Ok(Json(outcome))
    })
    .await
}
