//! HTTP routes
//!
//! Each area exposes `router()`; [`router`] merges them over the shared
//! [`AppContext`].

pub mod availability;
pub mod conflicts;
pub mod connections;
pub mod events;
pub mod health;
pub mod oauth;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;
use calsync_domain::Provider;

use crate::context::AppContext;
use crate::error::ApiResult;

pub type AppState = Arc<AppContext>;

/// The full HTTP surface.
pub fn router(ctx: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhooks::router())
        .merge(oauth::router())
        .merge(connections::router())
        .merge(events::router())
        .merge(conflicts::router())
        .merge(availability::router())
        .with_state(ctx)
}

/// Provider name from a path segment.
pub(crate) fn parse_provider(raw: &str) -> ApiResult<Provider> {
    Ok(raw.parse::<Provider>()?)
}

/// Ask the dispatcher for a pass so local changes reach the provider before
/// the next reconciliation.
pub(crate) fn request_pass(ctx: &AppContext, connection_id: &str) {
    let outcome = ctx.dispatcher.enqueue(connection_id);
    tracing::debug!(connection_id, ?outcome, "sync pass requested");
}
