//! OAuth account linking for Google and Outlook
//!
//! `authorize` returns the provider URL to send the user to. The provider
//! redirects back to `callback`, which exchanges the code, links the
//! account, opens a push channel and requests the first sync pass.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use calsync_common::redact_identifier;
use calsync_core::NewConnection;
use calsync_domain::{CalSyncError, CalendarConnection, WebhookSubscription};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{parse_provider, request_pass, AppState};
use crate::context::oauth::AuthorizationStart;
use crate::error::ApiResult;
use crate::utils::command_helpers::execute_logged;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth/{provider}/authorize", get(authorize))
        .route("/oauth/{provider}/callback", get(callback))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub user_id: String,
}

async fn authorize(
    State(ctx): State<AppState>,
    Path(provider): Path<String>,
    query: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> ApiResult<Json<AuthorizationStart>> {
    let Query(query) = query?;
    execute_logged("oauth::authorize", async {
        let provider = parse_provider(&provider)?;
        if !provider.uses_oauth() {
            return Err(CalSyncError::InvalidInput(format!(
                "{provider} accounts are linked with an app password"
            ))
            .into());
        }
        Ok(Json(ctx.oauth.begin(provider, &query.user_id)?))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set instead of `code` when the user declined.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkedAccount {
    pub connection: CalendarConnection,
    /// `None` when the push channel could not be opened yet; the daily
    /// repair retries it.
    pub webhook: Option<WebhookSubscription>,
}

async fn callback(
    State(ctx): State<AppState>,
    Path(provider): Path<String>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> ApiResult<Json<LinkedAccount>> {
    let Query(query) = query?;
    execute_logged("oauth::callback", async {
        let provider = parse_provider(&provider)?;
        if let Some(error) = query.error {
            return Err(CalSyncError::Auth(format!("authorization declined: {error}")).into());
        }
        let (Some(code), Some(state)) = (query.code, query.state) else {
            return Err(CalSyncError::InvalidInput("callback requires code and state".into()).into());
        };

        let completed = ctx.oauth.complete(provider, &state, &code).await?;
        let account_id = completed.account.account_id.ok_or_else(|| {
            CalSyncError::Auth(format!("{provider} did not identify the authorized account"))
        })?;
        info!(%provider, account = %redact_identifier(&account_id), "account authorized");

        let connection = ctx
            .connections
            .connect(
                NewConnection {
                    user_id: completed.user_id,
                    provider,
                    provider_account_id: account_id,
                    primary_calendar_name: None,
                },
                completed.account.grant,
            )
            .await?;

        let webhook = if provider.supports_push() {
            match ctx.webhooks.subscribe(&connection.id).await {
                Ok(subscription) => Some(subscription),
                Err(err) => {
                    warn!(connection_id = %connection.id, error = %err, "push channel not opened");
                    None
                }
            }
        } else {
            None
        };
        request_pass(&ctx, &connection.id);

        Ok(Json(LinkedAccount { connection, webhook }))
    })
    .await
}
