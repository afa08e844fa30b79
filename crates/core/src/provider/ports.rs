//! Provider adapter port
//!
//! One implementation per provider (Google, Outlook, CalDAV). Adapters
//! translate between provider wire formats and domain types and classify
//! failures into the sync error taxonomy:
//! - rejected refresh tokens are `ReauthRequired`
//! - rate limits, 5xx and network failures are `TransientProvider`

use async_trait::async_trait;
use calsync_domain::{
    CalendarConnection, Credential, EventContent, Provider, RemoteEvent, Result, TokenGrant,
    WebhookChannel, WebhookSubscription,
};
use chrono::{DateTime, Utc};

/// Credentials an adapter needs for one call.
#[derive(Clone)]
pub struct AuthContext {
    /// Provider account identifier (Apple ID / CalDAV username, mailbox).
    pub account_id: String,
    /// OAuth access token, or the app-specific password for CalDAV.
    pub access_token: String,
}

impl AuthContext {
    /// Bundle a connection with its current credential.
    pub fn new(connection: &CalendarConnection, credential: &Credential) -> Self {
        Self {
            account_id: connection.provider_account_id.clone(),
            access_token: credential.access_token.clone(),
        }
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("account_id", &calsync_common::redact_identifier(&self.account_id))
            .field("access_token", &"[redacted]")
            .finish()
    }
}

/// What to pull from a calendar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeQuery {
    /// Only events modified after this instant. `None` means every event in
    /// the window.
    pub since: Option<DateTime<Utc>>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Trait for calendar provider operations
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Events changed per `query`, including cancellations.
    async fn list_changed_events(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        query: &ChangeQuery,
    ) -> Result<Vec<RemoteEvent>>;

    /// Create (`provider_event_id == None`) or replace an event. Returns the
    /// provider's view of the written event.
    async fn upsert_event(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: Option<&str>,
        content: &EventContent,
    ) -> Result<RemoteEvent>;

    /// Delete an event. Deleting an event that is already gone succeeds.
    async fn delete_event(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()>;

    /// Open a push channel for `calendar_id` delivering to `callback_url`.
    async fn create_webhook(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        callback_url: &str,
    ) -> Result<WebhookChannel>;

    async fn stop_webhook(&self, auth: &AuthContext, subscription: &WebhookSubscription)
        -> Result<()>;

    /// Exchange a refresh token for a new access token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant>;
}
