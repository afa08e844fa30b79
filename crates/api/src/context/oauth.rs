//! In-flight OAuth authorizations
//!
//! `authorize` hands out a provider URL and remembers the PKCE verifier under
//! the random `state`; the callback must come back with the same state, for
//! the same provider, within [`PENDING_TTL_MINUTES`].

use std::collections::HashMap;

use calsync_domain::{CalSyncError, Config, Provider, Result};
use calsync_infra::http::HttpClient;
use calsync_infra::integrations::calendar::{AuthorizedAccount, OAuthSettings, OAuthTokenClient};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

pub const PENDING_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
struct PendingAuthorization {
    user_id: String,
    provider: Provider,
    code_verifier: String,
    created_at: DateTime<Utc>,
}

/// A started authorization the caller should send the user to.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthorizationStart {
    pub authorization_url: String,
    pub state: String,
}

/// A finished authorization.
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub user_id: String,
    pub account: AuthorizedAccount,
}

pub struct OAuthFlows {
    clients: HashMap<Provider, OAuthTokenClient>,
    pending: DashMap<String, PendingAuthorization>,
    public_base_url: String,
}

impl OAuthFlows {
    /// One token client per configured OAuth provider.
    pub fn new(config: &Config, http: &HttpClient) -> Self {
        let configured = [
            (Provider::Google, config.providers.google.as_ref()),
            (Provider::Outlook, config.providers.outlook.as_ref()),
        ];
        let clients = configured
            .into_iter()
            .filter_map(|(provider, client)| {
                let settings = OAuthSettings::for_provider(provider, client?)?;
                Some((provider, OAuthTokenClient::new(settings, http.clone())))
            })
            .collect();

        Self {
            clients,
            pending: DashMap::new(),
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn redirect_uri(&self, provider: Provider) -> String {
        format!("{}/oauth/{provider}/callback", self.public_base_url)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn begin(&self, provider: Provider, user_id: &str) -> Result<AuthorizationStart> {
        if user_id.trim().is_empty() {
            return Err(CalSyncError::InvalidInput("user_id is required".into()));
        }
        let client = self.client(provider)?;
        let now = Utc::now();
        self.purge_expired(now);

        let request = client.authorization_request(&self.redirect_uri(provider))?;
        self.pending.insert(
            request.state.clone(),
            PendingAuthorization {
                user_id: user_id.to_string(),
                provider,
                code_verifier: request.code_verifier,
                created_at: now,
            },
        );
        debug!(%provider, "authorization started");
        Ok(AuthorizationStart { authorization_url: request.url, state: request.state })
    }

    /// Exchange the callback's code. The state is consumed whether or not
    /// the exchange succeeds.
    pub async fn complete(
        &self,
        provider: Provider,
        state: &str,
        code: &str,
    ) -> Result<CompletedAuthorization> {
        let (_, pending) = self
            .pending
            .remove(state)
            .ok_or_else(|| CalSyncError::InvalidInput("unknown or already used OAuth state".into()))?;
        if pending.provider != provider {
            return Err(CalSyncError::Security(format!(
                "OAuth state was issued for {}, not {provider}",
                pending.provider
            )));
        }
        if Utc::now() - pending.created_at > Duration::minutes(PENDING_TTL_MINUTES) {
            return Err(CalSyncError::InvalidInput("OAuth state expired".into()));
        }

        let account = self
            .client(provider)?
            .exchange_code(code, &self.redirect_uri(provider), &pending.code_verifier)
            .await?;
        info!(%provider, "authorization completed");
        Ok(CompletedAuthorization { user_id: pending.user_id, account })
    }

    fn client(&self, provider: Provider) -> Result<&OAuthTokenClient> {
        self.clients
            .get(&provider)
            .ok_or_else(|| CalSyncError::Config(format!("no OAuth client configured for {provider}")))
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let ttl = Duration::minutes(PENDING_TTL_MINUTES);
        self.pending.retain(|_, pending| now - pending.created_at <= ttl);
    }
}
