//! OAuth2 token endpoint client for calendar providers.
//!
//! Handles the PKCE authorization-code flow used to connect an account and
//! the refresh-token exchange used by the token lifecycle manager.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use calsync_domain::{CalSyncError, OAuthClientConfig, Provider, Result, TokenGrant};
use rand::RngCore;
use reqwest::Method;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use super::errors::{classify_refresh_failure, classify_status};
use crate::errors::InfraError;
use crate::http::HttpClient;

pub const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const MICROSOFT_AUTHORIZATION_ENDPOINT: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const MICROSOFT_TOKEN_ENDPOINT: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/token";

const GOOGLE_SCOPES: &[&str] =
    &["openid", "email", "https://www.googleapis.com/auth/calendar.events"];
const MICROSOFT_SCOPES: &[&str] =
    &["openid", "email", "offline_access", "Calendars.ReadWrite"];

/// Endpoints, client credentials and scopes for one OAuth provider.
#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub scopes: Vec<String>,
    pub extra_authorize_params: Vec<(String, String)>,
    /// Microsoft requires the scopes again on refresh.
    pub scope_on_refresh: bool,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("token_endpoint", &self.token_endpoint)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl OAuthSettings {
    /// Google settings. Offline access with forced consent so Google issues a
    /// refresh token on every authorization.
    pub fn google(client: &OAuthClientConfig) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            authorization_endpoint: GOOGLE_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: client
                .token_url
                .clone()
                .unwrap_or_else(|| GOOGLE_TOKEN_ENDPOINT.to_string()),
            scopes: GOOGLE_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            extra_authorize_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
            scope_on_refresh: false,
        }
    }

    pub fn microsoft(client: &OAuthClientConfig) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            authorization_endpoint: MICROSOFT_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: client
                .token_url
                .clone()
                .unwrap_or_else(|| MICROSOFT_TOKEN_ENDPOINT.to_string()),
            scopes: MICROSOFT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            extra_authorize_params: Vec::new(),
            scope_on_refresh: true,
        }
    }

    /// Settings for an OAuth provider, `None` for password-based ones.
    pub fn for_provider(provider: Provider, client: &OAuthClientConfig) -> Option<Self> {
        match provider {
            Provider::Google => Some(Self::google(client)),
            Provider::Outlook => Some(Self::microsoft(client)),
            Provider::Apple | Provider::CalDav => None,
        }
    }
}

/// A started authorization: send the user to `url`, keep the verifier until
/// the callback arrives with the same `state`.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Tokens from an authorization-code exchange plus the account they belong
/// to.
#[derive(Debug, Clone)]
pub struct AuthorizedAccount {
    pub account_id: Option<String>,
    pub grant: TokenGrant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    id_token: Option<String>,
}

impl TokenResponse {
    fn into_grant(self) -> (TokenGrant, Option<String>) {
        let grant = TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            scope: self.scope,
        };
        (grant, self.id_token)
    }
}

/// Token endpoint client for one provider
#[derive(Clone)]
pub struct OAuthTokenClient {
    settings: OAuthSettings,
    http: HttpClient,
}

impl OAuthTokenClient {
    /// Create a client for one provider's OAuth endpoints.
    pub fn new(settings: OAuthSettings, http: HttpClient) -> Self {
        Self { settings, http }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// Build the authorization URL with a fresh PKCE pair and state.
    pub fn authorization_request(&self, redirect_uri: &str) -> Result<AuthorizationRequest> {
        let code_verifier = random_urlsafe(32);
        let state = random_urlsafe(16);

        let mut url = Url::parse(&self.settings.authorization_endpoint).map_err(|err| {
            CalSyncError::Config(format!("invalid OAuth authorization endpoint: {err}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce_challenge(&code_verifier))
            .append_pair("code_challenge_method", "S256");
        for (key, value) in &self.settings.extra_authorize_params {
            url.query_pairs_mut().append_pair(key, value);
        }

        Ok(AuthorizationRequest { url: url.into(), state, code_verifier })
    }

    /// Exchange an authorization code for tokens.
    #[instrument(skip(self, code, code_verifier))]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<AuthorizedAccount> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];
        let response = self
            .http
            .send_once(self.http.request(Method::POST, &self.settings.token_endpoint).form(&form))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, "authorization code exchange"));
        }

        let token: TokenResponse = response.json().await.map_err(InfraError::from)?;
        let (grant, id_token) = token.into_grant();
        let account_id = id_token.as_deref().map(extract_email_from_id_token).transpose()?;
        debug!(has_refresh_token = grant.refresh_token.is_some(), "authorization code exchanged");
        Ok(AuthorizedAccount { account_id, grant })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// Rejected refresh tokens surface as `ReauthRequired`.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.settings.client_id.clone()),
            ("client_secret", self.settings.client_secret.clone()),
        ];
        if self.settings.scope_on_refresh {
            form.push(("scope", self.settings.scopes.join(" ")));
        }

        let response = self
            .http
            .send(self.http.request(Method::POST, &self.settings.token_endpoint).form(&form))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_refresh_failure(status, &body));
        }

        let token: TokenResponse = response.json().await.map_err(InfraError::from)?;
        let (grant, _) = token.into_grant();
        debug!(rotated = grant.refresh_token.is_some(), "access token refreshed");
        Ok(grant)
    }
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Extract the account email from an ID token (JWT) without verifying it.
///
/// The token comes straight from the provider's token endpoint over TLS.
pub fn extract_email_from_id_token(id_token: &str) -> Result<String> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(CalSyncError::InvalidInput("invalid ID token format".into()));
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(parts[1]).map_err(|err| {
        CalSyncError::InvalidInput(format!("failed to decode ID token payload: {err}"))
    })?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).map_err(|err| {
        CalSyncError::InvalidInput(format!("failed to parse ID token payload: {err}"))
    })?;

    ["email", "preferred_username", "upn"]
        .iter()
        .find_map(|claim| payload.get(*claim).and_then(|value| value.as_str()))
        .map(str::to_string)
        .ok_or_else(|| CalSyncError::InvalidInput("email claim missing from ID token".into()))
}
