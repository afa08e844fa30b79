//! Provider connections, per-calendar settings and stored credentials

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_enum_strings;

/// Calendar provider a connection is linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Outlook,
    Apple,
    CalDav,
}

impl_domain_enum_strings!(Provider {
    Google => "google",
    Outlook => "outlook",
    Apple => "apple",
    CalDav => "caldav",
});

impl Provider {
    pub const ALL: [Self; 4] = [Self::Google, Self::Outlook, Self::Apple, Self::CalDav];

    /// Only Google and Outlook deliver change notifications. Apple and generic
    /// CalDAV accounts rely on reconciliation alone.
    pub const fn supports_push(self) -> bool {
        matches!(self, Self::Google | Self::Outlook)
    }

    /// Whether credentials expire and must be refreshed with a refresh token.
    pub const fn uses_oauth(self) -> bool {
        matches!(self, Self::Google | Self::Outlook)
    }
}

/// A user's link to one provider account.
///
/// Connections are never hard-deleted; disconnecting or quarantining sets
/// `is_active = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConnection {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub provider_account_id: String,
    pub is_primary: bool,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub deactivated_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarConnection {
    /// New active, sync-enabled connection.
    pub fn new(
        user_id: impl Into<String>,
        provider: Provider,
        provider_account_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            user_id: user_id.into(),
            provider,
            provider_account_id: provider_account_id.into(),
            is_primary: false,
            is_active: true,
            sync_enabled: true,
            last_sync_at: None,
            deactivated_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active and sync-enabled: eligible for pulls, pushes and renewals.
    pub const fn is_syncable(&self) -> bool {
        self.is_active && self.sync_enabled
    }
}

/// Per-calendar settings under a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedCalendar {
    pub connection_id: String,
    pub calendar_id: String,
    pub name: String,
    pub sync_enabled: bool,
    pub check_availability: bool,
}

impl SyncedCalendar {
    /// Calendar entry named after its id, enabled for sync and availability.
    pub fn new(connection_id: impl Into<String>, calendar_id: impl Into<String>) -> Self {
        let calendar_id = calendar_id.into();
        Self {
            connection_id: connection_id.into(),
            name: calendar_id.clone(),
            calendar_id,
            sync_enabled: true,
            check_availability: true,
        }
    }
}

/// Stored provider credential for a connection.
///
/// `expires_at == None` marks a non-expiring secret (CalDAV app-specific
/// passwords).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub connection_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub refresh_count: u32,
}

impl Credential {
    /// True when the remaining lifetime is at or below `threshold`.
    pub fn expires_within(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at - now <= threshold)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Apply a successful refresh. Providers that do not rotate refresh
    /// tokens omit one, in which case the existing token is kept.
    pub fn apply_grant(&mut self, grant: TokenGrant, now: DateTime<Utc>) {
        self.expires_at = grant.expires_at(now);
        self.access_token = grant.access_token;
        if let Some(refresh_token) = grant.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if grant.scope.is_some() {
            self.scope = grant.scope;
        }
        self.last_refreshed_at = Some(now);
        self.refresh_count = self.refresh_count.saturating_add(1);
    }

    pub fn from_grant(connection_id: impl Into<String>, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            connection_id: connection_id.into(),
            expires_at: grant.expires_at(now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            scope: grant.scope,
            last_refreshed_at: None,
            refresh_count: 0,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("connection_id", &self.connection_id)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("last_refreshed_at", &self.last_refreshed_at)
            .field("refresh_count", &self.refresh_count)
            .finish()
    }
}

/// Token material returned by an authorization-code exchange or a refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, as reported by the provider.
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Operator view of a connection's token and push-channel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub connection_id: String,
    pub provider: Provider,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub deactivated_reason: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub token_needs_refresh: bool,
    pub refresh_count: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub webhook: Option<WebhookHealth>,
    pub open_conflicts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookHealth {
    pub channel_id: String,
    pub expiration: DateTime<Utc>,
    pub days_left: i64,
}
