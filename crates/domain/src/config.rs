//! Configuration management

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DISPATCH_QUEUE_CAPACITY, DEFAULT_LEASE_TIMEOUT_SECS, DEFAULT_LOOKAHEAD_DAYS,
    DEFAULT_LOOKBACK_DAYS, DEFAULT_MAX_CONCURRENT_REFRESHES, DEFAULT_MAX_CONCURRENT_SYNCS,
    DEFAULT_PROVIDER_TIMEOUT_SECS, DEFAULT_PUSH_BASE_DELAY_MS, DEFAULT_PUSH_MAX_ATTEMPTS,
    DEFAULT_PUSH_MAX_DELAY_MS, DEFAULT_RECONCILIATION_CRON, DEFAULT_REFRESH_THRESHOLD_SECS,
    DEFAULT_RENEWAL_WINDOW_DAYS, DEFAULT_SCHEDULE_TIMEZONE, DEFAULT_TOKEN_REFRESH_CRON,
    DEFAULT_WEBHOOK_RENEWAL_CRON, DEFAULT_WORKDAY_END_HOUR, DEFAULT_WORKDAY_START_HOUR,
};
use crate::errors::{CalSyncError, Result};

/// Service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub tokens: TokenConfig,
    pub webhooks: WebhookConfig,
    pub providers: ProvidersConfig,
    pub availability: AvailabilityConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
    /// SQLCipher key. When absent the key is read from (or created in) the OS
    /// keychain.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Externally reachable base URL that providers deliver webhooks to.
    pub public_base_url: String,
}

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub reconciliation_cron: String,
    pub provider_timeout_secs: u64,
    pub lease_timeout_secs: u64,
    pub push_max_attempts: u32,
    pub push_base_delay_ms: u64,
    pub push_max_delay_ms: u64,
    pub lookback_days: i64,
    pub lookahead_days: i64,
    pub max_concurrent_syncs: usize,
    pub dispatch_queue_capacity: usize,
}

/// Token lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub refresh_cron: String,
    /// Refresh credentials whose remaining lifetime is at or below this.
    pub refresh_threshold_secs: i64,
    pub max_concurrent_refreshes: usize,
}

/// Webhook subscription configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub renewal_cron: String,
    /// Subscriptions with `days_left` at or below this are renewed.
    pub renewal_window_days: i64,
}

/// OAuth client credentials for one provider
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Overrides the provider API base URL (used by tests and proxies).
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Overrides the provider token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// CalDAV server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalDavConfig {
    pub base_url: String,
}

/// Provider integrations. A provider without configuration is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub google: Option<OAuthClientConfig>,
    pub outlook: Option<OAuthClientConfig>,
    pub apple: Option<CalDavConfig>,
    pub caldav: Option<CalDavConfig>,
}

/// Availability configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    pub default_schedule: DefaultSchedule,
}

/// Static working hours used when a user has no calendars to consult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSchedule {
    /// IANA timezone name, e.g. `Europe/Berlin`.
    pub timezone: String,
    pub working_days: Vec<Weekday>,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "calsync.db".to_string(), pool_size: 8, encryption_key: None }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconciliation_cron: DEFAULT_RECONCILIATION_CRON.to_string(),
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            push_max_attempts: DEFAULT_PUSH_MAX_ATTEMPTS,
            push_base_delay_ms: DEFAULT_PUSH_BASE_DELAY_MS,
            push_max_delay_ms: DEFAULT_PUSH_MAX_DELAY_MS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
            dispatch_queue_capacity: DEFAULT_DISPATCH_QUEUE_CAPACITY,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_cron: DEFAULT_TOKEN_REFRESH_CRON.to_string(),
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT_REFRESHES,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            renewal_cron: DEFAULT_WEBHOOK_RENEWAL_CRON.to_string(),
            renewal_window_days: DEFAULT_RENEWAL_WINDOW_DAYS,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            google: None,
            outlook: None,
            apple: Some(CalDavConfig { base_url: "https://caldav.icloud.com".to_string() }),
            caldav: None,
        }
    }
}

impl Default for DefaultSchedule {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_SCHEDULE_TIMEZONE.to_string(),
            working_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            start_hour: DEFAULT_WORKDAY_START_HOUR,
            end_hour: DEFAULT_WORKDAY_END_HOUR,
        }
    }
}

impl Config {
    /// Reject configurations the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CalSyncError::Config(msg.to_string()));

        if self.database.path.trim().is_empty() {
            return invalid("database.path must not be empty");
        }
        if self.database.pool_size == 0 {
            return invalid("database.pool_size must be at least 1");
        }
        if self.server.bind_address.trim().is_empty() {
            return invalid("server.bind_address must not be empty");
        }
        if self.sync.provider_timeout_secs == 0 || self.sync.lease_timeout_secs == 0 {
            return invalid("sync timeouts must be greater than zero");
        }
        if self.sync.push_max_attempts == 0 {
            return invalid("sync.push_max_attempts must be at least 1");
        }
        if self.sync.push_base_delay_ms > self.sync.push_max_delay_ms {
            return invalid("sync.push_base_delay_ms must not exceed push_max_delay_ms");
        }
        if self.sync.lookback_days < 0 || self.sync.lookahead_days <= 0 {
            return invalid("sync lookback/lookahead windows must be positive");
        }
        if self.sync.max_concurrent_syncs == 0 || self.sync.dispatch_queue_capacity == 0 {
            return invalid("sync concurrency and queue capacity must be at least 1");
        }
        if self.tokens.refresh_threshold_secs <= 0 {
            return invalid("tokens.refresh_threshold_secs must be positive");
        }
        if self.tokens.max_concurrent_refreshes == 0 {
            return invalid("tokens.max_concurrent_refreshes must be at least 1");
        }
        if self.webhooks.renewal_window_days < 0 {
            return invalid("webhooks.renewal_window_days must not be negative");
        }
        for cron in
            [&self.sync.reconciliation_cron, &self.tokens.refresh_cron, &self.webhooks.renewal_cron]
        {
            if cron.split_whitespace().count() < 6 {
                return Err(CalSyncError::Config(format!(
                    "cron expression '{cron}' must have six fields (with seconds)"
                )));
            }
        }

        let schedule = &self.availability.default_schedule;
        if schedule.start_hour >= schedule.end_hour || schedule.end_hour > 24 {
            return invalid("availability.default_schedule hours must satisfy start < end <= 24");
        }
        if schedule.working_days.is_empty() {
            return invalid("availability.default_schedule.working_days must not be empty");
        }

        Ok(())
    }
}
