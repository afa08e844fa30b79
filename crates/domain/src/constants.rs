//! Domain constants
//!
//! Centralized location for the defaults and limits shared by the sync
//! services, the schedulers and the HTTP surface.

// Token lifecycle
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 600;
pub const DEFAULT_TOKEN_REFRESH_CRON: &str = "0 */5 * * * *";
pub const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 8;

// Webhook subscriptions
pub const MILLIS_PER_DAY: i64 = 86_400_000;
pub const DEFAULT_RENEWAL_WINDOW_DAYS: i64 = 2;
pub const DEFAULT_WEBHOOK_RENEWAL_CRON: &str = "0 0 3 * * *";
pub const WEBHOOK_CALLBACK_PREFIX: &str = "/webhooks";

// Sync engine
pub const DEFAULT_RECONCILIATION_CRON: &str = "0 30 3 * * *";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PUSH_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_PUSH_BASE_DELAY_MS: u64 = 250;
pub const DEFAULT_PUSH_MAX_DELAY_MS: u64 = 8_000;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 180;
pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 4;
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 256;

// Calendars
pub const PRIMARY_CALENDAR_ID: &str = "primary";

// Availability fallback
pub const DEFAULT_SCHEDULE_TIMEZONE: &str = "UTC";
pub const DEFAULT_WORKDAY_START_HOUR: u32 = 9;
pub const DEFAULT_WORKDAY_END_HOUR: u32 = 17;
