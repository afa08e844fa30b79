//! Provider push-notification subscriptions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MILLIS_PER_DAY;

/// The single push subscription a connection holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub connection_id: String,
    pub calendar_id: String,
    pub channel_id: String,
    pub resource_id: Option<String>,
    pub expiration: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn from_channel(
        connection_id: impl Into<String>,
        calendar_id: impl Into<String>,
        channel: WebhookChannel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            connection_id: connection_id.into(),
            calendar_id: calendar_id.into(),
            channel_id: channel.channel_id,
            resource_id: channel.resource_id,
            expiration: channel.expiration,
            created_at: now,
        }
    }

    /// Whole days until expiration, truncated toward zero. Display only;
    /// renewal decisions use [`Self::needs_renewal`].
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expiration - now).num_milliseconds() / MILLIS_PER_DAY
    }

    /// Exact days until expiration.
    #[allow(clippy::cast_precision_loss)]
    pub fn fractional_days_left(&self, now: DateTime<Utc>) -> f64 {
        (self.expiration - now).num_milliseconds() as f64 / MILLIS_PER_DAY as f64
    }

    /// True once the time left is at or below `within_days` full days.
    /// 2.5 days left is not within 2.
    pub fn needs_renewal(&self, now: DateTime<Utc>, within_days: i64) -> bool {
        self.expiration - now <= Duration::days(within_days)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }

    /// Replace the channel in place after a renewal.
    pub fn replace_channel(&mut self, channel: WebhookChannel) {
        self.channel_id = channel.channel_id;
        self.resource_id = channel.resource_id;
        self.expiration = channel.expiration;
    }
}

/// Channel details returned by a provider when a subscription is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookChannel {
    pub channel_id: String,
    pub resource_id: Option<String>,
    pub expiration: DateTime<Utc>,
}
