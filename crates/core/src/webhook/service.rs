//! Webhook subscription lifecycle: create, renew before expiry, repair

use std::sync::Arc;
use std::time::Duration as StdDuration;

use calsync_common::{Clock, SystemClock};
use calsync_domain::constants::{
    DEFAULT_MAX_CONCURRENT_REFRESHES, DEFAULT_RENEWAL_WINDOW_DAYS, PRIMARY_CALENDAR_ID,
    WEBHOOK_CALLBACK_PREFIX,
};
use calsync_domain::{
    CalSyncError, CalendarConnection, FailedItem, Provider, RenewalReport, Result,
    WebhookSubscription,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::ports::SubscriptionRepository;
use crate::connection::ports::ConnectionRepository;
use crate::provider::{AuthContext, ProviderRegistry};
use crate::token::TokenLifecycleManager;

const PROVIDER_CALL_TIMEOUT: StdDuration = StdDuration::from_secs(30);

enum RenewalOutcome {
    Untouched,
    Renewed,
    Failed(CalSyncError),
}

/// Owns the single push subscription each push-capable connection holds.
pub struct WebhookSubscriptionManager {
    connections: Arc<dyn ConnectionRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    tokens: Arc<TokenLifecycleManager>,
    providers: Arc<ProviderRegistry>,
    clock: Arc<dyn Clock>,
    public_base_url: String,
    renewal_window_days: i64,
    max_concurrency: usize,
    call_timeout: StdDuration,
}

impl WebhookSubscriptionManager {
    /// Create a manager that registers callbacks under `public_base_url`.
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        tokens: Arc<TokenLifecycleManager>,
        providers: Arc<ProviderRegistry>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            connections,
            subscriptions,
            tokens,
            providers,
            clock: Arc::new(SystemClock),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            renewal_window_days: DEFAULT_RENEWAL_WINDOW_DAYS,
            max_concurrency: DEFAULT_MAX_CONCURRENT_REFRESHES,
            call_timeout: PROVIDER_CALL_TIMEOUT,
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Days before expiry at which the maintenance job renews.
    #[must_use]
    pub fn with_renewal_window_days(mut self, days: i64) -> Self {
        self.renewal_window_days = days;
        self
    }

    /// Upper bound on a single provider call.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: StdDuration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Public callback URL for a provider.
    pub fn callback_url(&self, provider: Provider) -> String {
        format!("{}{WEBHOOK_CALLBACK_PREFIX}/{provider}", self.public_base_url)
    }

    /// Enable push for a connection. Returns the existing subscription when
    /// one is still live.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, connection_id: &str) -> Result<WebhookSubscription> {
        let connection = self.load_connection(connection_id).await?;
        if !connection.provider.supports_push() {
            return Err(CalSyncError::InvalidInput(format!(
                "provider '{}' does not support push notifications",
                connection.provider
            )));
        }
        if !connection.is_syncable() {
            return Err(CalSyncError::InvalidInput(format!(
                "connection {connection_id} is not active and sync-enabled"
            )));
        }
        if let Some(existing) = self.subscriptions.get_for_connection(connection_id).await? {
            if !existing.is_expired(self.clock.now()) {
                return Ok(existing);
            }
        }
        self.create(&connection, None).await
    }

    /// Disable push for a connection. Stopping the provider channel is best
    /// effort; the local record is always removed.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, connection_id: &str) -> Result<bool> {
        let Some(subscription) = self.subscriptions.get_for_connection(connection_id).await? else {
            return Ok(false);
        };
        if let Err(err) = self.stop_channel(&subscription).await {
            warn!(
                connection_id,
                channel_id = %subscription.channel_id,
                event = "subscription.delete.error",
                error = %err,
                "Failed to stop provider channel; it will lapse on its own"
            );
        }
        self.subscriptions.delete_for_connection(connection_id).await?;
        info!(connection_id, event = "subscription.delete.success", "Push subscription removed");
        Ok(true)
    }

    /// Renew subscriptions with at most `within_days` days left.
    ///
    /// Only active, sync-enabled connections are renewed. The replaced
    /// channel is not stopped; it lapses at its own expiration.
    #[instrument(skip(self))]
    pub async fn renew_expiring(&self, within_days: i64) -> Result<RenewalReport> {
        let subscriptions = self.subscriptions.list_all().await?;
        let outcomes: Vec<(String, RenewalOutcome)> = stream::iter(subscriptions)
            .map(|subscription| async move {
                let connection_id = subscription.connection_id.clone();
                (connection_id, self.renew_one(subscription, within_days).await)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = RenewalReport::default();
        for (connection_id, outcome) in outcomes {
            match outcome {
                RenewalOutcome::Untouched => {}
                RenewalOutcome::Renewed => report.renewed.push(connection_id),
                RenewalOutcome::Failed(err) => report.failed.push(FailedItem::new(
                    connection_id,
                    CalSyncError::WebhookRenewalFailed(err.to_string()),
                )),
            }
        }
        info!(
            renewed = report.renewed.len(),
            failed = report.failed.len(),
            within_days,
            "Webhook renewal sweep finished"
        );
        Ok(report)
    }

    async fn renew_one(&self, mut subscription: WebhookSubscription, within_days: i64) -> RenewalOutcome {
        let connection = match self.connections.get(&subscription.connection_id).await {
            Ok(Some(connection)) if connection.is_syncable() => connection,
            Ok(_) => return RenewalOutcome::Untouched,
            Err(err) => return RenewalOutcome::Failed(err),
        };
        let now = self.clock.now();
        if !subscription.needs_renewal(now, within_days) {
            return RenewalOutcome::Untouched;
        }
        let days_left = subscription.fractional_days_left(now);

        let previous_channel = subscription.channel_id.clone();
        let channel = match self.open_channel(&connection, &subscription.calendar_id).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(
                    connection_id = %connection.id,
                    channel_id = %previous_channel,
                    days_left,
                    event = "subscription.renew.error",
                    error = %err,
                    "Webhook renewal failed"
                );
                return RenewalOutcome::Failed(err);
            }
        };
        subscription.replace_channel(channel);
        if let Err(err) = self.subscriptions.save(&subscription).await {
            return RenewalOutcome::Failed(err);
        }
        info!(
            connection_id = %connection.id,
            previous_channel = %previous_channel,
            channel_id = %subscription.channel_id,
            expiration = %subscription.expiration,
            event = "subscription.renew.success",
            "Webhook subscription renewed"
        );
        RenewalOutcome::Renewed
    }

    /// Create subscriptions that are missing or already expired for
    /// push-capable, active, sync-enabled connections.
    #[instrument(skip(self))]
    pub async fn repair(&self) -> Result<RenewalReport> {
        let now = self.clock.now();
        let mut report = RenewalReport::default();
        for connection in self.connections.list_active().await? {
            if !connection.sync_enabled || !connection.provider.supports_push() {
                continue;
            }
            let existing = self.subscriptions.get_for_connection(&connection.id).await?;
            if existing.as_ref().is_some_and(|s| !s.is_expired(now)) {
                continue;
            }
            match self.create(&connection, existing).await {
                Ok(_) => report.created.push(connection.id),
                Err(err) => {
                    report.failed.push(FailedItem::new(
                        connection.id,
                        CalSyncError::WebhookRenewalFailed(err.to_string()),
                    ));
                }
            }
        }
        if !report.created.is_empty() || !report.failed.is_empty() {
            info!(
                created = report.created.len(),
                failed = report.failed.len(),
                "Webhook repair sweep finished"
            );
        }
        Ok(report)
    }

    /// Daily maintenance: renew what is about to expire, then repair gaps.
    pub async fn run_maintenance(&self) -> Result<RenewalReport> {
        let mut report = self.renew_expiring(self.renewal_window_days).await?;
        let repaired = self.repair().await?;
        report.created.extend(repaired.created);
        report.failed.extend(repaired.failed);
        Ok(report)
    }

    /// Match an inbound notification to a live subscription.
    ///
    /// Returns `None` for unknown or expired channels, mismatched resource
    /// ids, and connections that are quarantined or have sync disabled.
    pub async fn validate_notification(
        &self,
        channel_id: &str,
        resource_id: Option<&str>,
    ) -> Result<Option<WebhookSubscription>> {
        let Some(subscription) = self.subscriptions.find_by_channel(channel_id).await? else {
            debug!(channel_id, "Notification for unknown channel");
            return Ok(None);
        };
        if subscription.is_expired(self.clock.now()) {
            debug!(channel_id, "Notification for expired channel");
            return Ok(None);
        }
        if let (Some(expected), Some(actual)) = (subscription.resource_id.as_deref(), resource_id) {
            if expected != actual {
                warn!(channel_id, "Notification resource id does not match subscription");
                return Ok(None);
            }
        }
        match self.connections.get(&subscription.connection_id).await? {
            Some(connection) if connection.is_syncable() => Ok(Some(subscription)),
            _ => Ok(None),
        }
    }

    async fn create(
        &self,
        connection: &CalendarConnection,
        stale: Option<WebhookSubscription>,
    ) -> Result<WebhookSubscription> {
        let calendar_id =
            stale.as_ref().map_or(PRIMARY_CALENDAR_ID, |s| s.calendar_id.as_str()).to_string();
        let channel = match self.open_channel(connection, &calendar_id).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(
                    connection_id = %connection.id,
                    event = "subscription.create.error",
                    error = %err,
                    "Failed to create webhook subscription"
                );
                return Err(err);
            }
        };
        let subscription = match stale {
            Some(mut existing) => {
                existing.replace_channel(channel);
                existing
            }
            None => WebhookSubscription::from_channel(
                &connection.id,
                calendar_id,
                channel,
                self.clock.now(),
            ),
        };
        self.subscriptions.save(&subscription).await?;
        info!(
            connection_id = %connection.id,
            channel_id = %subscription.channel_id,
            expiration = %subscription.expiration,
            event = "subscription.create.success",
            "Webhook subscription created"
        );
        Ok(subscription)
    }

    async fn open_channel(
        &self,
        connection: &CalendarConnection,
        calendar_id: &str,
    ) -> Result<calsync_domain::WebhookChannel> {
        let credential = self.tokens.ensure_valid(connection).await?;
        let adapter = self.providers.get(connection.provider)?;
        let auth = AuthContext::new(connection, &credential);
        let callback = self.callback_url(connection.provider);
        tokio::time::timeout(self.call_timeout, adapter.create_webhook(&auth, calendar_id, &callback))
            .await
            .map_err(|_| CalSyncError::Timeout("create_webhook".to_string()))?
    }

    async fn stop_channel(&self, subscription: &WebhookSubscription) -> Result<()> {
        let connection = self.load_connection(&subscription.connection_id).await?;
        let credential = self.tokens.ensure_valid(&connection).await?;
        let adapter = self.providers.get(connection.provider)?;
        let auth = AuthContext::new(&connection, &credential);
        tokio::time::timeout(self.call_timeout, adapter.stop_webhook(&auth, subscription))
            .await
            .map_err(|_| CalSyncError::Timeout("stop_webhook".to_string()))?
    }

    async fn load_connection(&self, connection_id: &str) -> Result<CalendarConnection> {
        self.connections
            .get(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))
    }
}
