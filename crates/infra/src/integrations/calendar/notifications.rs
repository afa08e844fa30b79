//! Inbound push notifications
//!
//! Google announces changes with channel headers and an empty body. Outlook
//! first validates the endpoint with a `validationToken` query parameter,
//! then posts batches of change notifications. Both only tell us *that*
//! something changed; the routed connection is pulled by the dispatcher.

use std::sync::Arc;

use calsync_core::WebhookSubscriptionManager;
use calsync_domain::{CalSyncError, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::scheduling::{EnqueueOutcome, SyncDispatcher};

pub const GOOGLE_CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
pub const GOOGLE_RESOURCE_ID_HEADER: &str = "x-goog-resource-id";
pub const GOOGLE_RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";

/// One "something changed" signal for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNotice {
    pub channel_id: String,
    pub resource_id: Option<String>,
}

/// Google channel headers, `None` for the `sync` handshake sent when a
/// channel opens.
pub fn google_notice(
    channel_id: Option<&str>,
    resource_id: Option<&str>,
    resource_state: Option<&str>,
) -> Result<Option<ChannelNotice>> {
    let channel_id = channel_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CalSyncError::InvalidInput(format!("missing {GOOGLE_CHANNEL_ID_HEADER}")))?;

    if resource_state == Some("sync") {
        debug!(channel_id, "Google channel handshake");
        return Ok(None);
    }

    Ok(Some(ChannelNotice {
        channel_id: channel_id.to_string(),
        resource_id: resource_id.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string),
    }))
}

#[derive(Debug, Deserialize)]
struct OutlookBatch {
    #[serde(default)]
    value: Vec<OutlookNotification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutlookNotification {
    subscription_id: String,
    #[serde(default)]
    lifecycle_event: Option<String>,
}

/// Notices in a Graph change-notification batch, one per subscription.
pub fn outlook_notices(body: &[u8]) -> Result<Vec<ChannelNotice>> {
    let batch: OutlookBatch = serde_json::from_slice(body)
        .map_err(|e| CalSyncError::InvalidInput(format!("invalid Graph notification body: {e}")))?;

    let mut notices: Vec<ChannelNotice> = Vec::with_capacity(batch.value.len());
    for notification in batch.value {
        if let Some(event) = &notification.lifecycle_event {
            // Subscription upkeep is left to the daily repair.
            debug!(
                subscription_id = %notification.subscription_id,
                lifecycle = %event,
                "Graph lifecycle notification"
            );
        }
        if notices.iter().any(|n| n.channel_id == notification.subscription_id) {
            continue;
        }
        notices.push(ChannelNotice { channel_id: notification.subscription_id, resource_id: None });
    }
    Ok(notices)
}

/// Counts for one routed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub accepted: usize,
    pub ignored: usize,
}

/// Validates notices against live subscriptions and enqueues a pull for
/// each matching connection.
#[derive(Clone)]
pub struct NotificationRouter {
    webhooks: Arc<WebhookSubscriptionManager>,
    dispatcher: SyncDispatcher,
}

impl NotificationRouter {
    /// Create a router that hands matched notifications to `dispatcher`.
    pub fn new(webhooks: Arc<WebhookSubscriptionManager>, dispatcher: SyncDispatcher) -> Self {
        Self { webhooks, dispatcher }
    }

    pub async fn route(&self, notices: &[ChannelNotice]) -> Result<RouteReport> {
        let mut report = RouteReport::default();
        for notice in notices {
            let subscription = self
                .webhooks
                .validate_notification(&notice.channel_id, notice.resource_id.as_deref())
                .await?;
            let Some(subscription) = subscription else {
                report.ignored += 1;
                continue;
            };

            match self.dispatcher.enqueue(&subscription.connection_id) {
                EnqueueOutcome::Queued | EnqueueOutcome::Coalesced => report.accepted += 1,
                EnqueueOutcome::Dropped => {
                    warn!(
                        connection_id = %subscription.connection_id,
                        "Notification dropped; reconciliation will catch up"
                    );
                    report.ignored += 1;
                }
            }
        }
        if report.accepted > 0 {
            info!(accepted = report.accepted, ignored = report.ignored, "Notifications routed");
        }
        Ok(report)
    }
}
