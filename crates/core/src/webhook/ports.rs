//! Push subscription persistence port

use async_trait::async_trait;
use calsync_domain::{Result, WebhookSubscription};

/// Persistence for webhook subscriptions, at most one per connection
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get_for_connection(&self, connection_id: &str) -> Result<Option<WebhookSubscription>>;

    async fn find_by_channel(&self, channel_id: &str) -> Result<Option<WebhookSubscription>>;

    async fn list_all(&self) -> Result<Vec<WebhookSubscription>>;

    /// Insert, or replace the connection's existing subscription.
    async fn save(&self, subscription: &WebhookSubscription) -> Result<()>;

    async fn delete_for_connection(&self, connection_id: &str) -> Result<()>;
}
