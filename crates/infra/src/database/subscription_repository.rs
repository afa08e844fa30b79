//! SqlCipher-backed implementation of the SubscriptionRepository port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::SqlCipherPool;
use calsync_core::SubscriptionRepository;
use calsync_domain::{Result, WebhookSubscription};
use rusqlite::{params, OptionalExtension, Row};
use tracing::instrument;

use super::columns::{blocking, instant, to_millis};
use crate::errors::InfraError;

const SUBSCRIPTION_COLUMNS: &str =
    "id, connection_id, calendar_id, channel_id, resource_id, expiration, created_at";

fn map_subscription(row: &Row<'_>) -> rusqlite::Result<WebhookSubscription> {
    Ok(WebhookSubscription {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        calendar_id: row.get(2)?,
        channel_id: row.get(3)?,
        resource_id: row.get(4)?,
        expiration: instant(5, row.get(5)?)?,
        created_at: instant(6, row.get(6)?)?,
    })
}

/// SqlCipher implementation of [`SubscriptionRepository`]
pub struct SqlCipherSubscriptionRepository {
    pool: Arc<SqlCipherPool>,
}

impl SqlCipherSubscriptionRepository {
    /// Create a new subscription repository over the shared pool.
    pub fn new(pool: Arc<SqlCipherPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SqlCipherSubscriptionRepository {
    #[instrument(skip(self))]
    async fn get_for_connection(&self, connection_id: &str) -> Result<Option<WebhookSubscription>> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE connection_id = ?1"
            );
            Ok(conn
                .query_row(&sql, params![connection_id], map_subscription)
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn find_by_channel(&self, channel_id: &str) -> Result<Option<WebhookSubscription>> {
        let channel_id = channel_id.to_string();
        blocking(&self.pool, move |conn| {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE channel_id = ?1"
            );
            Ok(conn
                .query_row(&sql, params![channel_id], map_subscription)
                .optional()
                .map_err(InfraError::from)?)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<WebhookSubscription>> {
        blocking(&self.pool, |conn| {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions ORDER BY expiration, id"
            );
            let mut stmt = conn.prepare(&sql).map_err(InfraError::from)?;
            let rows = stmt
                .query_map([], map_subscription)
                .map_err(InfraError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(InfraError::from)?;
            Ok(rows)
        })
        .await
    }

    #[instrument(skip(self, subscription), fields(connection_id = %subscription.connection_id))]
    async fn save(&self, subscription: &WebhookSubscription) -> Result<()> {
        let subscription = subscription.clone();
        blocking(&self.pool, move |conn| {
            conn.execute(
                "INSERT INTO webhook_subscriptions
                     (id, connection_id, calendar_id, channel_id, resource_id, expiration, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(connection_id) DO UPDATE SET
                     id = excluded.id,
                     calendar_id = excluded.calendar_id,
                     channel_id = excluded.channel_id,
                     resource_id = excluded.resource_id,
                     expiration = excluded.expiration,
                     created_at = excluded.created_at",
                params![
                    subscription.id,
                    subscription.connection_id,
                    subscription.calendar_id,
                    subscription.channel_id,
                    subscription.resource_id,
                    to_millis(subscription.expiration),
                    to_millis(subscription.created_at),
                ],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_for_connection(&self, connection_id: &str) -> Result<()> {
        let connection_id = connection_id.to_string();
        blocking(&self.pool, move |conn| {
            conn.execute(
                "DELETE FROM webhook_subscriptions WHERE connection_id = ?1",
                params![connection_id],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
    }
}
