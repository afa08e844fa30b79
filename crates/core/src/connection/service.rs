//! Connection management: connect, toggle, disconnect, health

use std::sync::Arc;

use calsync_common::{redact_identifier, Clock, SystemClock};
use calsync_domain::constants::PRIMARY_CALENDAR_ID;
use calsync_domain::{
    CalSyncError, CalendarConnection, ConnectionHealth, Provider, Result, SyncedCalendar,
    TokenGrant, WebhookHealth,
};
use tracing::{info, instrument, warn};

use super::ports::{CalendarRepository, ConnectionRepository, CredentialRepository};
use crate::sync::ports::ConflictRepository;
use crate::token::TokenLifecycleManager;
use crate::webhook::ports::SubscriptionRepository;
use crate::webhook::WebhookSubscriptionManager;

/// A provider account being linked to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnection {
    pub user_id: String,
    pub provider: Provider,
    pub provider_account_id: String,
    pub primary_calendar_name: Option<String>,
}

pub struct ConnectionService {
    connections: Arc<dyn ConnectionRepository>,
    calendars: Arc<dyn CalendarRepository>,
    credentials: Arc<dyn CredentialRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    tokens: Arc<TokenLifecycleManager>,
    webhooks: Arc<WebhookSubscriptionManager>,
    clock: Arc<dyn Clock>,
}

impl ConnectionService {
    /// Create the service over its stores and the provider registry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        calendars: Arc<dyn CalendarRepository>,
        credentials: Arc<dyn CredentialRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        tokens: Arc<TokenLifecycleManager>,
        webhooks: Arc<WebhookSubscriptionManager>,
    ) -> Self {
        Self {
            connections,
            calendars,
            credentials,
            subscriptions,
            conflicts,
            tokens,
            webhooks,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Link a provider account, or re-authorize it if it was linked before.
    ///
    /// The first active connection per (user, provider) becomes primary.
    #[instrument(skip(self, grant), fields(user_id = %new.user_id, provider = %new.provider))]
    pub async fn connect(&self, new: NewConnection, grant: TokenGrant) -> Result<CalendarConnection> {
        if new.provider_account_id.trim().is_empty() {
            return Err(CalSyncError::InvalidInput("provider_account_id is required".into()));
        }
        let siblings = self.connections.list_by_user(&new.user_id).await?;
        if let Some(existing) = siblings
            .iter()
            .find(|c| c.provider == new.provider && c.provider_account_id == new.provider_account_id)
        {
            self.tokens.register_grant(&existing.id, grant).await?;
            info!(connection_id = %existing.id, "Existing connection re-authorized");
            return self.get(&existing.id).await;
        }

        let now = self.clock.now();
        let mut connection =
            CalendarConnection::new(&new.user_id, new.provider, &new.provider_account_id, now);
        connection.is_primary =
            !siblings.iter().any(|c| c.provider == new.provider && c.is_active && c.is_primary);
        self.connections.insert(&connection).await?;

        let mut calendar = SyncedCalendar::new(&connection.id, PRIMARY_CALENDAR_ID);
        if let Some(name) = new.primary_calendar_name {
            calendar.name = name;
        }
        self.calendars.upsert(&calendar).await?;
        self.tokens.register_grant(&connection.id, grant).await?;

        info!(
            connection_id = %connection.id,
            account = %redact_identifier(&connection.provider_account_id),
            is_primary = connection.is_primary,
            "Connection created"
        );
        Ok(connection)
    }

    pub async fn get(&self, connection_id: &str) -> Result<CalendarConnection> {
        self.connections
            .get(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<CalendarConnection>> {
        self.connections.list_by_user(user_id).await
    }

    pub async fn list_calendars(&self, connection_id: &str) -> Result<Vec<SyncedCalendar>> {
        self.get(connection_id).await?;
        self.calendars.list_for_connection(connection_id).await
    }

    /// Start mirroring another calendar of the account.
    pub async fn add_calendar(
        &self,
        connection_id: &str,
        calendar_id: &str,
        name: Option<String>,
    ) -> Result<SyncedCalendar> {
        self.get(connection_id).await?;
        if let Some(existing) = self.calendars.get(connection_id, calendar_id).await? {
            return Ok(existing);
        }
        let mut calendar = SyncedCalendar::new(connection_id, calendar_id);
        if let Some(name) = name {
            calendar.name = name;
        }
        self.calendars.upsert(&calendar).await?;
        Ok(calendar)
    }

    /// Pause or resume sync. Takes effect at the next pass; a pass already
    /// running finishes.
    #[instrument(skip(self))]
    pub async fn set_sync_enabled(&self, connection_id: &str, enabled: bool) -> Result<CalendarConnection> {
        self.get(connection_id).await?;
        self.connections.set_sync_enabled(connection_id, enabled, self.clock.now()).await?;
        info!(connection_id, enabled, "Connection sync toggled");
        self.get(connection_id).await
    }

    #[instrument(skip(self))]
    pub async fn update_calendar(
        &self,
        connection_id: &str,
        calendar_id: &str,
        sync_enabled: Option<bool>,
        check_availability: Option<bool>,
    ) -> Result<SyncedCalendar> {
        let mut calendar = self.calendars.get(connection_id, calendar_id).await?.ok_or_else(|| {
            CalSyncError::NotFound(format!("calendar {calendar_id} on connection {connection_id}"))
        })?;
        if let Some(enabled) = sync_enabled {
            calendar.sync_enabled = enabled;
        }
        if let Some(check) = check_availability {
            calendar.check_availability = check;
        }
        self.calendars.upsert(&calendar).await?;
        Ok(calendar)
    }

    #[instrument(skip(self))]
    pub async fn set_primary(&self, connection_id: &str) -> Result<CalendarConnection> {
        let connection = self.get(connection_id).await?;
        if !connection.is_active {
            return Err(CalSyncError::InvalidInput(format!(
                "connection {connection_id} is inactive and cannot be primary"
            )));
        }
        self.connections.set_primary(connection_id, self.clock.now()).await?;
        self.get(connection_id).await
    }

    /// Unlink an account: stop push, drop the credential, keep the row and
    /// its history. A primary connection hands the flag to the oldest active
    /// sibling for the same provider.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let connection = self.get(connection_id).await?;
        if let Err(err) = self.webhooks.unsubscribe(connection_id).await {
            warn!(connection_id, error = %err, "Could not remove push subscription on disconnect");
        }
        let now = self.clock.now();
        self.connections.deactivate(connection_id, "disconnected", now).await?;
        self.credentials.delete(connection_id).await?;

        if connection.is_primary {
            let mut siblings: Vec<_> = self
                .connections
                .list_by_user(&connection.user_id)
                .await?
                .into_iter()
                .filter(|c| c.id != connection.id && c.provider == connection.provider && c.is_active)
                .collect();
            siblings.sort_by_key(|c| c.created_at);
            if let Some(next) = siblings.first() {
                self.connections.set_primary(&next.id, now).await?;
                info!(connection_id = %next.id, "Primary connection reassigned");
            }
        }
        info!(connection_id, "Connection disconnected");
        Ok(())
    }

    pub async fn health(&self, connection_id: &str) -> Result<ConnectionHealth> {
        let connection = self.get(connection_id).await?;
        let now = self.clock.now();
        let credential = self.credentials.get(connection_id).await?;
        let webhook = self.subscriptions.get_for_connection(connection_id).await?.map(|s| {
            WebhookHealth { days_left: s.days_left(now), channel_id: s.channel_id, expiration: s.expiration }
        });
        Ok(ConnectionHealth {
            token_expires_at: credential.as_ref().and_then(|c| c.expires_at),
            token_needs_refresh: credential
                .as_ref()
                .is_some_and(|c| self.tokens.needs_refresh(&connection, c)),
            refresh_count: credential.as_ref().map_or(0, |c| c.refresh_count),
            open_conflicts: self.conflicts.count_open(connection_id).await?,
            webhook,
            connection_id: connection.id,
            provider: connection.provider,
            is_active: connection.is_active,
            sync_enabled: connection.sync_enabled,
            deactivated_reason: connection.deactivated_reason,
            last_sync_at: connection.last_sync_at,
        })
    }
}
