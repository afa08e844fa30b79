//! Token lifecycle: refresh before expiry, quarantine on rejection

use std::sync::Arc;
use std::time::Duration as StdDuration;

use calsync_common::{redact_identifier, Clock, KeyedLease, SystemClock};
use calsync_domain::constants::{DEFAULT_MAX_CONCURRENT_REFRESHES, DEFAULT_REFRESH_THRESHOLD_SECS};
use calsync_domain::{
    CalSyncError, CalendarConnection, Credential, FailedItem, RefreshOutcome, Result, TokenGrant,
    TokenSweepReport,
};
use chrono::Duration;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::connection::ports::{ConnectionRepository, CredentialRepository};
use crate::provider::ProviderRegistry;

const REFRESH_LEASE_WAIT: StdDuration = StdDuration::from_secs(30);
const REFRESH_CALL_TIMEOUT: StdDuration = StdDuration::from_secs(30);

enum SweepOutcome {
    Fresh,
    Refreshed,
    Quarantined,
    Failed(CalSyncError),
}

/// Keeps OAuth credentials usable.
///
/// Refreshes for one connection are serialized; different connections refresh
/// in parallel. A rejected refresh token quarantines the connection
/// (`is_active = false`) and nothing retries it until the user
/// re-authorizes through [`register_grant`](Self::register_grant).
pub struct TokenLifecycleManager {
    connections: Arc<dyn ConnectionRepository>,
    credentials: Arc<dyn CredentialRepository>,
    providers: Arc<ProviderRegistry>,
    clock: Arc<dyn Clock>,
    leases: KeyedLease,
    refresh_threshold: Duration,
    max_concurrency: usize,
    call_timeout: StdDuration,
}

impl TokenLifecycleManager {
    /// Create a manager with the default refresh threshold and concurrency.
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        credentials: Arc<dyn CredentialRepository>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            connections,
            credentials,
            providers,
            clock: Arc::new(SystemClock),
            leases: KeyedLease::new(),
            refresh_threshold: Duration::seconds(DEFAULT_REFRESH_THRESHOLD_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENT_REFRESHES,
            call_timeout: REFRESH_CALL_TIMEOUT,
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Refresh credentials expiring within `threshold`.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Refreshes run at once by a sweep.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Upper bound on a single token endpoint call.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: StdDuration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// True when an OAuth credential is inside the refresh threshold.
    pub fn needs_refresh(&self, connection: &CalendarConnection, credential: &Credential) -> bool {
        connection.provider.uses_oauth()
            && credential.expires_within(self.clock.now(), self.refresh_threshold)
    }

    /// Return a credential that is valid for at least the refresh threshold,
    /// refreshing it first when needed.
    ///
    /// Fails with `ReauthRequired` for quarantined connections, missing
    /// credentials and rejected refresh tokens.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn ensure_valid(&self, connection: &CalendarConnection) -> Result<Credential> {
        if !connection.is_active {
            return Err(CalSyncError::ReauthRequired(format!(
                "connection {} is quarantined: {}",
                connection.id,
                connection.deactivated_reason.as_deref().unwrap_or("inactive")
            )));
        }
        let credential = self.load_credential(&connection.id).await?;
        if !self.needs_refresh(connection, &credential) {
            return Ok(credential);
        }
        self.refresh_serialized(connection).await.map(|(credential, _)| credential)
    }

    /// User-initiated refresh. A credential that is not yet due is left
    /// alone and reported as [`RefreshOutcome::AlreadyFresh`].
    #[instrument(skip(self))]
    pub async fn manual_refresh(&self, connection_id: &str) -> Result<RefreshOutcome> {
        let connection = self.load_connection(connection_id).await?;
        if !connection.is_active {
            return Err(CalSyncError::ReauthRequired(format!(
                "connection {connection_id} must be re-authorized"
            )));
        }
        let credential = self.load_credential(connection_id).await?;
        if !self.needs_refresh(&connection, &credential) {
            return Ok(RefreshOutcome::AlreadyFresh);
        }
        self.refresh_serialized(&connection).await.map(|(_, outcome)| outcome)
    }

    /// Store the tokens from an authorization-code exchange or a
    /// re-authorization, and lift any quarantine.
    #[instrument(skip(self, grant))]
    pub async fn register_grant(&self, connection_id: &str, grant: TokenGrant) -> Result<Credential> {
        let connection = self.load_connection(connection_id).await?;
        let now = self.clock.now();
        if connection.provider.uses_oauth() && grant.refresh_token.is_none() {
            warn!(connection_id, "Grant without refresh token; connection cannot self-renew");
        }
        let credential = Credential::from_grant(connection_id, grant, now);
        self.credentials.save(&credential).await?;
        if !connection.is_active {
            self.connections.reactivate(connection_id, now).await?;
            info!(connection_id, "Connection re-authorized and reactivated");
        }
        Ok(credential)
    }

    /// Refresh every active OAuth credential that is inside the threshold.
    ///
    /// One connection's failure never stops the others.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<TokenSweepReport> {
        let candidates: Vec<_> = self
            .connections
            .list_active()
            .await?
            .into_iter()
            .filter(|c| c.provider.uses_oauth())
            .collect();

        let mut report = TokenSweepReport {
            checked: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
            ..TokenSweepReport::default()
        };

        let outcomes: Vec<(String, SweepOutcome)> = stream::iter(candidates)
            .map(|connection| async move {
                let outcome = self.sweep_one(&connection).await;
                (connection.id, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (connection_id, outcome) in outcomes {
            match outcome {
                SweepOutcome::Fresh => {}
                SweepOutcome::Refreshed => report.refreshed.push(connection_id),
                SweepOutcome::Quarantined => report.quarantined.push(connection_id),
                SweepOutcome::Failed(err) => report.failed.push(FailedItem::new(connection_id, err)),
            }
        }

        info!(
            checked = report.checked,
            refreshed = report.refreshed.len(),
            quarantined = report.quarantined.len(),
            failed = report.failed.len(),
            "Token refresh sweep finished"
        );
        Ok(report)
    }

    async fn sweep_one(&self, connection: &CalendarConnection) -> SweepOutcome {
        let credential = match self.credentials.get(&connection.id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return match self.quarantine(connection, "no stored credential").await {
                    Ok(()) => SweepOutcome::Quarantined,
                    Err(err) => SweepOutcome::Failed(err),
                };
            }
            Err(err) => return SweepOutcome::Failed(err),
        };
        if !self.needs_refresh(connection, &credential) {
            return SweepOutcome::Fresh;
        }
        match self.refresh_serialized(connection).await {
            Ok((_, RefreshOutcome::Refreshed)) => SweepOutcome::Refreshed,
            Ok((_, RefreshOutcome::AlreadyFresh)) => SweepOutcome::Fresh,
            Err(err) if err.requires_reauth() => SweepOutcome::Quarantined,
            Err(err) => SweepOutcome::Failed(err),
        }
    }

    /// Refresh under the connection's refresh lease, re-checking expiry once
    /// the lease is held so concurrent callers refresh only once.
    async fn refresh_serialized(
        &self,
        connection: &CalendarConnection,
    ) -> Result<(Credential, RefreshOutcome)> {
        let _lease = self
            .leases
            .acquire(&connection.id, REFRESH_LEASE_WAIT)
            .await
            .map_err(|e| CalSyncError::LeaseBusy(e.to_string()))?;

        let mut credential = self.load_credential(&connection.id).await?;
        if !self.needs_refresh(connection, &credential) {
            debug!(connection_id = %connection.id, "Credential refreshed by a concurrent caller");
            return Ok((credential, RefreshOutcome::AlreadyFresh));
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            self.quarantine(connection, "no refresh token").await?;
            return Err(CalSyncError::ReauthRequired(format!(
                "connection {} has no refresh token",
                connection.id
            )));
        };

        let adapter = self.providers.get(connection.provider)?;
        let refreshed = tokio::time::timeout(self.call_timeout, adapter.refresh_token(&refresh_token))
            .await
            .unwrap_or_else(|_| Err(CalSyncError::Timeout("refresh_token".to_string())));
        match refreshed {
            Ok(grant) => {
                credential.apply_grant(grant, self.clock.now());
                self.credentials.save(&credential).await?;
                info!(
                    connection_id = %connection.id,
                    provider = %connection.provider,
                    account = %redact_identifier(&connection.provider_account_id),
                    refresh_count = credential.refresh_count,
                    "Access token refreshed"
                );
                Ok((credential, RefreshOutcome::Refreshed))
            }
            Err(err) if err.requires_reauth() => {
                self.quarantine(connection, &err.to_string()).await?;
                Err(err)
            }
            Err(err) => {
                warn!(
                    connection_id = %connection.id,
                    error = %err,
                    "Token refresh failed; will retry on next sweep"
                );
                Err(err)
            }
        }
    }

    async fn quarantine(&self, connection: &CalendarConnection, reason: &str) -> Result<()> {
        self.connections.deactivate(&connection.id, reason, self.clock.now()).await?;
        warn!(
            connection_id = %connection.id,
            provider = %connection.provider,
            reason,
            "Connection quarantined; user must re-authorize"
        );
        Ok(())
    }

    async fn load_connection(&self, connection_id: &str) -> Result<CalendarConnection> {
        self.connections
            .get(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))
    }

    async fn load_credential(&self, connection_id: &str) -> Result<Credential> {
        self.credentials.get(connection_id).await?.ok_or_else(|| {
            CalSyncError::ReauthRequired(format!("connection {connection_id} has no credential"))
        })
    }
}
