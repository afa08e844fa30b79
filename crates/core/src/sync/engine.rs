//! Bidirectional sync engine: pull, diff, push under a per-connection lease

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use calsync_common::{Clock, KeyedLease, RetryStrategy, SystemClock};
use calsync_domain::{
    CalSyncError, CalendarConnection, CalendarEvent, FailedItem, ReconciliationReport, Result,
    SkipReason, SyncConfig, SyncPhase, SyncSummary, SyncTrigger, SyncedCalendar,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::diff::{diff_remote, DiffAction, DiffContext};
use super::ports::{ConflictRepository, EventRepository};
use crate::connection::ports::{CalendarRepository, ConnectionRepository};
use crate::provider::{AuthContext, ChangeQuery, ProviderAdapter, ProviderRegistry};
use crate::token::TokenLifecycleManager;

/// Engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Upper bound on one provider call.
    pub provider_timeout: StdDuration,
    /// How long a pass waits for the connection lease before reporting busy.
    pub lease_timeout: StdDuration,
    /// Backoff for pushing dirty local events.
    pub push_retry: RetryStrategy,
    /// How far before now the pull window starts.
    pub lookback: Duration,
    /// How far after now the pull window ends.
    pub lookahead: Duration,
    /// Connections reconciled at once by a sweep.
    pub max_concurrent_syncs: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default()).unwrap_or_else(|_| Self {
            provider_timeout: StdDuration::from_secs(30),
            lease_timeout: StdDuration::from_secs(5),
            push_retry: RetryStrategy::default(),
            lookback: Duration::days(30),
            lookahead: Duration::days(180),
            max_concurrent_syncs: 4,
        })
    }
}

impl SyncSettings {
    /// Build settings from the `[sync]` config section.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let push_retry = RetryStrategy::custom(
            config.push_max_attempts,
            StdDuration::from_millis(config.push_base_delay_ms),
            StdDuration::from_millis(config.push_max_delay_ms),
        )
        .map_err(|e| CalSyncError::Config(e.to_string()))?;
        Ok(Self {
            provider_timeout: StdDuration::from_secs(config.provider_timeout_secs),
            lease_timeout: StdDuration::from_secs(config.lease_timeout_secs),
            push_retry,
            lookback: Duration::days(config.lookback_days),
            lookahead: Duration::days(config.lookahead_days),
            max_concurrent_syncs: config.max_concurrent_syncs.max(1),
        })
    }
}

/// Resets the connection's phase to idle however the pass ends.
struct PhaseGuard<'a> {
    phases: &'a DashMap<String, SyncPhase>,
    connection_id: String,
}

impl<'a> PhaseGuard<'a> {
    fn new(phases: &'a DashMap<String, SyncPhase>, connection_id: &str) -> Self {
        phases.insert(connection_id.to_string(), SyncPhase::Idle);
        Self { phases, connection_id: connection_id.to_string() }
    }

    fn set(&self, phase: SyncPhase) {
        self.phases.insert(self.connection_id.clone(), phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phases.insert(self.connection_id.clone(), SyncPhase::Idle);
    }
}

/// Keeps the local mirror and the providers consistent.
///
/// At most one pass per connection runs at a time. Events with an open
/// conflict are neither overwritten by pulls nor pushed.
pub struct SyncEngine {
    connections: Arc<dyn ConnectionRepository>,
    calendars: Arc<dyn CalendarRepository>,
    events: Arc<dyn EventRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    tokens: Arc<TokenLifecycleManager>,
    providers: Arc<ProviderRegistry>,
    clock: Arc<dyn Clock>,
    leases: KeyedLease,
    phases: DashMap<String, SyncPhase>,
    settings: SyncSettings,
}

impl SyncEngine {
    /// Create an engine with default settings and the system clock.
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        calendars: Arc<dyn CalendarRepository>,
        events: Arc<dyn EventRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        tokens: Arc<TokenLifecycleManager>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            connections,
            calendars,
            events,
            conflicts,
            tokens,
            providers,
            clock: Arc::new(SystemClock),
            leases: KeyedLease::new(),
            phases: DashMap::new(),
            settings: SyncSettings::default(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the tuning.
    #[must_use]
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current phase of a connection. Connections never synced are idle.
    pub fn phase(&self, connection_id: &str) -> SyncPhase {
        self.phases.get(connection_id).map_or(SyncPhase::Idle, |p| *p)
    }

    /// True while a pass for the connection is running.
    pub fn is_syncing(&self, connection_id: &str) -> bool {
        self.leases.is_held(connection_id)
    }

    /// Run one sync pass for a connection.
    ///
    /// Quarantined and sync-disabled connections are skipped without
    /// touching the provider. The pull checkpoint advances only when every
    /// calendar pulled and diffed successfully. Push failures are reported
    /// in the summary and leave the affected events queued.
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn sync_connection(
        &self,
        connection_id: &str,
        trigger: SyncTrigger,
    ) -> Result<SyncSummary> {
        let started_at = self.clock.now();
        let mut summary = SyncSummary::new(connection_id, trigger, started_at);

        let connection = self.load_connection(connection_id).await?;
        if let Some(reason) = skip_reason(&connection) {
            debug!(connection_id, ?reason, "Sync skipped");
            summary.skipped = Some(reason);
            return Ok(summary);
        }

        let _lease = self
            .leases
            .acquire(connection_id, self.settings.lease_timeout)
            .await
            .map_err(|e| CalSyncError::LeaseBusy(e.to_string()))?;
        let phase = PhaseGuard::new(&self.phases, connection_id);

        // Settings may have changed while waiting for the lease.
        let connection = self.load_connection(connection_id).await?;
        if let Some(reason) = skip_reason(&connection) {
            summary.skipped = Some(reason);
            return Ok(summary);
        }

        let credential = self.tokens.ensure_valid(&connection).await?;
        let auth = AuthContext::new(&connection, &credential);
        let adapter = self.providers.get(connection.provider)?;
        let calendars: Vec<SyncedCalendar> = self
            .calendars
            .list_for_connection(connection_id)
            .await?
            .into_iter()
            .filter(|c| c.sync_enabled)
            .collect();
        let query = self.change_query(&connection, trigger, started_at);

        for calendar in &calendars {
            phase.set(SyncPhase::Pulling);
            let remote = self
                .with_timeout(
                    "list_changed_events",
                    adapter.list_changed_events(&auth, &calendar.calendar_id, &query),
                )
                .await?;
            phase.set(SyncPhase::Diffing);
            self.apply_remote_changes(&connection, &calendar.calendar_id, remote, &mut summary)
                .await?;
        }
        self.connections.update_last_sync(connection_id, started_at).await?;

        if self.conflicts.count_open(connection_id).await? > 0 {
            phase.set(SyncPhase::ConflictPending);
        }
        phase.set(SyncPhase::Pushing);
        self.push_pending(&connection, adapter.as_ref(), &auth, &mut summary).await?;

        summary.open_conflicts = self.conflicts.count_open(connection_id).await?;
        summary.finished_at = self.clock.now();
        info!(
            connection_id,
            provider = %connection.provider,
            events_synced = summary.events_synced,
            conflicts_raised = summary.conflicts_raised,
            conflicts_resolved = summary.conflicts_resolved,
            open_conflicts = summary.open_conflicts,
            pushed = summary.pushed,
            push_failures = summary.push_failures,
            "Sync pass finished"
        );
        Ok(summary)
    }

    /// Full-window pass over every active, sync-enabled connection.
    ///
    /// One connection's failure is recorded and never stops the sweep.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconciliationReport> {
        let targets: Vec<String> = self
            .connections
            .list_active()
            .await?
            .into_iter()
            .filter(|c| c.sync_enabled)
            .map(|c| c.id)
            .collect();

        let results: Vec<(String, Result<SyncSummary>)> = stream::iter(targets)
            .map(|connection_id| async move {
                let result = self.sync_connection(&connection_id, SyncTrigger::Reconciliation).await;
                (connection_id, result)
            })
            .buffer_unordered(self.settings.max_concurrent_syncs)
            .collect()
            .await;

        let mut report = ReconciliationReport::default();
        for (connection_id, result) in results {
            match result {
                Ok(summary) => report.summaries.push(summary),
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "Reconciliation failed");
                    report.failed.push(FailedItem::new(connection_id, err));
                }
            }
        }
        info!(
            synced = report.summaries.len(),
            failed = report.failed.len(),
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    fn change_query(
        &self,
        connection: &CalendarConnection,
        trigger: SyncTrigger,
        now: DateTime<Utc>,
    ) -> ChangeQuery {
        let since = match trigger {
            SyncTrigger::Reconciliation => None,
            SyncTrigger::Webhook | SyncTrigger::Manual => connection.last_sync_at,
        };
        ChangeQuery {
            since,
            window_start: now - self.settings.lookback,
            window_end: now + self.settings.lookahead,
        }
    }

    async fn apply_remote_changes(
        &self,
        connection: &CalendarConnection,
        calendar_id: &str,
        remote_events: Vec<calsync_domain::RemoteEvent>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let ctx = DiffContext {
            connection_id: &connection.id,
            provider: connection.provider,
            calendar_id,
            now: self.clock.now(),
        };
        for remote in remote_events {
            let local = self
                .events
                .find_by_provider_id(&connection.id, calendar_id, &remote.provider_event_id)
                .await?;
            let open_conflict = match &local {
                Some(event) => self.conflicts.find_open_for_event(&event.id).await?,
                None => None,
            };

            match diff_remote(local.as_ref(), open_conflict.as_ref(), &remote, ctx) {
                DiffAction::Unchanged => {}
                DiffAction::Insert(event) => {
                    self.events.insert(&event).await?;
                    summary.events_synced += 1;
                }
                DiffAction::Apply { event, expected_local_version } => {
                    if self.events.replace(&event, expected_local_version).await? {
                        summary.events_synced += 1;
                    } else {
                        debug!(
                            event_id = %event.id,
                            "Local edit landed during pull; change picked up next pass"
                        );
                    }
                }
                DiffAction::RaiseConflict(conflict) => {
                    self.conflicts.insert(&conflict).await?;
                    summary.conflicts_raised += 1;
                    info!(
                        connection_id = %connection.id,
                        event_id = %conflict.event_id,
                        conflict_id = %conflict.id,
                        conflict_type = %conflict.conflict_type,
                        "Sync conflict detected"
                    );
                }
                DiffAction::RefreshConflict { conflict_id, remote } => {
                    self.conflicts.update_remote_snapshot(&conflict_id, &remote).await?;
                }
            }
        }
        Ok(())
    }

    async fn push_pending(
        &self,
        connection: &CalendarConnection,
        adapter: &dyn ProviderAdapter,
        auth: &AuthContext,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        for event in self.events.list_pending_push(&connection.id).await? {
            if self.conflicts.find_open_for_event(&event.id).await?.is_some() {
                continue;
            }
            match self.push_one(adapter, auth, &event).await {
                Ok(()) => {
                    summary.pushed += 1;
                    summary.events_synced += 1;
                    let now = self.clock.now();
                    for conflict in self.conflicts.list_awaiting_apply(&event.id).await? {
                        self.conflicts.mark_applied(&conflict.id, now).await?;
                        summary.conflicts_resolved += 1;
                    }
                }
                Err(err) if err.requires_reauth() => return Err(err),
                Err(err) => {
                    summary.push_failures += 1;
                    warn!(
                        connection_id = %connection.id,
                        event_id = %event.id,
                        error = %err,
                        "Push failed; event stays queued"
                    );
                }
            }
        }
        Ok(())
    }

    async fn push_one(
        &self,
        adapter: &dyn ProviderAdapter,
        auth: &AuthContext,
        event: &CalendarEvent,
    ) -> Result<()> {
        let pushed_version = event.local_version;
        let retry = &self.settings.push_retry;

        if event.pending_delete {
            if let Some(provider_event_id) = event.provider_event_id.as_deref() {
                retry
                    .execute("delete_event", CalSyncError::is_transient, move |_| {
                        self.with_timeout(
                            "delete_event",
                            adapter.delete_event(auth, &event.calendar_id, provider_event_id),
                        )
                    })
                    .await
                    .map_err(|e| e.into_source())?;
            }
            return self.events.finalize_delete(&event.id, pushed_version, self.clock.now()).await;
        }

        let written = retry
            .execute("upsert_event", CalSyncError::is_transient, move |_| {
                self.with_timeout(
                    "upsert_event",
                    adapter.upsert_event(
                        auth,
                        &event.calendar_id,
                        event.provider_event_id.as_deref(),
                        &event.content,
                    ),
                )
            })
            .await
            .map_err(|e| e.into_source())?;
        self.events
            .mark_pushed(
                &event.id,
                pushed_version,
                &written.provider_event_id,
                written.last_modified,
                self.clock.now(),
            )
            .await
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.settings.provider_timeout, future)
            .await
            .map_err(|_| CalSyncError::Timeout(format!("{operation} exceeded provider timeout")))?
    }

    async fn load_connection(&self, connection_id: &str) -> Result<CalendarConnection> {
        self.connections
            .get(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))
    }
}

const fn skip_reason(connection: &CalendarConnection) -> Option<SkipReason> {
    if !connection.is_active {
        Some(SkipReason::Quarantined)
    } else if !connection.sync_enabled {
        Some(SkipReason::SyncDisabled)
    } else {
        None
    }
}
