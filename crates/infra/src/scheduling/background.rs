//! Background sweeps: token refresh, webhook maintenance, reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::{SyncEngine, TokenLifecycleManager, WebhookSubscriptionManager};
use calsync_domain::{Config, Result};
use tracing::{info, warn};

use crate::scheduling::error::SchedulerResult;
use crate::scheduling::sweep_scheduler::{SweepJob, SweepScheduler, SweepSchedulerConfig};

/// Refreshes credentials nearing expiry.
pub struct TokenRefreshSweep {
    tokens: Arc<TokenLifecycleManager>,
}

impl TokenRefreshSweep {
    /// Wrap the token manager as a sweep job.
    pub fn new(tokens: Arc<TokenLifecycleManager>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl SweepJob for TokenRefreshSweep {
    fn name(&self) -> &'static str {
        "token_refresh"
    }

    async fn run(&self) -> Result<()> {
        let report = self.tokens.sweep().await?;
        info!(
            checked = report.checked,
            refreshed = report.refreshed.len(),
            quarantined = report.quarantined.len(),
            failed = report.failed.len(),
            "Token sweep complete"
        );
        Ok(())
    }
}

/// Renews expiring subscriptions, then recreates missing ones.
pub struct WebhookMaintenanceSweep {
    webhooks: Arc<WebhookSubscriptionManager>,
}

impl WebhookMaintenanceSweep {
    /// Wrap the subscription manager as a sweep job.
    pub fn new(webhooks: Arc<WebhookSubscriptionManager>) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl SweepJob for WebhookMaintenanceSweep {
    fn name(&self) -> &'static str {
        "webhook_maintenance"
    }

    async fn run(&self) -> Result<()> {
        let report = self.webhooks.run_maintenance().await?;
        info!(
            renewed = report.renewed.len(),
            created = report.created.len(),
            failed = report.failed.len(),
            "Webhook maintenance complete"
        );
        Ok(())
    }
}

/// Full-window pass over every syncable connection.
pub struct ReconciliationSweep {
    engine: Arc<SyncEngine>,
}

impl ReconciliationSweep {
    /// Wrap the engine as a sweep job.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl SweepJob for ReconciliationSweep {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn run(&self) -> Result<()> {
        let report = self.engine.reconcile_all().await?;
        info!(
            connections = report.summaries.len(),
            failed = report.failed.len(),
            "Reconciliation complete"
        );
        Ok(())
    }
}

/// Owns the service's periodic sweeps.
pub struct BackgroundTasks {
    schedulers: Vec<SweepScheduler>,
}

impl BackgroundTasks {
    /// Register the sweeps. Reconciliation is skipped when sync is disabled.
    pub async fn new(
        config: &Config,
        tokens: Arc<TokenLifecycleManager>,
        webhooks: Arc<WebhookSubscriptionManager>,
        engine: Arc<SyncEngine>,
    ) -> SchedulerResult<Self> {
        let token_sweep: Arc<dyn SweepJob> = Arc::new(TokenRefreshSweep::new(tokens));
        let webhook_sweep: Arc<dyn SweepJob> = Arc::new(WebhookMaintenanceSweep::new(webhooks));
        let mut jobs = vec![
            (config.tokens.refresh_cron.clone(), token_sweep),
            (config.webhooks.renewal_cron.clone(), webhook_sweep),
        ];
        if config.sync.enabled {
            let reconciliation: Arc<dyn SweepJob> = Arc::new(ReconciliationSweep::new(engine));
            jobs.push((config.sync.reconciliation_cron.clone(), reconciliation));
        } else {
            warn!("Sync disabled; reconciliation sweep not scheduled");
        }

        let mut schedulers = Vec::with_capacity(jobs.len());
        for (cron, job) in jobs {
            schedulers.push(SweepScheduler::new(SweepSchedulerConfig::with_cron(cron), job).await?);
        }
        Ok(Self { schedulers })
    }

    pub async fn start(&mut self) -> SchedulerResult<()> {
        for scheduler in &mut self.schedulers {
            scheduler.start().await?;
        }
        info!(sweeps = self.schedulers.len(), "Background tasks started");
        Ok(())
    }

    /// Stop every running sweep. Keeps going past individual failures and
    /// reports the first.
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        let mut first_error = None;
        for scheduler in &mut self.schedulers {
            if !scheduler.is_running() {
                continue;
            }
            if let Err(err) = scheduler.stop().await {
                warn!(job = scheduler.name(), error = %err, "Failed to stop sweep");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.schedulers.iter().map(SweepScheduler::name).collect()
    }

    pub fn is_running(&self) -> bool {
        self.schedulers.iter().any(SweepScheduler::is_running)
    }
}
