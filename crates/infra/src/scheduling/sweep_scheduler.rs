//! Cron-driven runner for periodic sweeps.
//!
//! Each [`SweepScheduler`] owns one job on its own `JobScheduler`. Join
//! handles are tracked, cancellation is explicit, and every asynchronous
//! step is wrapped in a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use calsync_infra::scheduling::{SchedulerResult, SweepJob, SweepScheduler, SweepSchedulerConfig};
//!
//! struct NoopSweep;
//!
//! #[async_trait]
//! impl SweepJob for NoopSweep {
//!     fn name(&self) -> &'static str {
//!         "noop"
//!     }
//!
//!     async fn run(&self) -> calsync_domain::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> SchedulerResult<()> {
//! let config = SweepSchedulerConfig::with_cron("0 */5 * * * *");
//! let mut scheduler = SweepScheduler::new(config, Arc::new(NoopSweep)).await?;
//! scheduler.start().await?;
//! // ... service runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use calsync_domain::Result;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// A periodic sweep.
#[async_trait]
pub trait SweepJob: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Configuration for a sweep scheduler.
#[derive(Debug, Clone)]
pub struct SweepSchedulerConfig {
    /// Six-field cron expression (seconds first).
    pub cron_expression: String,
    /// Timeout applied to a single run.
    pub job_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for SweepSchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 */5 * * * *".into(),
            job_timeout: Duration::from_secs(600),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl SweepSchedulerConfig {
    pub fn with_cron(cron_expression: impl Into<String>) -> Self {
        Self { cron_expression: cron_expression.into(), ..Self::default() }
    }
}

/// Sweep scheduler with explicit lifecycle management.
pub struct SweepScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    config: SweepSchedulerConfig,
    job_id: Uuid,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
    job: Arc<dyn SweepJob>,
}

impl SweepScheduler {
    /// Create a scheduler for `job`; nothing runs until it is started.
    pub async fn new(config: SweepSchedulerConfig, job: Arc<dyn SweepJob>) -> SchedulerResult<Self> {
        let raw_scheduler =
            JobScheduler::new().await.map_err(|source| SchedulerError::CreationFailed { source })?;

        let mut scheduler = Self {
            scheduler: Arc::new(RwLock::new(raw_scheduler)),
            config,
            job_id: Uuid::nil(),
            monitor_handle: None,
            cancellation: CancellationToken::new(),
            job,
        };

        scheduler.job_id = scheduler.register_job().await?;
        Ok(scheduler)
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    /// Start the scheduler, spawning the monitoring task.
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler = self.scheduler.clone();
        let start_timeout = self.config.start_timeout;
        let start_result = tokio::time::timeout(start_timeout, async move {
            let guard = scheduler.write().await;
            guard.start().await
        })
        .await
        .map_err(|source| SchedulerError::Timeout { duration: start_timeout, source })?;

        start_result.map_err(|source| SchedulerError::StartFailed { source })?;

        let cancel = self.cancellation.clone();
        let name = self.job.name();
        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            debug!(job = name, "Sweep scheduler monitor cancelled");
        });

        self.monitor_handle = Some(handle);
        info!(cron = %self.config.cron_expression, "Sweep scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        let scheduler = self.scheduler.clone();
        let stop_timeout = self.config.stop_timeout;
        let stop_result = tokio::time::timeout(stop_timeout, async move {
            let mut guard = scheduler.write().await;
            guard.shutdown().await
        })
        .await
        .map_err(|source| SchedulerError::Timeout { duration: stop_timeout, source })?;

        stop_result.map_err(|source| SchedulerError::StopFailed { source })?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??;
        }

        info!("Sweep scheduler stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true when the monitor task is active.
    pub fn is_running(&self) -> bool {
        self.monitor_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Run the job once, outside the cron schedule.
    pub async fn run_now(&self) -> Result<()> {
        run_with_timeout(self.job.clone(), self.config.job_timeout).await
    }

    async fn register_job(&mut self) -> SchedulerResult<Uuid> {
        if self.job_id != Uuid::nil() {
            return Ok(self.job_id);
        }

        let name = self.job.name();
        let job = self.job.clone();
        let job_timeout = self.config.job_timeout;

        let job_definition =
            Job::new_async(self.config.cron_expression.as_str(), move |_id, _lock| {
                let job = job.clone();
                Box::pin(async move {
                    // Failures are logged inside; the next tick retries.
                    let _ = run_with_timeout(job, job_timeout).await;
                })
            })
            .map_err(|source| SchedulerError::JobRegistrationFailed { job: name, source })?;

        let job_id = job_definition.guid();
        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job_definition)
            .await
            .map_err(|source| SchedulerError::JobRegistrationFailed { job: name, source })?;

        debug!(job = name, cron = %self.config.cron_expression, job_id = %job_id, "Registered sweep job");
        Ok(job_id)
    }
}

async fn run_with_timeout(job: Arc<dyn SweepJob>, job_timeout: Duration) -> Result<()> {
    let name = job.name();
    let started = Instant::now();

    match tokio::time::timeout(job_timeout, job.run()).await {
        Ok(Ok(())) => {
            debug!(job = name, elapsed_ms = started.elapsed().as_millis() as u64, "Sweep finished");
            Ok(())
        }
        Ok(Err(err)) => {
            error!(job = name, error = %err, "Sweep failed");
            Err(err)
        }
        Err(_) => {
            warn!(job = name, timeout_secs = job_timeout.as_secs(), "Sweep timed out");
            Err(calsync_domain::CalSyncError::Timeout(format!(
                "{name} sweep exceeded {}s",
                job_timeout.as_secs()
            )))
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(job = self.job.name(), "SweepScheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
