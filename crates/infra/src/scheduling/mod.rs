//! Scheduling infrastructure for background work
//!
//! - `sweep_scheduler`: cron-driven runner for one periodic job
//! - `background`: the token refresh, webhook maintenance and reconciliation
//!   sweeps
//! - `dispatcher`: queue that turns webhook notifications into sync passes
//!
//! All schedulers have explicit start/stop, tracked join handles,
//! cancellation tokens and timeouts around every async step.

pub mod background;
pub mod dispatcher;
pub mod error;
pub mod sweep_scheduler;

pub use background::{
    BackgroundTasks, ReconciliationSweep, TokenRefreshSweep, WebhookMaintenanceSweep,
};
pub use dispatcher::{DispatcherWorker, EnqueueOutcome, SyncDispatcher, SyncTarget};
pub use error::{SchedulerError, SchedulerResult};
pub use sweep_scheduler::{SweepJob, SweepScheduler, SweepSchedulerConfig};
