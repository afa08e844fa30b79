//! Scheduler error types

use std::time::Duration;

use calsync_domain::CalSyncError;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

use crate::errors::InfraError;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    #[error("Failed to create scheduler: {source}")]
    CreationFailed { source: JobSchedulerError },

    #[error("Failed to start scheduler: {source}")]
    StartFailed { source: JobSchedulerError },

    #[error("Failed to stop scheduler: {source}")]
    StopFailed { source: JobSchedulerError },

    #[error("Failed to register job '{job}': {source}")]
    JobRegistrationFailed { job: &'static str, source: JobSchedulerError },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration, source: tokio::time::error::Elapsed },

    #[error("Task join failed: {source}")]
    TaskJoinFailed {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let domain_err = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                CalSyncError::InvalidInput(err.to_string())
            }
            SchedulerError::Timeout { .. } => CalSyncError::Timeout(err.to_string()),
            _ => CalSyncError::Internal(err.to_string()),
        };
        InfraError(domain_err)
    }
}

impl From<SchedulerError> for CalSyncError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_misuse_maps_to_invalid_input() {
        let err: CalSyncError = SchedulerError::AlreadyRunning.into();
        assert!(matches!(err, CalSyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn timeouts_map_to_the_timeout_variant() {
        let source = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err: CalSyncError =
            SchedulerError::Timeout { duration: Duration::from_millis(1), source }.into();
        assert!(matches!(err, CalSyncError::Timeout(_)));
    }
}
