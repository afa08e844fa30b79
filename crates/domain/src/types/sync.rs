//! Sync pass triggers, phases and the reports the background sweeps produce

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_enum_strings;

/// What started a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Provider notification; pulls changes since the last checkpoint.
    Webhook,
    /// User-initiated; pulls changes since the last checkpoint.
    Manual,
    /// Scheduled sweep; pulls the full lookback/lookahead window.
    Reconciliation,
}

impl_domain_enum_strings!(SyncTrigger {
    Webhook => "webhook",
    Manual => "manual",
    Reconciliation => "reconciliation",
});

/// Per-connection sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Pulling,
    Diffing,
    ConflictPending,
    Pushing,
}

impl_domain_enum_strings!(SyncPhase {
    Idle => "idle",
    Pulling => "pulling",
    Diffing => "diffing",
    ConflictPending => "conflict_pending",
    Pushing => "pushing",
});

/// Why a pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Quarantined,
    SyncDisabled,
}

/// Outcome of one sync pass for one connection.
///
/// `push_failures > 0` is the partial-sync-failure outcome: the affected
/// events stay queued for the next pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub connection_id: String,
    pub trigger: SyncTrigger,
    /// Events whose mirror or provider copy changed during this pass.
    pub events_synced: u32,
    /// Conflict resolutions that reached the provider during this pass.
    pub conflicts_resolved: u32,
    pub conflicts_raised: u32,
    pub open_conflicts: u32,
    pub pushed: u32,
    pub push_failures: u32,
    pub skipped: Option<SkipReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncSummary {
    /// Empty summary for a pass starting at `now`.
    pub fn new(connection_id: impl Into<String>, trigger: SyncTrigger, now: DateTime<Utc>) -> Self {
        Self {
            connection_id: connection_id.into(),
            trigger,
            events_synced: 0,
            conflicts_resolved: 0,
            conflicts_raised: 0,
            open_conflicts: 0,
            pushed: 0,
            push_failures: 0,
            skipped: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub const fn is_partial(&self) -> bool {
        self.push_failures > 0
    }
}

/// An item a sweep could not process, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub error: String,
}

impl FailedItem {
    /// Record a failure for `id`.
    pub fn new(id: impl Into<String>, error: impl ToString) -> Self {
        Self { id: id.into(), error: error.to_string() }
    }
}

/// Result of a token refresh sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSweepReport {
    pub checked: u32,
    pub refreshed: Vec<String>,
    pub quarantined: Vec<String>,
    pub failed: Vec<FailedItem>,
}

/// Result of a manual token refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    AlreadyFresh,
    Refreshed,
}

/// Result of a webhook renewal or repair sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalReport {
    pub renewed: Vec<String>,
    pub created: Vec<String>,
    pub failed: Vec<FailedItem>,
}

/// Result of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub summaries: Vec<SyncSummary>,
    pub failed: Vec<FailedItem>,
}

/// Result of resolving several conflicts independently
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResolution {
    pub resolved: Vec<String>,
    pub failed: Vec<FailedItem>,
}
