//! Domain types and models

pub mod availability;
pub mod conflict;
pub mod connection;
pub mod event;
pub mod sync;
pub mod webhook;

pub use availability::{AvailabilitySource, BusyInterval, SlotAvailability, SlotCheck};
pub use conflict::{ConflictType, EventSnapshot, Resolution, SyncConflict};
pub use connection::{
    CalendarConnection, ConnectionHealth, Credential, Provider, SyncedCalendar, TokenGrant,
    WebhookHealth,
};
pub use event::{CalendarEvent, EventContent, RemoteEvent};
pub use sync::{
    BulkResolution, FailedItem, ReconciliationReport, RefreshOutcome, RenewalReport, SkipReason,
    SyncPhase, SyncSummary, SyncTrigger, TokenSweepReport,
};
pub use webhook::{WebhookChannel, WebhookSubscription};

/// Generate a new time-ordered identifier.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
