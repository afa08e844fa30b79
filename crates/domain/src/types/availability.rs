//! Availability query results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an availability answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilitySource {
    /// At least one availability-checked calendar was consulted.
    Calendars,
    /// The user has no availability-checked calendars.
    DefaultSchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCheck {
    pub available: bool,
    pub source: AvailabilitySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub time: DateTime<Utc>,
    pub available: bool,
}

/// A merged busy interval, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
