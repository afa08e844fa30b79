//! Availability across a user's calendars

mod schedule;
mod service;

pub use schedule::WorkingSchedule;
pub use service::AvailabilityAggregator;
