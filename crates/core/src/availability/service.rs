//! Cross-calendar availability

use std::sync::Arc;

use calsync_domain::{
    AvailabilitySource, BusyInterval, CalSyncError, CalendarEvent, DefaultSchedule, Result,
    SlotAvailability, SlotCheck, SyncedCalendar,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, instrument};

use super::schedule::WorkingSchedule;
use crate::connection::ports::{CalendarRepository, ConnectionRepository};
use crate::sync::ports::EventRepository;

/// Answers "is this user free" over every calendar they asked to have
/// checked. A slot is busy if any included calendar has a live event
/// overlapping it. Users with no included calendars fall back to the
/// default working schedule.
pub struct AvailabilityAggregator {
    connections: Arc<dyn ConnectionRepository>,
    calendars: Arc<dyn CalendarRepository>,
    events: Arc<dyn EventRepository>,
    schedule: WorkingSchedule,
}

impl AvailabilityAggregator {
    /// Create an aggregator using `schedule` when no calendar can answer.
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        calendars: Arc<dyn CalendarRepository>,
        events: Arc<dyn EventRepository>,
        default_schedule: &DefaultSchedule,
    ) -> Result<Self> {
        Ok(Self {
            connections,
            calendars,
            events,
            schedule: WorkingSchedule::from_config(default_schedule)?,
        })
    }

    pub async fn is_slot_available(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_slot(user_id, start, end).await.map(|check| check.available)
    }

    #[instrument(skip(self))]
    pub async fn check_slot(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SlotCheck> {
        validate_range(start, end)?;
        let included = self.included_calendars(user_id).await?;
        self.evaluate(&included, start, end).await
    }

    /// Check each candidate start time (wall-clock, in the default schedule's
    /// timezone) on `day` for a slot of `slot_length`. Candidates that do not
    /// exist on that day because of a DST jump are left out.
    #[instrument(skip(self, candidate_times))]
    pub async fn list_free_slots(
        &self,
        user_id: &str,
        day: NaiveDate,
        candidate_times: &[NaiveTime],
        slot_length: Duration,
    ) -> Result<Vec<SlotAvailability>> {
        if slot_length <= Duration::zero() {
            return Err(CalSyncError::InvalidInput("slot length must be positive".into()));
        }
        let included = self.included_calendars(user_id).await?;
        let mut slots = Vec::with_capacity(candidate_times.len());
        for time in candidate_times {
            let Some(start) = self.schedule.localize(day, *time) else {
                debug!(%day, %time, tz = %self.schedule.timezone(), "Skipping nonexistent local time");
                continue;
            };
            let check = self.evaluate(&included, start, start + slot_length).await?;
            slots.push(SlotAvailability { time: start, available: check.available });
        }
        Ok(slots)
    }

    /// Busy time in `[start, end)`, merged across included calendars.
    #[instrument(skip(self))]
    pub async fn busy_intervals(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>> {
        validate_range(start, end)?;
        let included = self.included_calendars(user_id).await?;
        if included.is_empty() {
            return Ok(self.schedule.off_hours(start, end));
        }
        let mut intervals: Vec<BusyInterval> = self
            .overlapping_events(&included, start, end)
            .await?
            .into_iter()
            .map(|e| BusyInterval {
                start: e.content.start_time.max(start),
                end: e.content.end_time.min(end),
            })
            .collect();
        Ok(merge(&mut intervals))
    }

    async fn evaluate(
        &self,
        included: &[SyncedCalendar],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SlotCheck> {
        if included.is_empty() {
            return Ok(SlotCheck {
                available: self.schedule.covers(start, end),
                source: AvailabilitySource::DefaultSchedule,
            });
        }
        for calendar in included {
            let busy = self
                .events
                .list_overlapping(&calendar.connection_id, &calendar.calendar_id, start, end)
                .await?
                .iter()
                .any(|e| e.is_live() && e.content.overlaps(start, end));
            if busy {
                return Ok(SlotCheck { available: false, source: AvailabilitySource::Calendars });
            }
        }
        Ok(SlotCheck { available: true, source: AvailabilitySource::Calendars })
    }

    async fn overlapping_events(
        &self,
        included: &[SyncedCalendar],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let mut events = Vec::new();
        for calendar in included {
            events.extend(
                self.events
                    .list_overlapping(&calendar.connection_id, &calendar.calendar_id, start, end)
                    .await?
                    .into_iter()
                    .filter(|e| e.is_live() && e.content.overlaps(start, end)),
            );
        }
        Ok(events)
    }

    /// Calendars on active, sync-enabled connections that opted into
    /// availability checks.
    async fn included_calendars(&self, user_id: &str) -> Result<Vec<SyncedCalendar>> {
        let mut included = Vec::new();
        for connection in self.connections.list_by_user(user_id).await? {
            if !connection.is_syncable() {
                continue;
            }
            included.extend(
                self.calendars
                    .list_for_connection(&connection.id)
                    .await?
                    .into_iter()
                    .filter(|c| c.sync_enabled && c.check_availability),
            );
        }
        Ok(included)
    }
}

fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(CalSyncError::InvalidInput("end must be after start".into()));
    }
    Ok(())
}

fn merge(intervals: &mut [BusyInterval]) -> Vec<BusyInterval> {
    intervals.sort_by_key(|i| i.start);
    let mut merged: Vec<BusyInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals.iter() {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => last.end = last.end.max(interval.end),
            _ => merged.push(*interval),
        }
    }
    merged
}
