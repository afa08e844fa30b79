//! Static working hours used when no calendar can be consulted

use calsync_domain::{BusyInterval, CalSyncError, DefaultSchedule, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// A [`DefaultSchedule`] with its timezone resolved.
#[derive(Debug, Clone)]
pub struct WorkingSchedule {
    tz: Tz,
    working_days: Vec<Weekday>,
    start_hour: u32,
    end_hour: u32,
}

impl WorkingSchedule {
    pub fn from_config(schedule: &DefaultSchedule) -> Result<Self> {
        let tz: Tz = schedule.timezone.parse().map_err(|_| {
            CalSyncError::Config(format!("unknown timezone '{}'", schedule.timezone))
        })?;
        if schedule.start_hour >= schedule.end_hour || schedule.end_hour > 24 {
            return Err(CalSyncError::Config(format!(
                "invalid working hours {}..{}",
                schedule.start_hour, schedule.end_hour
            )));
        }
        Ok(Self {
            tz,
            working_days: schedule.working_days.clone(),
            start_hour: schedule.start_hour,
            end_hour: schedule.end_hour,
        })
    }

    pub const fn timezone(&self) -> Tz {
        self.tz
    }

    /// Resolve a wall-clock time in the schedule's timezone. Times that fall
    /// in a DST gap do not exist and yield `None`.
    pub fn localize(&self, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&day.and_time(time))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Working window of a local day, as naive local times.
    fn window(&self, day: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if !self.working_days.contains(&day.weekday()) {
            return None;
        }
        let midnight = day.and_time(NaiveTime::MIN);
        Some((
            midnight + Duration::hours(i64::from(self.start_hour)),
            midnight + Duration::hours(i64::from(self.end_hour)),
        ))
    }

    /// True when `[start, end)` lies inside one working window.
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let local_start = start.with_timezone(&self.tz).naive_local();
        let local_end = end.with_timezone(&self.tz).naive_local();
        self.window(local_start.date())
            .is_some_and(|(open, close)| local_start >= open && local_end <= close)
    }

    /// Non-working spans inside `[start, end)`.
    pub fn off_hours(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BusyInterval> {
        let mut busy = Vec::new();
        let mut cursor = start;
        let mut day = start.with_timezone(&self.tz).date_naive();
        let last_day = end.with_timezone(&self.tz).date_naive();

        while day <= last_day && cursor < end {
            if let Some((open, close)) = self.window(day) {
                let open = self.to_utc(open).max(cursor);
                let close = self.to_utc(close).min(end);
                if open < close {
                    if cursor < open {
                        busy.push(BusyInterval { start: cursor, end: open });
                    }
                    cursor = close;
                }
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        if cursor < end {
            busy.push(BusyInterval { start: cursor, end });
        }
        busy
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map_or_else(|| Utc.from_utc_datetime(&local), |t| t.with_timezone(&Utc))
    }
}
