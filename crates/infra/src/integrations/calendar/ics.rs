//! iCalendar (RFC 5545) mapping for CalDAV resources
//!
//! Only the fields the sync engine tracks are read and written: UID,
//! SUMMARY, DTSTART/DTEND, LOCATION, ATTENDEE, STATUS and LAST-MODIFIED.

use calsync_domain::{CalSyncError, EventContent, RemoteEvent, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use icalendar::parser::{read_calendar, unfold, Component as ParsedComponent};
use icalendar::{Calendar, CalendarDateTime, Component, DatePerhapsTime, EventLike, Property};

const ICS_UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// The VEVENT of one calendar resource, keyed by its UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub uid: String,
    pub event: RemoteEvent,
}

/// Parse the first VEVENT in `data`.
///
/// Recurring masters come back as their first occurrence; expanding
/// recurrences is left to the server's calendar-query.
pub fn parse_event(data: &str) -> Result<ParsedEvent> {
    let unfolded = unfold(data);
    let calendar = read_calendar(&unfolded)
        .map_err(|e| CalSyncError::InvalidInput(format!("invalid iCalendar data: {e}")))?;
    let vevent = calendar
        .components
        .iter()
        .find(|c| c.name == "VEVENT")
        .ok_or_else(|| CalSyncError::InvalidInput("iCalendar data has no VEVENT".into()))?;

    let uid = prop_text(vevent, "UID")
        .ok_or_else(|| CalSyncError::InvalidInput("VEVENT has no UID".into()))?;
    let last_modified = prop_text(vevent, "LAST-MODIFIED")
        .or_else(|| prop_text(vevent, "DTSTAMP"))
        .and_then(|raw| parse_utc_stamp(&raw))
        .unwrap_or_else(Utc::now);

    if prop_text(vevent, "STATUS").is_some_and(|s| s.eq_ignore_ascii_case("CANCELLED")) {
        return Ok(ParsedEvent { event: RemoteEvent::cancelled(uid.clone(), last_modified), uid });
    }

    let start = vevent
        .find_prop("DTSTART")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .ok_or_else(|| CalSyncError::InvalidInput(format!("VEVENT {uid} has no DTSTART")))?;
    let start = resolve(start)?;
    let end = match vevent.find_prop("DTEND").and_then(|p| DatePerhapsTime::try_from(p).ok()) {
        Some(end) => resolve(end)?,
        // RFC 5545: a missing DTEND on a timed event means zero duration; treat
        // it as one minute so the interval stays non-empty.
        None => start + chrono::Duration::minutes(1),
    };

    let mut content =
        EventContent::new(prop_text(vevent, "SUMMARY").unwrap_or_default(), start, end)?;
    if let Some(location) = prop_text(vevent, "LOCATION") {
        content = content.with_location(location);
    }
    let attendees: Vec<String> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .map(|p| {
            let value = p.val.as_ref();
            value
                .strip_prefix("mailto:")
                .or_else(|| value.strip_prefix("MAILTO:"))
                .unwrap_or(value)
                .to_string()
        })
        .collect();
    content = content.with_attendees(attendees);

    Ok(ParsedEvent { event: RemoteEvent::live(uid.clone(), content, last_modified), uid })
}

/// Render `content` as a single-event calendar object.
pub fn generate_event(uid: &str, content: &EventContent, now: DateTime<Utc>) -> String {
    let mut event = icalendar::Event::new();
    event
        .uid(uid)
        .summary(&content.summary)
        .starts(content.start_time)
        .ends(content.end_time)
        .add_property("DTSTAMP", now.format(ICS_UTC_FORMAT).to_string())
        .add_property("LAST-MODIFIED", now.format(ICS_UTC_FORMAT).to_string());
    if let Some(location) = &content.location {
        event.location(location);
    }
    for attendee in &content.attendees {
        event.append_multi_property(Property::new("ATTENDEE", format!("mailto:{attendee}")));
    }

    let mut calendar = Calendar::new();
    calendar.push(event.done());
    calendar.done().to_string()
}

fn prop_text(component: &ParsedComponent<'_>, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|p| p.val.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_utc_stamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// All-day dates start at UTC midnight; floating times are read as UTC.
fn resolve(value: DatePerhapsTime) -> Result<DateTime<Utc>> {
    match value {
        DatePerhapsTime::Date(date) => Ok(midnight(date)),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(instant)) => Ok(instant),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => Ok(naive.and_utc()),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            let tz: chrono_tz::Tz = tzid.parse().map_err(|_| {
                CalSyncError::InvalidInput(format!("unknown TZID '{tzid}'"))
            })?;
            tz.from_local_datetime(&date_time)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    CalSyncError::InvalidInput(format!("nonexistent local time {date_time} in {tzid}"))
                })
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Example//EN\r\n\
BEGIN:VEVENT\r\n\
UID:standup-1@example.com\r\n\
DTSTAMP:20250301T080000Z\r\n\
LAST-MODIFIED:20250228T120000Z\r\n\
DTSTART;TZID=America/New_York:20250303T090000\r\n\
DTEND;TZID=America/New_York:20250303T091500\r\n\
SUMMARY:Standup\r\n\
LOCATION:Zoom\r\n\
ATTENDEE;CN=Ana:mailto:Ana@example.com\r\n\
ATTENDEE:mailto:bo@example.com\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn parses_zoned_event() {
        let parsed = parse_event(SAMPLE).unwrap();
        assert_eq!(parsed.uid, "standup-1@example.com");
        let content = parsed.event.content.unwrap();
        assert_eq!(content.summary, "Standup");
        assert_eq!(content.start_time, Utc.with_ymd_and_hms(2025, 3, 3, 14, 0, 0).unwrap());
        assert_eq!(content.end_time, Utc.with_ymd_and_hms(2025, 3, 3, 14, 15, 0).unwrap());
        assert_eq!(content.location.as_deref(), Some("Zoom"));
        assert_eq!(content.attendees, vec!["ana@example.com", "bo@example.com"]);
        assert_eq!(parsed.event.last_modified, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn cancelled_status_is_a_deletion() {
        let data = SAMPLE.replace("SUMMARY:Standup", "SUMMARY:Standup\r\nSTATUS:CANCELLED");
        let parsed = parse_event(&data).unwrap();
        assert!(parsed.event.is_deleted());
    }

    #[test]
    fn all_day_events_start_at_utc_midnight() {
        let data = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:day\r\nDTSTART;VALUE=DATE:20250310\r\n\
DTEND;VALUE=DATE:20250311\r\nSUMMARY:Offsite\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let content = parse_event(data).unwrap().event.content.unwrap();
        assert_eq!(content.start_time, Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(content.end_time, Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn generated_objects_parse_back() {
        let content = EventContent::new(
            "Review",
            Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 4, 11, 0, 0).unwrap(),
        )
        .unwrap()
        .with_location("Room 2")
        .with_attendees(["lee@example.com"]);
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let ics = generate_event("review-1", &content, now);
        assert!(ics.contains("ATTENDEE:mailto:lee@example.com"));

        let parsed = parse_event(&ics).unwrap();
        assert_eq!(parsed.uid, "review-1");
        assert!(parsed.event.content.unwrap().same_as(&content));
        assert_eq!(parsed.event.last_modified, now);
    }

    #[test]
    fn missing_vevent_is_rejected() {
        let err = parse_event("BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n").unwrap_err();
        assert!(matches!(err, CalSyncError::InvalidInput(_)));
    }
}
