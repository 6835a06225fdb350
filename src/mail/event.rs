use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::time::{self, RawInstant};

use super::address::extract_address;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Offset the start was stated in; `None` for epoch and whole-day starts.
    #[serde(skip)]
    pub offset: Option<FixedOffset>,
    pub all_day: bool,
    pub attendees: Vec<String>,
}

impl CalendarEvent {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCalendarEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "title")]
    pub summary: Option<String>,
    #[serde(default)]
    pub start: Option<RawEventTime>,
    #[serde(default)]
    pub end: Option<RawEventTime>,
    #[serde(default)]
    pub attendees: Vec<RawAttendee>,
}

/// `{ "dateTime": ... }` for timed events, `{ "date": "YYYY-MM-DD" }` for
/// whole-day events, or a bare instant.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEventTime {
    Structured {
        #[serde(default, rename = "dateTime")]
        date_time: Option<RawInstant>,
        #[serde(default)]
        date: Option<String>,
    },
    Instant(RawInstant),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAttendee {
    Address(String),
    Entry {
        #[serde(default)]
        email: Option<String>,
    },
}

struct ResolvedTime {
    instant: DateTime<Utc>,
    offset: Option<FixedOffset>,
    whole_day: bool,
}

impl RawEventTime {
    fn resolve<Tz: TimeZone>(&self, tz: &Tz) -> AppResult<ResolvedTime> {
        match self {
            Self::Structured {
                date_time: Some(instant),
                ..
            }
            | Self::Instant(instant) => Ok(ResolvedTime {
                instant: time::normalize_instant(instant)?,
                offset: time::stated_offset(instant),
                whole_day: false,
            }),
            Self::Structured {
                date_time: None,
                date: Some(date),
            } => Ok(ResolvedTime {
                instant: local_midnight(date, tz)?,
                offset: None,
                whole_day: true,
            }),
            Self::Structured {
                date_time: None,
                date: None,
            } => Err(AppError::InvalidTimestamp(
                "event time has neither dateTime nor date".to_string(),
            )),
        }
    }
}

/// Whole-day dates mean midnight in the given zone, not UTC midnight.
fn local_midnight<Tz: TimeZone>(date: &str, tz: &Tz) -> AppResult<DateTime<Utc>> {
    let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|err| AppError::InvalidTimestamp(format!("bad event date `{date}`: {err}")))?;
    let midnight = parsed
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::InvalidTimestamp(format!("bad event date `{date}`")))?;

    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| AppError::InvalidTimestamp(format!("no local midnight on {date}")))
}

impl RawCalendarEvent {
    pub fn resolve<Tz: TimeZone>(self, tz: &Tz) -> AppResult<CalendarEvent> {
        let id = self
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::MalformedMessage("calendar event has no id".to_string()))?;

        let start = self
            .start
            .ok_or_else(|| AppError::MalformedMessage(format!("event {id} has no start")))?
            .resolve(tz)
            .map_err(|err| AppError::MalformedMessage(format!("event {id}: {err}")))?;

        let end = match self.end {
            Some(end) => end
                .resolve(tz)
                .map_err(|err| AppError::MalformedMessage(format!("event {id}: {err}")))?
                .instant,
            None if start.whole_day => start.instant + chrono::Duration::days(1),
            None => start.instant,
        };

        let attendees = self
            .attendees
            .iter()
            .filter_map(|attendee| match attendee {
                RawAttendee::Address(value) => extract_address(value),
                RawAttendee::Entry { email } => email.as_deref().and_then(extract_address),
            })
            .collect();

        Ok(CalendarEvent {
            id,
            title: self.summary,
            start: start.instant,
            end: end.max(start.instant),
            offset: start.offset,
            all_day: start.whole_day,
            attendees,
        })
    }
}

/// Resolves a fetched batch against the given zone, dropping malformed
/// events. Returns the events and how many were dropped.
pub fn ingest_events<Tz: TimeZone>(raw: Vec<RawCalendarEvent>, tz: &Tz) -> (Vec<CalendarEvent>, usize) {
    let mut events = Vec::with_capacity(raw.len());
    let mut malformed = 0;

    for record in raw {
        match record.resolve(tz) {
            Ok(event) => events.push(event),
            Err(err) => {
                malformed += 1;
                warn!(error = %err, "skipping malformed calendar event");
            }
        }
    }

    (events, malformed)
}
