//! Canonical instant handling.
//!
//! Upstream sources hand us instants as Unix seconds, Unix milliseconds or
//! date strings. Everything that gets stored or compared goes through
//! [`normalize_epoch_seconds`] first so there is exactly one representation
//! downstream: integer seconds since the epoch.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Unix seconds for 2100-01-01T00:00:00Z. Integers above this are milliseconds.
pub const MILLIS_THRESHOLD_SECS: i64 = 4_102_444_800;

/// An instant as supplied by an upstream source, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInstant {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for RawInstant {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for RawInstant {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawInstant {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for RawInstant {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Integer(value.timestamp())
    }
}

pub fn normalize_epoch_seconds(raw: &RawInstant) -> AppResult<i64> {
    match raw {
        RawInstant::Integer(value) => Ok(seconds_from_integer(*value)),
        RawInstant::Float(value) => {
            if !value.is_finite() {
                return Err(AppError::InvalidTimestamp(format!(
                    "non-finite numeric instant {value}"
                )));
            }
            Ok(seconds_from_integer(value.trunc() as i64))
        }
        RawInstant::Text(value) => seconds_from_text(value),
    }
}

pub fn normalize_instant(raw: &RawInstant) -> AppResult<DateTime<Utc>> {
    let seconds = normalize_epoch_seconds(raw)?;
    instant_from_seconds(seconds)
}

/// The UTC offset an instant string was stamped with. Epoch numbers and
/// zone-less strings carry none.
pub fn stated_offset(raw: &RawInstant) -> Option<FixedOffset> {
    let RawInstant::Text(value) = raw else {
        return None;
    };
    let trimmed = value.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_rfc2822(trimmed))
        .ok()
        .map(|parsed| *parsed.offset())
}

pub fn instant_from_seconds(seconds: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| AppError::InvalidTimestamp(format!("{seconds} is out of range")))
}

fn seconds_from_integer(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD_SECS {
        value / 1000
    } else {
        value
    }
}

fn seconds_from_text(value: &str) -> AppResult<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidTimestamp("empty instant string".to_string()));
    }

    if let Ok(number) = trimmed.parse::<i64>() {
        return Ok(seconds_from_integer(number));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(parsed.timestamp());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.and_utc().timestamp());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp()));
    }

    Err(AppError::InvalidTimestamp(format!(
        "unrecognized instant `{trimmed}`"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_millis_and_iso_agree() {
        let expected = 1_700_000_000;
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::Integer(1_700_000_000)).unwrap(),
            expected
        );
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::Integer(1_700_000_000_000)).unwrap(),
            expected
        );
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::from("2023-11-14T22:13:20Z")).unwrap(),
            expected
        );
    }

    #[test]
    fn threshold_itself_is_seconds() {
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::Integer(MILLIS_THRESHOLD_SECS)).unwrap(),
            MILLIS_THRESHOLD_SECS
        );
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::Integer(MILLIS_THRESHOLD_SECS + 1)).unwrap(),
            (MILLIS_THRESHOLD_SECS + 1) / 1000
        );
    }

    #[test]
    fn numeric_strings_follow_integer_rule() {
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::from("1700000000000")).unwrap(),
            1_700_000_000
        );
    }

    #[test]
    fn plain_date_is_utc_midnight() {
        assert_eq!(
            normalize_epoch_seconds(&RawInstant::from("2023-11-14")).unwrap(),
            1_699_920_000
        );
    }

    #[test]
    fn stated_offset_only_for_zoned_strings() {
        assert_eq!(
            stated_offset(&RawInstant::from("2024-03-03T23:30:00-05:00")),
            FixedOffset::west_opt(5 * 3600)
        );
        assert_eq!(
            stated_offset(&RawInstant::from("Sun, 3 Mar 2024 23:30:00 +0100")),
            FixedOffset::east_opt(3600)
        );
        assert_eq!(stated_offset(&RawInstant::Integer(1_709_526_600)), None);
        assert_eq!(stated_offset(&RawInstant::from("2024-03-03T23:30:00")), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize_epoch_seconds(&RawInstant::from("next tuesday")).is_err());
        assert!(normalize_epoch_seconds(&RawInstant::Float(f64::NAN)).is_err());
    }
}
