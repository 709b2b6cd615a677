//! Parsing of GTFS `HH:MM:SS` service-day times.
//!
//! GTFS lets the hour run past 23 for trips that end after midnight. Only hour
//! `24` is accepted here: it maps to `00` on the following calendar day. Larger
//! hours are rejected rather than guessed at.

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("expected HH:MM:SS, got {0:?}")]
    Format(String),
    #[error("hour {0} is past the end of the service day")]
    HourOutOfRange(u32),
    #[error("invalid wall-clock time {0:?}")]
    InvalidTime(String),
}

/// A service-day time split into a calendar day offset and a wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTime {
    pub day_offset: u64,
    pub time: NaiveTime,
    /// The input with a leading `24` hour rewritten to `00`.
    pub normalized: String,
}

impl ServiceTime {
    /// Pins this time to an absolute instant, counting from `service_date`.
    pub fn on(&self, service_date: NaiveDate) -> Option<NaiveDateTime> {
        service_date
            .checked_add_days(Days::new(self.day_offset))
            .map(|date| date.and_time(self.time))
    }
}

pub fn parse_gtfs_time(raw: &str) -> Result<ServiceTime, TimeParseError> {
    let trimmed = raw.trim();
    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() != 3 {
        return Err(TimeParseError::Format(raw.to_string()));
    }

    let hours = digits(parts[0], 1..=2).ok_or_else(|| TimeParseError::Format(raw.to_string()))?;
    let minutes = digits(parts[1], 2..=2).ok_or_else(|| TimeParseError::Format(raw.to_string()))?;
    let seconds = digits(parts[2], 2..=2).ok_or_else(|| TimeParseError::Format(raw.to_string()))?;

    let (day_offset, hours, normalized) = match hours {
        24 => (1, 0, format!("00:{}:{}", parts[1], parts[2])),
        h if h > 24 => return Err(TimeParseError::HourOutOfRange(h)),
        h => (0, h, trimmed.to_string()),
    };

    let time = NaiveTime::from_hms_opt(hours, minutes, seconds)
        .ok_or_else(|| TimeParseError::InvalidTime(raw.to_string()))?;

    Ok(ServiceTime {
        day_offset,
        time,
        normalized,
    })
}

fn digits(field: &str, len: std::ops::RangeInclusive<usize>) -> Option<u32> {
    if !len.contains(&field.len()) || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_regular_time() {
        let parsed = parse_gtfs_time("10:05:30").unwrap();
        assert_eq!(parsed.day_offset, 0);
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(10, 5, 30).unwrap());
        assert_eq!(parsed.normalized, "10:05:30");
    }

    #[test]
    fn test_parse_single_digit_hour() {
        let parsed = parse_gtfs_time(" 7:00:00").unwrap();
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(parsed.normalized, "7:00:00");
    }

    #[test]
    fn test_hour_24_rolls_to_next_day() {
        let parsed = parse_gtfs_time("24:10:00").unwrap();
        assert_eq!(parsed.day_offset, 1);
        assert_eq!(parsed.normalized, "00:10:00");
        assert_eq!(
            parsed.on(date(2025, 9, 29)),
            Some(date(2025, 9, 30).and_hms_opt(0, 10, 0).unwrap())
        );
    }

    #[test]
    fn test_midnight_stays_on_service_date() {
        let parsed = parse_gtfs_time("00:10:00").unwrap();
        assert_eq!(parsed.day_offset, 0);
        assert_eq!(
            parsed.on(date(2025, 9, 29)),
            Some(date(2025, 9, 29).and_hms_opt(0, 10, 0).unwrap())
        );
    }

    #[test]
    fn test_hour_past_24_is_rejected() {
        assert_eq!(
            parse_gtfs_time("25:10:00"),
            Err(TimeParseError::HourOutOfRange(25))
        );
    }

    #[test]
    fn test_malformed_strings_are_rejected() {
        for raw in ["", "10:00", "10:00:00:00", "ab:cd:ef", "10:5:00", "-1:00:00", "100:00:00"] {
            assert!(
                matches!(parse_gtfs_time(raw), Err(TimeParseError::Format(_))),
                "{raw:?} should be a format error"
            );
        }
    }

    #[test]
    fn test_out_of_range_minutes_are_invalid() {
        assert!(matches!(
            parse_gtfs_time("10:60:00"),
            Err(TimeParseError::InvalidTime(_))
        ));
    }
}
