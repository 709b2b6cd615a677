// GTFS records consumed from the static feed, and the arrival rows derived from them.
// Only the columns needed to answer "next bus at stop X" are kept.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

pub type StopId = String;
pub type ServiceId = String;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: StopId,
    #[serde(default)]
    pub stop_code: Option<String>,
    #[serde(default)]
    pub stop_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub service_id: ServiceId,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl CalendarEntry {
    pub fn runs_on(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    /// True when `date` falls inside `[start_date, end_date]` on a flagged weekday.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date && self.runs_on(date.weekday())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: ServiceId,
    #[serde(default)]
    pub trip_headsign: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: StopId,
    pub arrival_time: String,
    #[serde(default)]
    pub departure_time: String,
    pub stop_sequence: u32,
}

/// A stop time joined with its trip, with the arrival pinned to an absolute instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArrival {
    pub trip_id: String,
    pub route_id: String,
    pub trip_headsign: Option<String>,
    /// Feed string with a leading `24` hour rewritten to `00`.
    pub arrival_time: String,
    pub arrival_datetime: NaiveDateTime,
}
