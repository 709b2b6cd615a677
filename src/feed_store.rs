//! In-memory GTFS tables loaded from the feed archive.
//!
//! The four tables needed to answer a next-arrival query are parsed once and
//! indexed at load time (`stop_code -> stop_id`, `trip_id -> Trip`,
//! `stop_id -> [StopTime]`). A loaded store is never mutated; a refresh builds
//! a new one.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{Result, ScheduleError};
use crate::models::{CalendarEntry, Stop, StopId, StopTime, Trip};

pub const STOPS_TABLE: &str = "stops.txt";
pub const CALENDAR_TABLE: &str = "calendar.txt";
pub const STOP_TIMES_TABLE: &str = "stop_times.txt";
pub const TRIPS_TABLE: &str = "trips.txt";

#[derive(Debug, Deserialize)]
struct CalendarRecord {
    service_id: String,
    monday: u8,
    tuesday: u8,
    wednesday: u8,
    thursday: u8,
    friday: u8,
    saturday: u8,
    sunday: u8,
    start_date: String,
    end_date: String,
}

impl TryFrom<CalendarRecord> for CalendarEntry {
    type Error = ScheduleError;

    fn try_from(record: CalendarRecord) -> Result<Self> {
        let date = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y%m%d").map_err(|e| {
                ScheduleError::parse(
                    CALENDAR_TABLE,
                    format!("service {}: bad date {:?}: {}", record.service_id, raw, e),
                )
            })
        };
        let start_date = date(&record.start_date)?;
        let end_date = date(&record.end_date)?;

        Ok(CalendarEntry {
            monday: record.monday == 1,
            tuesday: record.tuesday == 1,
            wednesday: record.wednesday == 1,
            thursday: record.thursday == 1,
            friday: record.friday == 1,
            saturday: record.saturday == 1,
            sunday: record.sunday == 1,
            start_date,
            end_date,
            service_id: record.service_id,
        })
    }
}

#[derive(Debug, Default)]
pub struct FeedStore {
    stops: Vec<Stop>,
    stop_code_index: HashMap<u32, StopId>,
    calendar: Vec<CalendarEntry>,
    trips: HashMap<String, Trip>,
    stop_times: HashMap<StopId, Vec<StopTime>>,
}

impl FeedStore {
    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ScheduleError::io(path, e))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)
            .map_err(|e| ScheduleError::parse("archive", format!("failed to open GTFS zip: {}", e)))?;

        let stops: Vec<Stop> = read_table(&mut archive, STOPS_TABLE)?;
        let calendar = read_table::<CalendarRecord, _>(&mut archive, CALENDAR_TABLE)?
            .into_iter()
            .map(CalendarEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        let trips: Vec<Trip> = read_table(&mut archive, TRIPS_TABLE)?;
        let stop_times: Vec<StopTime> = read_table(&mut archive, STOP_TIMES_TABLE)?;

        let store = Self::from_tables(stops, calendar, trips, stop_times);
        info!(
            stops = store.stops.len(),
            calendar_entries = store.calendar.len(),
            trips = store.trips.len(),
            stop_times = store.stop_times.values().map(Vec::len).sum::<usize>(),
            "Feed loaded"
        );
        Ok(store)
    }

    /// Builds the lookup indexes. Rows keep their table order.
    pub fn from_tables(
        stops: Vec<Stop>,
        calendar: Vec<CalendarEntry>,
        trips: Vec<Trip>,
        stop_times: Vec<StopTime>,
    ) -> Self {
        let mut stop_code_index = HashMap::new();
        for stop in &stops {
            let Some(raw_code) = stop.stop_code.as_deref().map(str::trim) else {
                continue;
            };
            if raw_code.is_empty() {
                continue;
            }
            // Parsed as a number, so "0123" and "123" name the same stop.
            let Ok(code) = raw_code.parse::<u32>() else {
                debug!(stop_id = %stop.stop_id, stop_code = raw_code, "Skipping non-numeric stop code");
                continue;
            };
            match stop_code_index.entry(code) {
                Entry::Vacant(slot) => {
                    slot.insert(stop.stop_id.clone());
                }
                Entry::Occupied(existing) => {
                    warn!(
                        stop_code = code,
                        kept = %existing.get(),
                        ignored = %stop.stop_id,
                        "Duplicate stop code in stops table"
                    );
                }
            }
        }

        let mut trips_map = HashMap::with_capacity(trips.len());
        for trip in trips {
            match trips_map.entry(trip.trip_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(trip);
                }
                Entry::Occupied(_) => {
                    warn!(trip_id = %trip.trip_id, "Duplicate trip id in trips table");
                }
            }
        }

        let mut stop_times_map: HashMap<StopId, Vec<StopTime>> = HashMap::new();
        for stop_time in stop_times {
            stop_times_map
                .entry(stop_time.stop_id.clone())
                .or_default()
                .push(stop_time);
        }

        Self {
            stops,
            stop_code_index,
            calendar,
            trips: trips_map,
            stop_times: stop_times_map,
        }
    }

    pub fn stop_id_for_code(&self, stop_code: u32) -> Option<&str> {
        self.stop_code_index.get(&stop_code).map(String::as_str)
    }

    /// First calendar entry, in table order, active on `date`.
    pub fn service_id_for_date(&self, date: NaiveDate) -> Result<&str> {
        self.calendar
            .iter()
            .find(|entry| entry.is_active_on(date))
            .map(|entry| entry.service_id.as_str())
            .ok_or(ScheduleError::NoService { date })
    }

    pub fn stop_times_for_stop(&self, stop_id: &str) -> &[StopTime] {
        self.stop_times
            .get(stop_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.trips.get(trip_id)
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn calendar(&self) -> &[CalendarEntry] {
        &self.calendar
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

fn read_table<T, R>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: Read + Seek,
{
    let file = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => ScheduleError::parse(name, "missing from archive"),
        other => ScheduleError::parse(name, other),
    })?;

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    rdr.deserialize()
        .collect::<std::result::Result<Vec<T>, csv::Error>>()
        .map_err(|e| ScheduleError::parse(name, e))
}
