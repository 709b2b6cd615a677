//! Fixture feeds and fetcher doubles shared by the unit tests.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::error::{Result, ScheduleError};
use crate::feed_cache::FeedFetcher;
use crate::feed_store::{
    CALENDAR_TABLE, FeedStore, STOP_TIMES_TABLE, STOPS_TABLE, TRIPS_TABLE,
};

pub const STOPS: &str = "stop_id,stop_code,stop_name\n1,123,Test Stop 1\n2,456,Test Stop 2\n";
pub const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                            1,1,1,1,1,1,0,0,20250101,20251231\n";
pub const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                              1,10:00:00,10:00:30,1,1\n\
                              1,10:05:00,10:05:30,2,2\n";
pub const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign\n101,1,1,To Downtown\n";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, s).unwrap()
}

pub fn zip_bytes(tables: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in tables {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn scenario_zip() -> Vec<u8> {
    zip_bytes(&[
        (STOPS_TABLE, STOPS),
        (CALENDAR_TABLE, CALENDAR),
        (STOP_TIMES_TABLE, STOP_TIMES),
        (TRIPS_TABLE, TRIPS),
    ])
}

/// Scenario feed with the stop_times table swapped out.
pub fn scenario_zip_with_stop_times(stop_times: &str) -> Vec<u8> {
    zip_bytes(&[
        (STOPS_TABLE, STOPS),
        (CALENDAR_TABLE, CALENDAR),
        (STOP_TIMES_TABLE, stop_times),
        (TRIPS_TABLE, TRIPS),
    ])
}

pub fn scenario_store() -> FeedStore {
    FeedStore::from_reader(Cursor::new(scenario_zip())).unwrap()
}

pub fn write_feed(dir: &Path, contents: &[u8]) -> PathBuf {
    let path = dir.join("gtfs.zip");
    std::fs::write(&path, contents).unwrap();
    path
}

/// Serves the same body on every fetch and counts calls.
pub struct StaticFetcher {
    body: Vec<u8>,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FeedFetcher for StaticFetcher {
    fn fetch(&self, _url: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(self.body.clone()))
    }
}

pub struct FailingFetcher;

impl FeedFetcher for FailingFetcher {
    fn fetch(&self, url: &str) -> Result<Bytes> {
        Err(ScheduleError::Download {
            url: url.to_string(),
            message: "connection refused".to_string(),
        })
    }
}
