use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use rtl_schedule::feed_cache::{DEFAULT_MAX_AGE, FeedCache, FeedFetcher};
use rtl_schedule::{QueryResult, ScheduleError, ScheduleService};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use zip::ZipWriter;
use zip::write::FileOptions;

const STOPS: &str = "stop_id,stop_code,stop_name\n\
                     1,123,Test Stop 1\n\
                     2,456,Test Stop 2\n\
                     3,,Unnumbered Platform\n";
const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                        WKD,1,1,1,1,1,0,0,20250101,20251231\n\
                        WKE,0,0,0,0,0,1,1,20250101,20251231\n";
const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign\n\
                     101,WKD,t1,To Downtown\n\
                     101,WKD,t2,To Downtown\n\
                     8,WKE,t3,Weekend Shuttle\n";
const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                          t1,10:00:00,10:00:30,1,1\n\
                          t1,10:05:00,10:05:30,2,2\n\
                          t2,24:15:00,24:15:00,1,1\n\
                          t3,11:00:00,11:00:00,1,1\n";

struct CountingFetcher {
    body: Vec<u8>,
    calls: AtomicUsize,
}

impl FeedFetcher for CountingFetcher {
    fn fetch(&self, _url: &str) -> rtl_schedule::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(self.body.clone()))
    }
}

struct OfflineFetcher;

impl FeedFetcher for OfflineFetcher {
    fn fetch(&self, url: &str) -> rtl_schedule::Result<Bytes> {
        Err(ScheduleError::Download {
            url: url.to_string(),
            message: "network unreachable".to_string(),
        })
    }
}

fn feed_zip() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in [
        ("stops.txt", STOPS),
        ("calendar.txt", CALENDAR),
        ("trips.txt", TRIPS),
        ("stop_times.txt", STOP_TIMES),
    ] {
        writer.start_file(name, FileOptions::default()).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

fn found(result: QueryResult) -> rtl_schedule::NextStop {
    match result {
        QueryResult::Found(next) => next,
        other => panic!("expected an arrival, got {other:?}"),
    }
}

#[test]
fn downloads_feed_once_and_answers_queries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache").join("gtfs.zip");
    let fetcher = Arc::new(CountingFetcher {
        body: feed_zip(),
        calls: AtomicUsize::new(0),
    });
    let cache = FeedCache::new("http://feed.test/gtfs.zip", &path, DEFAULT_MAX_AGE, Box::new(fetcher.clone()));
    let service = ScheduleService::initialize(cache).unwrap();
    assert!(path.is_file());

    // Monday morning
    let next = found(service.get_next_stop(123, at(2025, 9, 29, 9, 0, 0)));
    assert_eq!(next.arrival.arrival_time, "10:00:00");
    assert_eq!(next.arrival.route_id, "101");
    assert_eq!((next.minutes_until, next.seconds_until), (60, 0));

    let next = found(service.get_next_stop(456, at(2025, 9, 29, 10, 4, 1)));
    assert_eq!((next.minutes_until, next.seconds_until), (0, 59));

    // After the morning bus, the post-midnight trip is next.
    let next = found(service.get_next_stop(123, at(2025, 9, 29, 10, 0, 0)));
    assert_eq!(next.arrival.arrival_time, "00:15:00");
    assert_eq!(next.arrival.arrival_datetime, at(2025, 9, 30, 0, 15, 0));

    // Weekend service only.
    let next = found(service.get_next_stop(123, at(2025, 9, 27, 9, 0, 0)));
    assert_eq!(next.arrival.route_id, "8");
    assert_eq!(next.arrival.trip_headsign.as_deref(), Some("Weekend Shuttle"));

    assert_eq!(
        service.get_next_stop(456, at(2025, 9, 29, 10, 5, 0)),
        QueryResult::NoMoreService
    );
    assert_eq!(
        service.get_next_stop(77777, at(2025, 9, 29, 9, 0, 0)),
        QueryResult::StopNotFound
    );

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn payload_matches_http_shape() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = CountingFetcher {
        body: feed_zip(),
        calls: AtomicUsize::new(0),
    };
    let cache = FeedCache::new("http://feed.test/gtfs.zip", dir.path().join("gtfs.zip"), DEFAULT_MAX_AGE, Box::new(fetcher));
    let service = ScheduleService::initialize(cache).unwrap();

    let next = found(service.get_next_stop(123, at(2025, 9, 29, 9, 45, 30)));
    let json = serde_json::to_value(next.payload(Some(123))).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "nextstop_nbrmins": 14,
            "nextstop_nbrsecs": 30,
            "route_id": 101,
            "arrival_time": "10:00:00",
            "trip_headsign": "To Downtown",
            "current_time": "09:45:30",
            "stop_code": 123,
        })
    );
}

#[test]
fn start_up_fails_without_feed_or_network() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FeedCache::new(
        "http://feed.test/gtfs.zip",
        dir.path().join("gtfs.zip"),
        DEFAULT_MAX_AGE,
        Box::new(OfflineFetcher),
    );

    match ScheduleService::initialize(cache) {
        Err(ScheduleError::Download { url, .. }) => assert_eq!(url, "http://feed.test/gtfs.zip"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("initialization should fail"),
    }
}

#[test]
fn concurrent_queries_share_one_feed() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(CountingFetcher {
        body: feed_zip(),
        calls: AtomicUsize::new(0),
    });
    let cache = FeedCache::new("http://feed.test/gtfs.zip", dir.path().join("gtfs.zip"), DEFAULT_MAX_AGE, Box::new(fetcher.clone()));
    let service = Arc::new(ScheduleService::initialize(cache).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            std::thread::spawn(move || service.get_next_stop(123, at(2025, 9, 29, 9, 0, 0)))
        })
        .collect();

    for handle in handles {
        let next = found(handle.join().unwrap());
        assert_eq!(next.arrival.arrival_time, "10:00:00");
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}
