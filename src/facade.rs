// ============================================================================
// Query Facade
// ============================================================================
//
// The only entry point the HTTP handlers and the MQTT loop use. Owns the
// current feed snapshot and keeps it fresh before answering.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, ScheduleError};
use crate::feed_cache::FeedCache;
use crate::feed_store::FeedStore;
use crate::models::ResolvedArrival;
use crate::resolver::next_arrival;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Found(NextStop),
    StopNotFound,
    NoMoreService,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextStop {
    pub arrival: ResolvedArrival,
    pub minutes_until: i64,
    pub seconds_until: i64,
    pub queried_at: NaiveDateTime,
}

impl NextStop {
    fn new(arrival: ResolvedArrival, now: NaiveDateTime) -> Self {
        let total_secs = (arrival.arrival_datetime - now).num_seconds();
        Self {
            minutes_until: total_secs.div_euclid(60),
            seconds_until: total_secs.rem_euclid(60),
            arrival,
            queried_at: now,
        }
    }

    pub fn payload(&self, stop_code: Option<u32>) -> NextStopPayload {
        NextStopPayload {
            nextstop_nbrmins: self.minutes_until,
            nextstop_nbrsecs: self.seconds_until,
            route_id: RouteId::from(self.arrival.route_id.as_str()),
            arrival_time: self.arrival.arrival_time.clone(),
            trip_headsign: self.arrival.trip_headsign.clone(),
            current_time: self.queried_at.format("%H:%M:%S").to_string(),
            stop_code,
        }
    }
}

/// Numeric route ids go out as JSON numbers, anything else as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RouteId {
    Number(u64),
    Text(String),
}

impl From<&str> for RouteId {
    fn from(raw: &str) -> Self {
        raw.parse()
            .map(RouteId::Number)
            .unwrap_or_else(|_| RouteId::Text(raw.to_string()))
    }
}

/// Wire shape shared by the HTTP response and the MQTT state message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextStopPayload {
    pub nextstop_nbrmins: i64,
    pub nextstop_nbrsecs: i64,
    pub route_id: RouteId,
    pub arrival_time: String,
    pub trip_headsign: Option<String>,
    pub current_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_code: Option<u32>,
}

/// How long a stale feed is served after a failed refresh before queries
/// try downloading again.
pub const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

pub struct ScheduleService {
    cache: FeedCache,
    store: RwLock<Arc<FeedStore>>,
    refresh_guard: Mutex<()>,
    last_failed_refresh: Mutex<Option<Instant>>,
}

impl ScheduleService {
    /// Makes sure a feed is on disk and loads it.
    ///
    /// A stale archive that cannot be re-downloaded is still loaded, and a
    /// fresh-looking archive that does not parse is downloaded again. Failing
    /// to end up with any loadable archive is an error.
    #[tracing::instrument(skip(cache), fields(path = %cache.path().display()))]
    pub fn initialize(cache: FeedCache) -> Result<Self> {
        let mut failed_at = None;
        let store = match cache.ensure_fresh() {
            Ok(Some(store)) => store,
            Ok(None) => load_or_download(&cache)?,
            Err(e) if has_local_copy(&cache) => {
                warn!(error = %e, "Feed download failed, falling back to the stale local copy");
                failed_at = Some(Instant::now());
                FeedStore::load(cache.path())?
            }
            Err(e) => return Err(e),
        };
        info!(services = store.calendar().len(), "Schedule service ready");

        Ok(Self {
            cache,
            store: RwLock::new(Arc::new(store)),
            refresh_guard: Mutex::new(()),
            last_failed_refresh: Mutex::new(failed_at),
        })
    }

    /// The current feed. Callers keep it alive for as long as they need.
    pub fn snapshot(&self) -> Arc<FeedStore> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-downloads and reloads when the archive on disk has expired.
    ///
    /// Returns immediately if another refresh is already running, or if the
    /// last attempt failed less than [`REFRESH_RETRY_DELAY`] ago; the caller
    /// keeps using the current snapshot. Failures are logged and the previous
    /// feed stays in place.
    pub fn refresh_if_stale(&self) {
        if !self.cache.is_expired() || self.in_retry_backoff(Instant::now()) {
            return;
        }

        let _guard = match self.refresh_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("Feed refresh already in flight, serving the current feed");
                return;
            }
        };

        // Another caller may have finished a refresh while we were checking.
        if !self.cache.is_expired() || self.in_retry_backoff(Instant::now()) {
            return;
        }

        if let Err(e) = self.refresh() {
            warn!(
                error = %e,
                retry_in_secs = REFRESH_RETRY_DELAY.as_secs(),
                "Feed refresh failed, keeping the previous feed"
            );
        }
    }

    /// Unconditionally downloads the archive and swaps in the new feed.
    ///
    /// Waits for any in-flight refresh first and ignores the retry delay. On
    /// error the previous feed stays in place.
    #[tracing::instrument(skip(self))]
    pub fn force_refresh(&self) -> Result<()> {
        let _guard = self
            .refresh_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.refresh()
    }

    pub fn get_next_stop(&self, stop_code: u32, now: NaiveDateTime) -> QueryResult {
        self.refresh_if_stale();
        let store = self.snapshot();

        let Some(stop_id) = store.stop_id_for_code(stop_code) else {
            debug!(stop_code, "Unknown stop code");
            return QueryResult::StopNotFound;
        };

        match next_arrival(&store, stop_id, now) {
            Some(arrival) => QueryResult::Found(NextStop::new(arrival, now)),
            None => QueryResult::NoMoreService,
        }
    }

    /// Callers hold `refresh_guard`.
    fn refresh(&self) -> Result<()> {
        let downloaded = self.cache.download();
        let failed_at = downloaded.as_ref().err().map(|_| Instant::now());
        *self
            .last_failed_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failed_at;

        let store = downloaded?;
        let trips = store.trip_count();
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(store);
        info!(trips, "Swapped in refreshed feed");
        Ok(())
    }

    fn in_retry_backoff(&self, now: Instant) -> bool {
        self.last_failed_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|failed_at| now.saturating_duration_since(failed_at) < REFRESH_RETRY_DELAY)
    }
}

/// Local wall-clock time, truncated to whole seconds.
pub fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn load_or_download(cache: &FeedCache) -> Result<FeedStore> {
    match FeedStore::load(cache.path()) {
        Err(e @ ScheduleError::Parse { .. }) => {
            warn!(error = %e, "Local feed does not parse, downloading a new copy");
            cache.download()
        }
        loaded => loaded,
    }
}

fn has_local_copy(cache: &FeedCache) -> bool {
    std::fs::metadata(cache.path())
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}
