//! Local copy of the GTFS archive and the policy that decides when to re-fetch it.
//!
//! The file's modification time is the only freshness signal: an archive older
//! than the configured max age (24 hours by default), or one that is empty, is
//! downloaded again. A new archive must parse before it replaces the local
//! copy, and it is swapped in with a write-to-temp + rename so a crash
//! mid-write never leaves a truncated archive behind.

use bytes::Bytes;
use reqwest::blocking;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, ScheduleError};
use crate::feed_store::FeedStore;

pub const DEFAULT_FEED_URL: &str = "http://www.rtl-longueuil.qc.ca/transit/latestfeed/RTL.zip";
pub const DEFAULT_FEED_FILE: &str = "gtfs.zip";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Fetches the raw bytes of a feed archive.
pub trait FeedFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Bytes>;
}

impl<F: FeedFetcher + ?Sized> FeedFetcher for std::sync::Arc<F> {
    fn fetch(&self, url: &str) -> Result<Bytes> {
        (**self).fetch(url)
    }
}

pub struct HttpFeedFetcher(blocking::Client);

impl HttpFeedFetcher {
    pub fn new() -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ScheduleError::Download {
                url: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self(client))
    }
}

impl FeedFetcher for HttpFeedFetcher {
    fn fetch(&self, url: &str) -> Result<Bytes> {
        let download_error = |message: String| ScheduleError::Download {
            url: url.to_string(),
            message,
        };

        let response = self
            .0
            .get(url)
            .send()
            .map_err(|e| download_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_error(format!(
                "download failed with status: {}",
                response.status()
            )));
        }

        response
            .bytes()
            .map_err(|e| download_error(format!("failed to read GTFS zip: {}", e)))
    }
}

/// `<cache dir>/rtl_schedule/gtfs.zip`, falling back to the working directory.
pub fn default_feed_path() -> PathBuf {
    let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("rtl_schedule");
    path.push(DEFAULT_FEED_FILE);
    path
}

/// Absent, unreadable and zero-byte files are always expired.
pub fn is_file_expired(path: &Path, max_age: Duration, now: SystemTime) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return true,
    };

    if metadata.len() == 0 {
        info!(path = %path.display(), "Feed file is zero size, considering it expired");
        return true;
    }

    let Ok(modified) = metadata.modified() else {
        return true;
    };

    // An mtime in the future counts as brand new.
    let age = now.duration_since(modified).unwrap_or_default();
    debug!(path = %path.display(), age_secs = age.as_secs(), "Feed file age");
    age >= max_age
}

pub struct FeedCache {
    url: String,
    path: PathBuf,
    max_age: Duration,
    fetcher: Box<dyn FeedFetcher>,
}

impl FeedCache {
    pub fn new(
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        max_age: Duration,
        fetcher: Box<dyn FeedFetcher>,
    ) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            max_age,
            fetcher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_expired(&self) -> bool {
        is_file_expired(&self.path, self.max_age, SystemTime::now())
    }

    /// Downloads the archive if the local copy is stale. Returns the parsed
    /// feed when a download happened.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub fn ensure_fresh(&self) -> Result<Option<FeedStore>> {
        if !self.is_expired() {
            debug!("Feed file is fresh");
            return Ok(None);
        }
        self.download().map(Some)
    }

    /// Unconditionally fetches the archive and replaces the local file.
    ///
    /// The body is parsed first; a response that is not a loadable feed leaves
    /// the local copy untouched.
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub fn download(&self) -> Result<FeedStore> {
        info!("Downloading GTFS feed");
        let zip_bytes = self.fetcher.fetch(&self.url)?;

        if zip_bytes.is_empty() {
            return Err(ScheduleError::Download {
                url: self.url.clone(),
                message: "response body was empty".to_string(),
            });
        }

        let store = FeedStore::from_reader(Cursor::new(&zip_bytes[..]))?;
        write_atomically(&self.path, &zip_bytes)?;
        info!(
            kb = zip_bytes.len() / 1024,
            path = %self.path.display(),
            "Downloaded a new feed archive"
        );
        Ok(store)
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| ScheduleError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ScheduleError::io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ScheduleError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ScheduleError::io(path, e.error))?;
    Ok(())
}
