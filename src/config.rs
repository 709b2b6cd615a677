//! Command line and environment configuration.
//!
//! Every option can be given as a flag or through the environment variable
//! named next to it; a `.env` file is loaded by the binary before parsing.

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use clap::builder::FalseyValueParser;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::feed_cache::{self, FeedCache, FeedFetcher};
use crate::publisher::schedule::{PublishSchedule, RushWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Serve next-stop lookups over HTTP
    Http,
    /// Publish the next stop for one stop code to an MQTT broker
    Mqtt,
    /// Both, sharing one feed
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "rtl-schedule")]
#[command(about = "Next bus lookups for RTL stops over HTTP and MQTT", long_about = None)]
pub struct Cli {
    #[arg(long, env = "MODE", value_enum, ignore_case = true, default_value = "http")]
    pub mode: Mode,

    // Feed
    /// URL of the GTFS static archive
    #[arg(long, env = "GTFS_URL", default_value = feed_cache::DEFAULT_FEED_URL)]
    pub gtfs_url: String,

    /// Local copy of the archive (defaults to the user cache directory)
    #[arg(long, env = "GTFS_ZIP_FILE")]
    pub gtfs_zip_file: Option<PathBuf>,

    /// Age after which the local archive is downloaded again
    #[arg(long, env = "FEED_MAX_AGE_HOURS", default_value_t = 24)]
    pub feed_max_age_hours: u64,

    // HTTP
    #[arg(long, env = "HTTP_HOST", default_value = "0.0.0.0")]
    pub http_host: String,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    #[arg(long, env = "ROUTE_PREFIX", default_value = "rtl_schedule")]
    pub route_prefix: String,

    // MQTT
    /// Stop code whose next arrival is published
    #[arg(long, env = "STOP_CODE")]
    pub stop_code: Option<u32>,

    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_USE_TLS", value_parser = FalseyValueParser::new(), default_value_t = false)]
    pub mqtt_use_tls: bool,

    #[arg(long, env = "MQTT_STATE_TOPIC", default_value = "home/schedule/bus_stop")]
    pub mqtt_state_topic: String,

    #[arg(long, env = "MQTT_REFRESH_TOPIC", default_value = "rtl/schedule/refresh")]
    pub mqtt_refresh_topic: String,

    #[arg(long, env = "HASS_DISCOVERY_ENABLED", value_parser = FalseyValueParser::new(), default_value_t = false)]
    pub hass_discovery_enabled: bool,

    #[arg(long, env = "HASS_DISCOVERY_PREFIX", default_value = "homeassistant")]
    pub hass_discovery_prefix: String,

    // Publish schedule
    #[arg(long, env = "MORNING_RUSH_START", value_parser = parse_clock, default_value = "06:00")]
    pub morning_rush_start: NaiveTime,

    #[arg(long, env = "MORNING_RUSH_END", value_parser = parse_clock, default_value = "09:00")]
    pub morning_rush_end: NaiveTime,

    #[arg(long, env = "EVENING_RUSH_START", value_parser = parse_clock, default_value = "15:00")]
    pub evening_rush_start: NaiveTime,

    #[arg(long, env = "EVENING_RUSH_END", value_parser = parse_clock, default_value = "18:00")]
    pub evening_rush_end: NaiveTime,

    #[arg(long, env = "NORMAL_INTERVAL_SECS", default_value_t = 60)]
    pub normal_interval_secs: u64,

    #[arg(long, env = "RUSH_INTERVAL_SECS", default_value_t = 10)]
    pub rush_interval_secs: u64,

    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value_t = 5)]
    pub refresh_interval_secs: u64,

    #[arg(long, env = "REFRESH_WINDOW_MINS", default_value_t = 10)]
    pub refresh_window_mins: i64,

    // Logging
    /// Emit JSON log lines on stderr
    #[arg(long, env = "LOG_JSON", value_parser = FalseyValueParser::new(), default_value_t = false)]
    pub log_json: bool,

    /// Also write JSON logs to this file, rotated daily
    #[arg(long, env = "LOG_FILE_PATH")]
    pub log_file_path: Option<PathBuf>,
}

fn parse_clock(raw: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| format!("expected HH:MM: {}", e))
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub path: PathBuf,
    pub max_age: Duration,
}

impl FeedConfig {
    pub fn into_cache(self, fetcher: Box<dyn FeedFetcher>) -> FeedCache {
        FeedCache::new(self.url, self.path, self.max_age, fetcher)
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub route_prefix: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub stop_code: u32,
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub use_tls: bool,
    pub state_topic: String,
    pub refresh_topic: String,
    /// Discovery prefix, when Home Assistant discovery is enabled.
    pub discovery_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub json: bool,
    pub file_path: Option<PathBuf>,
}

impl Cli {
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            url: self.gtfs_url.clone(),
            path: self
                .gtfs_zip_file
                .clone()
                .unwrap_or_else(feed_cache::default_feed_path),
            max_age: Duration::from_secs(self.feed_max_age_hours * 3600),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            host: self.http_host.clone(),
            port: self.http_port,
            route_prefix: self.route_prefix.trim_matches('/').to_string(),
        }
    }

    pub fn mqtt_config(&self) -> Result<MqttConfig> {
        let stop_code = self
            .stop_code
            .context("STOP_CODE is required in MQTT mode")?;
        if stop_code == 0 {
            bail!("STOP_CODE must be a positive integer");
        }
        let host = self
            .mqtt_host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .context("MQTT_HOST is required in MQTT mode")?;

        // Credentials are only used when both halves are present.
        let credentials = match (&self.mqtt_username, &self.mqtt_password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.clone(), pass.clone()))
            }
            _ => None,
        };

        Ok(MqttConfig {
            stop_code,
            host,
            port: self.mqtt_port,
            credentials,
            use_tls: self.mqtt_use_tls,
            state_topic: self.mqtt_state_topic.clone(),
            refresh_topic: self.mqtt_refresh_topic.clone(),
            discovery_prefix: self
                .hass_discovery_enabled
                .then(|| self.hass_discovery_prefix.clone()),
        })
    }

    pub fn publish_schedule(&self) -> PublishSchedule {
        PublishSchedule {
            morning_rush: RushWindow::new(self.morning_rush_start, self.morning_rush_end),
            evening_rush: RushWindow::new(self.evening_rush_start, self.evening_rush_end),
            normal_interval: Duration::from_secs(self.normal_interval_secs),
            rush_interval: Duration::from_secs(self.rush_interval_secs),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            refresh_window: chrono::Duration::minutes(self.refresh_window_mins),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.log_json,
            file_path: self.log_file_path.clone(),
        }
    }
}
