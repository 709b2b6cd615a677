//! Next-bus lookups over a GTFS static feed.
//!
//! The feed is cached on disk and refreshed once it is older than a day. A
//! single [`facade::ScheduleService`] answers "when is the next bus at stop X"
//! for the HTTP server and the MQTT publisher alike.

pub mod config;
pub mod error;
pub mod facade;
pub mod feed_cache;
pub mod feed_store;
pub mod gtfs_time;
pub mod http_server;
pub mod logging;
pub mod models;
pub mod publisher;
pub mod resolver;

#[cfg(test)]
mod test_utils;

pub use error::{Result, ScheduleError};
pub use facade::{NextStop, NextStopPayload, QueryResult, ScheduleService};
