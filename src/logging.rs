//! Tracing subscriber setup for the binary.
//!
//! stderr gets human-readable output (or JSON with `--log-json`), filtered by
//! `RUST_LOG`. When a log file path is configured, JSON lines are also written
//! to a daily-rotated file through a non-blocking writer.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogConfig;

const DEFAULT_LOG_FILE: &str = "rtl_schedule.log";

/// Installs the global subscriber. Keep the returned guard alive until exit
/// or buffered file output is lost.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match config.file_path.as_deref() {
        Some(path) => {
            let (dir, file_name) = split_log_path(path);
            let file_appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(non_blocking_file)
                .with_filter(env_filter("RUST_LOG_JSON", "debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer.with_filter(env_filter("RUST_LOG", "info")))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

fn env_filter(var: &str, default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Splits `logs/app.log` into the rolling appender's directory and file prefix.
fn split_log_path(path: &Path) -> (&Path, &OsStr) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name().unwrap_or(OsStr::new(DEFAULT_LOG_FILE));
    (dir, file_name)
}
