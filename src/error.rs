// ============================================================================
// Error Handling
// ============================================================================

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Network error: failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("File error: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {table}: {message}")]
    Parse { table: String, message: String },

    #[error("No service found for date {date}")]
    NoService { date: NaiveDate },
}

impl ScheduleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScheduleError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(table: impl Into<String>, message: impl ToString) -> Self {
        ScheduleError::Parse {
            table: table.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
