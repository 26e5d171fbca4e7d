//! Error types for Confluence

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a synchronization run.
///
/// Numeric anomalies and unlinked observations are not errors; they are
/// recovered where they occur and surface as counters in the coverage report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Malformed timestamp {value:?} (expected format {format})")]
    MalformedTimestamp { value: String, format: String },

    #[error("Missing required column {index} ({role}); table has {width} columns")]
    MissingColumn {
        role: String,
        index: usize,
        width: usize,
    },

    #[error("Unparseable observation identifier on row {row}: {identifier:?}")]
    UnparseableIdentifier { row: usize, identifier: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Output writer error: {0}")]
    Writer(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing_column(role: &str, index: usize, width: usize) -> Self {
        SyncError::MissingColumn {
            role: role.to_string(),
            index,
            width,
        }
    }
}
