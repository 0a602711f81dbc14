//! Error types for the cache layer.
//!
//! `CacheError` covers everything that can go wrong while partitioning,
//! committing or reading archives. Fetch failures have their own type in
//! [`crate::data::provider::FetchError`] because they are always swallowed at
//! the downloader boundary.

use chrono::NaiveDateTime;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("data must be sorted from oldest to newest: {current} arrived after {previous}")]
    OutOfOrder {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("series identity changed from '{previous}' to '{current}' within {date}")]
    IdentityChanged {
        previous: String,
        current: String,
        date: chrono::NaiveDate,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("invalid archive key '{0}' (expected 'path#entry')")]
    InvalidKey(String),

    #[error("unparsable line '{line}': {reason}")]
    BadLine { line: String, reason: String },

    #[error("value {value} cannot be stored as a scaled integer")]
    UnstorableValue { value: f64 },

    #[error("flush worker terminated before reporting a result for {}", path.display())]
    FlushAborted { path: PathBuf },

    #[error("thread pool error: {0}")]
    Pool(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
