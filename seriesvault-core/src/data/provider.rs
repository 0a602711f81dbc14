//! Fetch capability trait, structured fetch errors, and reference-data lookups.
//!
//! The SeriesFetcher trait abstracts over data sources (CSV files, remote
//! services, test doubles). Fetchers don't know about the cache; the
//! downloader sits above this trait.

use crate::domain::{DataPoint, ResourceKey, SeriesId};
use chrono::NaiveDateTime;
use thiserror::Error;

/// Structured error types for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Remote fetchers could not reach their source.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

/// One fetch call: a resource and the half-open window `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: ResourceKey,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl FetchRequest {
    pub fn new(key: ResourceKey, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { key, start, end }
    }

    /// Whether `time` falls inside the window.
    pub fn contains(&self, time: NaiveDateTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Trait for data sources.
///
/// The result must be sorted from oldest to newest per identity. A request
/// for a composite series may return points for several identities.
pub trait SeriesFetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<DataPoint>, FetchError>;
}

/// Read-only lookup of trading-calendar data.
pub trait ReferenceData: Send + Sync {
    /// Whether market hours are known for the series. Series without them
    /// cannot be refreshed.
    fn has_market_hours(&self, id: &SeriesId) -> bool;
}

/// Reference data that knows every series.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllMarkets;

impl ReferenceData for AllMarkets {
    fn has_market_hours(&self, _id: &SeriesId) -> bool {
        true
    }
}
