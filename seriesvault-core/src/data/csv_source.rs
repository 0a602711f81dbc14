//! Fetcher over local CSV files, one file per requested symbol.
//!
//! Expected layout: `{source_dir}/{symbol}.csv` with a `symbol,time,value`
//! header. `time` is `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`. A file may carry
//! rows for several symbols; each row's identity takes the requested market
//! and category.

use super::provider::{FetchError, FetchRequest, SeriesFetcher};
use crate::domain::{Category, DataPoint, SeriesId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CsvRow {
    symbol: String,
    time: String,
    value: f64,
}

#[derive(Debug, Clone)]
pub struct CsvFileFetcher {
    source_dir: PathBuf,
}

impl CsvFileFetcher {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    pub fn source_path(&self, symbol: &str) -> PathBuf {
        self.source_dir.join(format!("{symbol}.csv"))
    }
}

impl SeriesFetcher for CsvFileFetcher {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<DataPoint>, FetchError> {
        let id = &request.key.id;
        let path = self.source_path(&id.symbol);
        if !path.exists() {
            return Err(FetchError::SymbolNotFound {
                symbol: id.symbol.clone(),
            });
        }
        let mut points = read_points(&path, &id.market, id.category)?;
        points.retain(|p| request.contains(p.time));
        Ok(points)
    }
}

/// Read every row of a `symbol,time,value` file, stably sorted by time.
pub fn read_points(
    path: &Path,
    market: &str,
    category: Category,
) -> Result<Vec<DataPoint>, FetchError> {
    let data = fs::read(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_slice());

    let mut points = Vec::new();
    for (i, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.map_err(|e| FetchError::Parse(format!("row {}: {e}", i + 1)))?;
        let time = parse_time_field(&row.time)?;
        let id = SeriesId::new(row.symbol, market, category);
        points.push(DataPoint::new(id, time, row.value));
    }
    points.sort_by_key(|p| p.time);
    Ok(points)
}

/// Accepts a bare date (midnight) or a date with seconds.
pub fn parse_time_field(s: &str) -> Result<NaiveDateTime, FetchError> {
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(t);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| FetchError::Parse(format!("invalid time '{s}'")))
}
