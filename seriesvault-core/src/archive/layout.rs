//! Archive path and entry naming.
//!
//! Layout: `{data_dir}/{category}/{market}/{resolution}/...`
//! - Hour/Daily: `.../{symbol}.json`, entry `{symbol}.csv`
//! - Tick/Second/Minute: `.../[{symbol}/]{yyyymmdd}.json`,
//!   entry `{yyyymmdd}_{symbol}_{resolution}.csv`
//!
//! The symbol directory for date-partitioned series is controlled by
//! `nest_by_symbol`. Without it, every symbol of a market shares the day file
//! and is told apart by entry name.

use super::ArchiveKey;
use crate::domain::{Resolution, SeriesId};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    data_dir: PathBuf,
    nest_by_symbol: bool,
}

impl ArchiveLayout {
    pub fn new(data_dir: impl Into<PathBuf>, nest_by_symbol: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            nest_by_symbol,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the archives of a series.
    pub fn archive_dir(&self, id: &SeriesId, resolution: Resolution) -> PathBuf {
        let dir = self
            .data_dir
            .join(id.category.as_str())
            .join(id.market.to_lowercase())
            .join(resolution.as_str());
        if resolution.is_date_partitioned() && self.nest_by_symbol {
            dir.join(id.file_symbol())
        } else {
            dir
        }
    }

    /// Archive file for a series at the given date. The date is ignored for
    /// consolidated resolutions.
    pub fn archive_path(&self, id: &SeriesId, resolution: Resolution, date: NaiveDate) -> PathBuf {
        let file_name = if resolution.is_date_partitioned() {
            format!("{}.{ARCHIVE_EXTENSION}", date.format("%Y%m%d"))
        } else {
            format!("{}.{ARCHIVE_EXTENSION}", id.file_symbol())
        };
        self.archive_dir(id, resolution).join(file_name)
    }

    /// Entry name inside the archive.
    pub fn entry_name(id: &SeriesId, resolution: Resolution, date: NaiveDate) -> String {
        if resolution.is_date_partitioned() {
            format!(
                "{}_{}_{}.csv",
                date.format("%Y%m%d"),
                id.file_symbol(),
                resolution.as_str()
            )
        } else {
            format!("{}.csv", id.file_symbol())
        }
    }

    pub fn entry_key(&self, id: &SeriesId, resolution: Resolution, date: NaiveDate) -> ArchiveKey {
        ArchiveKey::new(
            self.archive_path(id, resolution, date),
            Self::entry_name(id, resolution, date),
        )
    }
}
