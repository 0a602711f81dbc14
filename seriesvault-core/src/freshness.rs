//! Cache freshness checks.
//!
//! A cached archive needs a refresh when it is missing, or when it is a
//! consolidated archive (no `YYYYMMDD` in its file name) whose last write is
//! older than the refresh period. Date-partitioned archives hold finished days
//! and are never considered stale.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

static DATE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{8}").expect("valid date regex"));

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Whether the archive at `path` must be (re)downloaded.
pub fn needs_refresh(path: &Path, refresh_period_days: u32) -> bool {
    needs_refresh_at(path, refresh_period_days, SystemTime::now())
}

/// [`needs_refresh`] against an explicit clock.
pub fn needs_refresh_at(path: &Path, refresh_period_days: u32, now: SystemTime) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    !is_date_partitioned(path) && is_out_of_date(modified, refresh_period_days, now)
}

/// File names carrying an 8-digit date belong to one finished day.
pub fn is_date_partitioned(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| DATE_NAME.is_match(n))
}

fn is_out_of_date(modified: SystemTime, refresh_period_days: u32, now: SystemTime) -> bool {
    let period = Duration::from_secs(u64::from(refresh_period_days) * SECS_PER_DAY);
    match now.checked_sub(period) {
        Some(threshold) => threshold > modified,
        None => false,
    }
}
