//! Entry line codec.
//!
//! One record per line, comma-separated. The first field is the time, the
//! second the value as an integer scaled by 10 000.
//! - Hour/Daily: `20200102 00:00,1234500`
//! - Tick/Second/Minute: `34200000,1234500` (milliseconds since midnight; the
//!   date comes from the entry)

use crate::domain::{DataPoint, Resolution};
use crate::error::CacheError;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub const SCALE_FACTOR: f64 = 10_000.0;

const LONG_TIME_FORMAT: &str = "%Y%m%d %H:%M";

/// Scaled values must lie in `[-2^63, 2^63)` to fit an `i64`.
const SCALED_RANGE: std::ops::Range<f64> =
    -9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0;

/// Scale a decimal value to its stored integer form. NaN, infinities and
/// values whose scaled form overflows an `i64` are rejected.
pub fn scale(value: f64) -> Result<i64, CacheError> {
    let scaled = (value * SCALE_FACTOR).round();
    if !SCALED_RANGE.contains(&scaled) {
        return Err(CacheError::UnstorableValue { value });
    }
    Ok(scaled as i64)
}

pub fn unscale(raw: i64) -> f64 {
    raw as f64 / SCALE_FACTOR
}

pub fn generate_line(point: &DataPoint, resolution: Resolution) -> Result<String, CacheError> {
    let value = scale(point.value)?;
    Ok(format!("{},{value}", format_time(point.time, resolution)))
}

fn format_time(time: NaiveDateTime, resolution: Resolution) -> String {
    if resolution.is_date_partitioned() {
        let ms = i64::from(time.num_seconds_from_midnight()) * 1000
            + i64::from(time.nanosecond() / 1_000_000);
        ms.to_string()
    } else {
        time.format(LONG_TIME_FORMAT).to_string()
    }
}

/// Recover the timestamp of a stored line. `date` is the entry's date and is
/// only consulted for sub-hour resolutions.
pub fn parse_time(
    line: &str,
    date: NaiveDate,
    resolution: Resolution,
) -> Result<NaiveDateTime, CacheError> {
    let field = line.split(',').next().unwrap_or_default().trim();
    let bad = |reason: String| CacheError::BadLine {
        line: line.to_string(),
        reason,
    };

    if resolution.is_date_partitioned() {
        let ms: i64 = field
            .parse()
            .map_err(|e| bad(format!("milliseconds field: {e}")))?;
        if !(0..86_400_000).contains(&ms) {
            return Err(bad(format!("milliseconds out of range: {ms}")));
        }
        Ok(date.and_time(NaiveTime::MIN) + Duration::milliseconds(ms))
    } else {
        NaiveDateTime::parse_from_str(field, LONG_TIME_FORMAT)
            .map_err(|e| bad(format!("time field: {e}")))
    }
}

/// Decode the value field of a stored line.
pub fn parse_value(line: &str) -> Result<f64, CacheError> {
    let field = line
        .split(',')
        .nth(1)
        .map(str::trim)
        .ok_or_else(|| CacheError::BadLine {
            line: line.to_string(),
            reason: "missing value field".into(),
        })?;
    field.parse::<i64>().map(unscale).map_err(|e| CacheError::BadLine {
        line: line.to_string(),
        reason: format!("value field: {e}"),
    })
}
