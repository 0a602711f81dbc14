use super::SeriesId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single timestamped observation of one series.
///
/// Only the timestamp and the serialized line matter to the cache; the value
/// is kept as `f64` and scaled to an integer when written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: SeriesId,
    pub time: NaiveDateTime,
    pub value: f64,
}

impl DataPoint {
    pub fn new(id: SeriesId, time: NaiveDateTime, value: f64) -> Self {
        Self { id, time, value }
    }
}
