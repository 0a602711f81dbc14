use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Granularity of a series. Ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    Hour,
    Daily,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Tick,
        Resolution::Second,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Daily,
    ];

    /// Sub-hour series get one archive per calendar date; Hour/Daily series
    /// are consolidated into a single archive.
    pub fn is_date_partitioned(self) -> bool {
        self < Resolution::Hour
    }

    /// Merge for consolidated archives, Overwrite for daily partitions.
    pub fn default_write_policy(self) -> WritePolicy {
        if self.is_date_partitioned() {
            WritePolicy::Overwrite
        } else {
            WritePolicy::Merge
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Tick => "tick",
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Daily => "daily",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resolution '{s}'"))
    }
}

/// How a new batch is combined with whatever an archive entry already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Replace the entry with the batch.
    Overwrite,
    /// Add the batch lines after the existing content, duplicates included.
    Append,
    /// Overlay the batch on the existing rows, keyed by timestamp.
    Merge,
}

impl WritePolicy {
    pub fn resolve(explicit: Option<WritePolicy>, resolution: Resolution) -> WritePolicy {
        explicit.unwrap_or_else(|| resolution.default_write_policy())
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WritePolicy::Overwrite => "overwrite",
            WritePolicy::Append => "append",
            WritePolicy::Merge => "merge",
        };
        f.write_str(s)
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(WritePolicy::Overwrite),
            "append" => Ok(WritePolicy::Append),
            "merge" => Ok(WritePolicy::Merge),
            other => Err(format!("unknown write policy '{other}'")),
        }
    }
}
