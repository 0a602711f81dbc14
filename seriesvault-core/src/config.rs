//! Cache configuration, loaded from TOML.
//!
//! ```toml
//! data_dir = "data"
//! refresh_period_days = 7
//! write_policy = "merge"     # optional; inferred from resolution when absent
//! nest_by_symbol = true
//! flush_threads = 4
//! ```

use crate::archive::ArchiveLayout;
use crate::domain::{Resolution, WritePolicy};
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the archive tree.
    pub data_dir: PathBuf,
    /// Days before a consolidated archive is re-fetched. 0 also moves the
    /// fetch window's end to today.
    pub refresh_period_days: u32,
    /// Explicit write policy; `None` picks the resolution's default.
    pub write_policy: Option<WritePolicy>,
    /// Give each symbol its own directory of day files.
    pub nest_by_symbol: bool,
    /// Size of the pool committing partitions in the background.
    pub flush_threads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            refresh_period_days: 7,
            write_policy: None,
            nest_by_symbol: true,
            flush_threads: 4,
        }
    }
}

impl CacheConfig {
    pub fn from_file(path: &Path) -> Result<Self, CacheError> {
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CacheError> {
        let config: Self =
            toml::from_str(content).map_err(|e| CacheError::Config(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, CacheError> {
        toml::to_string_pretty(self).map_err(|e| CacheError::Config(format!("serialize: {e}")))
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.flush_threads == 0 {
            return Err(CacheError::Config("flush_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout::new(&self.data_dir, self.nest_by_symbol)
    }

    pub fn write_policy_for(&self, resolution: Resolution) -> WritePolicy {
        WritePolicy::resolve(self.write_policy, resolution)
    }

    /// Build the pool used for background partition commits.
    pub fn flush_pool(&self) -> Result<rayon::ThreadPool, CacheError> {
        self.validate()?;
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.flush_threads)
            .thread_name(|i| format!("seriesvault-flush-{i}"))
            .panic_handler(|_| tracing::error!("flush worker panicked"))
            .build()
            .map_err(|e| CacheError::Pool(e.to_string()))
    }
}
