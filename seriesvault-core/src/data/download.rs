//! Download orchestrator: serves a cached archive path, refreshing it first
//! when it is missing or stale.
//!
//! A refresh fetches the whole history window once, groups the result by
//! series identity and writes every group through one [`PartitionWriter`].
//! Concurrent refreshes of the same resource are coalesced: the first caller
//! does the work, the others get the cached path back immediately.

use super::provider::{AllMarkets, FetchRequest, ReferenceData, SeriesFetcher};
use crate::archive::{ArchiveLayout, ArchiveStore};
use crate::config::CacheConfig;
use crate::domain::{Category, DataPoint, ResourceKey, SeriesId};
use crate::error::CacheError;
use crate::freshness;
use crate::sync::KeySynchronizer;
use crate::writer::PartitionWriter;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rayon::ThreadPool;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Earliest date requested from a fetcher.
pub const HISTORY_START: NaiveDate = match NaiveDate::from_ymd_opt(1998, 1, 2) {
    Some(d) => d,
    None => panic!("invalid history start"),
};

pub struct SeriesDownloader {
    config: CacheConfig,
    layout: ArchiveLayout,
    fetcher: Arc<dyn SeriesFetcher>,
    store: Arc<dyn ArchiveStore>,
    sync: Arc<KeySynchronizer>,
    pool: Arc<ThreadPool>,
    reference: Arc<dyn ReferenceData>,
    unsupported_logged: AtomicBool,
    missing_reference_logged: Mutex<HashSet<SeriesId>>,
    recorded: Mutex<HashMap<ResourceKey, PathBuf>>,
}

impl SeriesDownloader {
    pub fn new(
        config: CacheConfig,
        fetcher: Arc<dyn SeriesFetcher>,
        store: Arc<dyn ArchiveStore>,
    ) -> Result<Self, CacheError> {
        let pool = Arc::new(config.flush_pool()?);
        Ok(Self {
            layout: config.layout(),
            config,
            fetcher,
            store,
            sync: Arc::new(KeySynchronizer::new()),
            pool,
            reference: Arc::new(AllMarkets),
            unsupported_logged: AtomicBool::new(false),
            missing_reference_logged: Mutex::new(HashSet::new()),
            recorded: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_reference_data(mut self, reference: Arc<dyn ReferenceData>) -> Self {
        self.reference = reference;
        self
    }

    /// Share a synchronizer with other downloaders or writers over the same tree.
    pub fn with_synchronizer(mut self, sync: Arc<KeySynchronizer>) -> Self {
        self.sync = sync;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn synchronizer(&self) -> &Arc<KeySynchronizer> {
        &self.sync
    }

    /// Path of the archive serving `key`, refreshed first if it is stale.
    ///
    /// Never fails: fetch and write errors are logged and the cached path is
    /// returned as-is.
    pub fn get_or_refresh(&self, key: &ResourceKey, refresh_period_days: u32) -> PathBuf {
        self.get_or_refresh_on(key, refresh_period_days, Utc::now().date_naive())
    }

    /// [`get_or_refresh`](Self::get_or_refresh) with an explicit current date.
    pub fn get_or_refresh_on(
        &self,
        key: &ResourceKey,
        refresh_period_days: u32,
        today: NaiveDate,
    ) -> PathBuf {
        let archive_path = self
            .recorded_path(key)
            .unwrap_or_else(|| self.archive_path_for(key, refresh_period_days, today));
        if !freshness::needs_refresh(&archive_path, refresh_period_days) {
            return archive_path;
        }

        let refreshed = self.sync.execute_single(&key.id.to_string(), || {
            self.refresh(key, refresh_period_days, today)
        });

        match refreshed {
            Some(Some(path)) => path,
            Some(None) => archive_path,
            None => {
                tracing::debug!(resource = %key, "refresh already in flight, serving cached path");
                archive_path
            }
        }
    }

    /// Archive path written by the last completed refresh of `key`, if any.
    pub fn recorded_path(&self, key: &ResourceKey) -> Option<PathBuf> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Expected archive path for `key` before any refresh has been recorded,
    /// dated at the last day inside the fetch window.
    pub fn archive_path_for(
        &self,
        key: &ResourceKey,
        refresh_period_days: u32,
        today: NaiveDate,
    ) -> PathBuf {
        let (_, end) = fetch_range(refresh_period_days, today);
        self.layout
            .archive_path(&key.id, key.resolution, last_day_before(end))
    }

    /// Runs inside the single-flight section. Returns the path of the first
    /// written group, if any: its newest partition once the group is
    /// committed. A refresh that writes every group is remembered for `key`.
    fn refresh(
        &self,
        key: &ResourceKey,
        refresh_period_days: u32,
        today: NaiveDate,
    ) -> Option<PathBuf> {
        if key.id.category != Category::Custom {
            if !self.unsupported_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    category = %key.id.category,
                    "only custom series can be downloaded, skipping refresh"
                );
            }
            return None;
        }

        if !self.reference.has_market_hours(&key.id) {
            let first = self
                .missing_reference_logged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.id.clone());
            if first {
                tracing::warn!(series = %key.id, "no market hours known, skipping refresh");
            }
            return None;
        }

        let (start, end) = fetch_range(refresh_period_days, today);
        let request = FetchRequest::new(key.clone(), start, end);
        tracing::info!(
            resource = %key,
            fetcher = self.fetcher.name(),
            %start,
            %end,
            "refreshing"
        );

        let points = match self.fetcher.fetch(&request) {
            Ok(points) => points,
            Err(e) => {
                tracing::error!(resource = %key, error = %e, "fetch failed");
                return None;
            }
        };

        let last_day = last_day_before(end);
        let mut writer: Option<PartitionWriter> = None;
        let mut recorded: Option<PathBuf> = None;
        let mut partitions = 0;
        let mut rows = 0;

        for (id, group) in group_by_identity(points) {
            let writer = writer.get_or_insert_with(|| self.partition_writer(key));
            let first = recorded.is_none();
            if first {
                recorded = Some(writer.archive_path(&id, last_day));
            }
            match writer.write(group) {
                Ok(summary) => {
                    if let Some(report) = summary.partitions.last().filter(|_| first) {
                        recorded = Some(report.key.path.clone());
                    }
                    partitions += summary.partitions.len();
                    rows += summary.rows;
                }
                Err(e) => {
                    tracing::error!(resource = %key, series = %id, error = %e, "write failed");
                    return recorded;
                }
            }
        }

        if let Some(path) = &recorded {
            self.recorded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone(), path.clone());
        }
        tracing::info!(resource = %key, partitions, rows, "refresh complete");
        recorded
    }

    fn partition_writer(&self, key: &ResourceKey) -> PartitionWriter {
        PartitionWriter::new(
            key.resolution,
            self.config.write_policy_for(key.resolution),
            self.layout.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.sync),
            Arc::clone(&self.pool),
        )
    }
}

/// Half-open fetch window `[HISTORY_START, end)`. `end` is today when the
/// refresh period is 0, otherwise yesterday.
pub fn fetch_range(refresh_period_days: u32, today: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let end_date = if refresh_period_days == 0 {
        today
    } else {
        today - Duration::days(1)
    };
    (
        HISTORY_START.and_time(NaiveTime::default()),
        end_date.and_time(NaiveTime::default()),
    )
}

/// Last calendar day inside a window ending (exclusive) at `end`.
fn last_day_before(end: NaiveDateTime) -> NaiveDate {
    (end - Duration::milliseconds(1)).date()
}

/// Split points by identity, keeping the order identities first appear in.
fn group_by_identity(points: Vec<DataPoint>) -> Vec<(SeriesId, Vec<DataPoint>)> {
    let mut index: HashMap<SeriesId, usize> = HashMap::new();
    let mut groups: Vec<(SeriesId, Vec<DataPoint>)> = Vec::new();
    for point in points {
        match index.get(&point.id) {
            Some(&i) => groups[i].1.push(point),
            None => {
                index.insert(point.id.clone(), groups.len());
                groups.push((point.id.clone(), vec![point]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn range_ends_yesterday_unless_period_is_zero() {
        let today = date(2024, 3, 1);
        let (start, end) = fetch_range(7, today);
        assert_eq!(start.date(), date(1998, 1, 2));
        assert_eq!(end.date(), date(2024, 2, 29));

        let (_, end) = fetch_range(0, today);
        assert_eq!(end.date(), today);
    }

    #[test]
    fn last_day_excludes_window_end() {
        let end = date(2024, 3, 9).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(last_day_before(end), date(2024, 3, 8));
    }

    #[test]
    fn grouping_keeps_first_appearance_order() {
        let t = date(2020, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        let a = SeriesId::custom("A", "usa");
        let b = SeriesId::custom("B", "usa");
        let points = vec![
            DataPoint::new(b.clone(), t, 1.0),
            DataPoint::new(a.clone(), t, 2.0),
            DataPoint::new(b.clone(), t, 3.0),
        ];
        let groups = group_by_identity(points);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, b);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, a);
    }
}
