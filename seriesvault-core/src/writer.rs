//! Partition writer: buckets a sorted series into archive entries and commits
//! each bucket under the configured write policy.
//!
//! One pass over the input:
//! 1. A partition switch is only considered when the calendar date changes,
//!    since no archive covers less than one day. The new point's archive path
//!    (and identity) is then compared with the current batch's.
//! 2. A finished batch is handed to the flush pool without waiting, so its
//!    I/O overlaps with the rest of the pass.
//! 3. The last batch is committed on the calling thread, then every
//!    dispatched commit is joined before `write` returns.
//!
//! Commits hold the archive path's exclusive section for the whole
//! read-modify-write.

use crate::archive::{entry_digest, line, ArchiveKey, ArchiveLayout, ArchiveStore};
use crate::domain::{DataPoint, Resolution, SeriesId, WritePolicy};
use crate::error::CacheError;
use crate::sync::KeySynchronizer;
use chrono::{NaiveDate, NaiveDateTime};
use rayon::ThreadPool;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

/// A serialized row and the timestamp it sorts by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedLine {
    pub time: NaiveDateTime,
    pub line: String,
}

impl TimedLine {
    pub fn new(time: NaiveDateTime, line: impl Into<String>) -> Self {
        Self {
            time,
            line: line.into(),
        }
    }
}

/// Outcome of committing one batch to one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub key: ArchiveKey,
    pub policy: WritePolicy,
    /// Rows supplied by the batch.
    pub rows: usize,
    /// BLAKE3 digest of the bytes handed to the store.
    pub digest: String,
}

/// Everything one `write` call committed, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub partitions: Vec<CommitReport>,
    pub rows: usize,
}

pub struct PartitionWriter {
    committer: Arc<Committer>,
    pool: Arc<ThreadPool>,
}

struct Committer {
    resolution: Resolution,
    policy: WritePolicy,
    layout: ArchiveLayout,
    store: Arc<dyn ArchiveStore>,
    sync: Arc<KeySynchronizer>,
}

struct Batch {
    path: PathBuf,
    id: SeriesId,
    lines: Vec<TimedLine>,
}

impl PartitionWriter {
    pub fn new(
        resolution: Resolution,
        policy: WritePolicy,
        layout: ArchiveLayout,
        store: Arc<dyn ArchiveStore>,
        sync: Arc<KeySynchronizer>,
        pool: Arc<ThreadPool>,
    ) -> Self {
        Self {
            committer: Arc::new(Committer {
                resolution,
                policy,
                layout,
                store,
                sync,
            }),
            pool,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.committer.resolution
    }

    pub fn policy(&self) -> WritePolicy {
        self.committer.policy
    }

    /// Archive a point at `date` of series `id` lands in.
    pub fn archive_path(&self, id: &SeriesId, date: NaiveDate) -> PathBuf {
        self.committer
            .layout
            .archive_path(id, self.committer.resolution, date)
    }

    /// Write a series sorted from oldest to newest.
    ///
    /// Every partition touched is durably committed when this returns, also
    /// when it returns an error. An out-of-order point, or one whose value
    /// cannot be stored, aborts the pass before it is added to any batch.
    /// Batches bound for the same archive commit in input order.
    pub fn write<I>(&self, points: I) -> Result<WriteSummary, CacheError>
    where
        I: IntoIterator<Item = DataPoint>,
    {
        let mut pending = PendingCommits::default();
        let last = self.partition(points, &mut pending);
        let dispatched = pending.join();

        let last = last?;
        let mut partitions = dispatched?;
        partitions.extend(last);
        let rows = partitions.iter().map(|p| p.rows).sum();
        Ok(WriteSummary { partitions, rows })
    }

    /// Commit one batch to `path` on the calling thread. `lines` must be sorted
    /// and share one calendar date when the resolution is date-partitioned.
    /// Returns `None` for an empty batch.
    pub fn commit_batch(
        &self,
        path: &Path,
        id: &SeriesId,
        lines: Vec<TimedLine>,
    ) -> Result<Option<CommitReport>, CacheError> {
        self.committer.commit(Batch {
            path: path.to_path_buf(),
            id: id.clone(),
            lines,
        })
    }

    /// Single pass over the input. Dispatches finished batches and returns the
    /// synchronous commit of the final one.
    fn partition<I>(
        &self,
        points: I,
        pending: &mut PendingCommits,
    ) -> Result<Option<CommitReport>, CacheError>
    where
        I: IntoIterator<Item = DataPoint>,
    {
        let resolution = self.committer.resolution;
        let mut last_time: Option<NaiveDateTime> = None;
        let mut current: Option<Batch> = None;

        for point in points {
            if let Some(previous) = last_time {
                if point.time < previous {
                    return Err(CacheError::OutOfOrder {
                        previous,
                        current: point.time,
                    });
                }
            }

            let new_date = last_time.map_or(true, |prev| prev.date() != point.time.date());
            if new_date {
                let latest_path = self.archive_path(&point.id, point.time.date());
                let switch = current
                    .as_ref()
                    .map_or(true, |b| b.path != latest_path || b.id != point.id);
                if switch {
                    if let Some(done) = current.take() {
                        pending.dispatch(&self.pool, Arc::clone(&self.committer), done);
                    }
                    current = Some(Batch {
                        path: latest_path,
                        id: point.id.clone(),
                        lines: Vec::new(),
                    });
                }
            } else if let Some(batch) = current.as_ref().filter(|b| b.id != point.id) {
                return Err(CacheError::IdentityChanged {
                    previous: batch.id.to_string(),
                    current: point.id.to_string(),
                    date: point.time.date(),
                });
            }

            let text = line::generate_line(&point, resolution)?;
            if let Some(batch) = current.as_mut() {
                batch.lines.push(TimedLine::new(point.time, text));
            }
            last_time = Some(point.time);
        }

        match current {
            Some(batch) => {
                pending.settle(&batch.path);
                self.committer.commit(batch)
            }
            None => Ok(None),
        }
    }
}

impl Committer {
    fn commit(&self, batch: Batch) -> Result<Option<CommitReport>, CacheError> {
        if batch.lines.is_empty() {
            return Ok(None);
        }
        let lock_key = batch.path.to_string_lossy().into_owned();
        self.sync
            .execute(&lock_key, move || self.commit_locked(batch))
            .map(Some)
    }

    fn commit_locked(&self, batch: Batch) -> Result<CommitReport, CacheError> {
        let Batch { path, id, lines } = batch;
        let date = lines[0].time.date();
        let key = ArchiveKey::new(
            &path,
            ArchiveLayout::entry_name(&id, self.resolution, date),
        );

        let file_exists = path.exists();
        if !file_exists {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
            }
        }

        let rows = lines.len();
        let from = lines[0].time;
        let to = lines[rows - 1].time;

        let digest = match self.policy {
            WritePolicy::Append => {
                let new_lines: Vec<String> = lines.into_iter().map(|l| l.line).collect();
                self.store.append(&key, &new_lines)?;
                entry_digest(new_lines.join("\n").as_bytes())
            }
            WritePolicy::Merge if file_exists => {
                let data = match self.load_rows(&key, date) {
                    Some(mut existing) => {
                        for l in lines {
                            existing.insert(l.time, l.line);
                        }
                        join_lines(existing.into_values())
                    }
                    None => join_lines(lines.into_iter().map(|l| l.line)),
                };
                self.store.store(&key, data.as_bytes())?;
                entry_digest(data.as_bytes())
            }
            WritePolicy::Merge | WritePolicy::Overwrite => {
                let data = join_lines(lines.into_iter().map(|l| l.line));
                self.store.store(&key, data.as_bytes())?;
                entry_digest(data.as_bytes())
            }
        };

        tracing::debug!(
            series = %id,
            archive = %path.display(),
            entry = %key.entry,
            policy = %self.policy,
            %from,
            %to,
            rows,
            "committed partition"
        );

        Ok(CommitReport {
            key,
            policy: self.policy,
            rows,
            digest,
        })
    }

    /// Load an existing entry as `timestamp → line`. Anything that prevents a
    /// clean load (absent entry, unreadable archive, unparsable line) yields
    /// `None`, and the caller falls back to writing the batch alone.
    fn load_rows(&self, key: &ArchiveKey, date: NaiveDate) -> Option<BTreeMap<NaiveDateTime, String>> {
        let reader = match self.store.fetch(key) {
            Ok(Some(reader)) => reader,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "existing entry unreadable, overwriting");
                return None;
            }
        };

        let mut rows = BTreeMap::new();
        for text in reader.lines() {
            let text = match text {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "existing entry unreadable, overwriting");
                    return None;
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            match line::parse_time(&text, date, self.resolution) {
                Ok(time) => {
                    rows.insert(time, text);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "existing entry unparsable, overwriting");
                    return None;
                }
            }
        }
        Some(rows)
    }
}

fn join_lines(lines: impl Iterator<Item = String>) -> String {
    lines.collect::<Vec<_>>().join("\n")
}

type CommitOutcome = Result<Option<CommitReport>, CacheError>;

/// Commits dispatched to the pool, each with a one-shot channel for its result.
#[derive(Default)]
struct PendingCommits {
    handles: VecDeque<(PathBuf, mpsc::Receiver<CommitOutcome>)>,
    settled: Vec<CommitOutcome>,
}

impl PendingCommits {
    fn dispatch(&mut self, pool: &ThreadPool, committer: Arc<Committer>, batch: Batch) {
        self.settle(&batch.path);
        let (tx, rx) = mpsc::sync_channel(1);
        self.handles.push_back((batch.path.clone(), rx));
        pool.spawn(move || {
            // The receiver only goes away if `write` itself unwound.
            let _ = tx.send(committer.commit(batch));
        });
    }

    /// Wait for every commit dispatched up to the last one bound for `path`.
    fn settle(&mut self, path: &Path) {
        let Some(last) = self.handles.iter().rposition(|(p, _)| p == path) else {
            return;
        };
        for (path, rx) in self.handles.drain(..=last) {
            self.settled.push(receive(path, &rx));
        }
    }

    /// Wait for every dispatched commit. Returns the reports in dispatch order
    /// or the first error seen.
    fn join(self) -> Result<Vec<CommitReport>, CacheError> {
        let mut reports = Vec::with_capacity(self.settled.len() + self.handles.len());
        let mut first_error = None;

        let remaining = self.handles.into_iter().map(|(path, rx)| receive(path, &rx));
        for outcome in self.settled.into_iter().chain(remaining) {
            match outcome {
                Ok(report) => reports.extend(report),
                Err(e) => {
                    tracing::error!(error = %e, "partition commit failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}

fn receive(path: PathBuf, rx: &mpsc::Receiver<CommitOutcome>) -> CommitOutcome {
    rx.recv()
        .unwrap_or_else(|_| Err(CacheError::FlushAborted { path }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DiskArchiveStore;
    use std::io::Read;

    fn writer(dir: &Path, resolution: Resolution, policy: WritePolicy) -> PartitionWriter {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        PartitionWriter::new(
            resolution,
            policy,
            ArchiveLayout::new(dir, true),
            Arc::new(DiskArchiveStore::new()),
            Arc::new(KeySynchronizer::new()),
            Arc::new(pool),
        )
    }

    fn at(day: u32, secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(i64::from(secs))
    }

    fn read(key: &ArchiveKey) -> String {
        let mut s = String::new();
        DiskArchiveStore::new()
            .fetch(key)
            .unwrap()
            .expect("entry exists")
            .read_to_string(&mut s)
            .unwrap();
        s
    }

    #[test]
    fn merge_overlays_new_rows_on_existing() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Second, WritePolicy::Merge);
        let id = SeriesId::custom("GDP", "usa");
        let path = w.archive_path(&id, at(1, 0).date());

        w.commit_batch(
            &path,
            &id,
            vec![TimedLine::new(at(1, 10), "10000,a"), TimedLine::new(at(1, 20), "20000,b")],
        )
        .unwrap();
        let report = w
            .commit_batch(
                &path,
                &id,
                vec![TimedLine::new(at(1, 20), "20000,c"), TimedLine::new(at(1, 30), "30000,d")],
            )
            .unwrap()
            .unwrap();

        assert_eq!(read(&report.key), "10000,a\n20000,c\n30000,d");
    }

    #[test]
    fn unparsable_entry_falls_back_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Daily, WritePolicy::Merge);
        let id = SeriesId::custom("GDP", "usa");
        let path = w.archive_path(&id, at(1, 0).date());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let key = ArchiveKey::new(&path, "gdp.csv");
        DiskArchiveStore::new().store(&key, b"garbage line").unwrap();

        w.commit_batch(&path, &id, vec![TimedLine::new(at(2, 0), "20200102 00:00,1")])
            .unwrap();
        assert_eq!(read(&key), "20200102 00:00,1");
    }

    #[test]
    fn append_does_not_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Tick, WritePolicy::Append);
        let id = SeriesId::custom("GDP", "usa");
        let points = || vec![DataPoint::new(id.clone(), at(3, 5), 1.0)];

        w.write(points()).unwrap();
        let summary = w.write(points()).unwrap();
        assert_eq!(read(&summary.partitions[0].key), "5000,10000\n5000,10000");
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Daily, WritePolicy::Merge);
        let id = SeriesId::custom("GDP", "usa");
        let path = w.archive_path(&id, at(1, 0).date());
        assert_eq!(w.commit_batch(&path, &id, Vec::new()).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn empty_input_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Minute, WritePolicy::Overwrite);
        assert_eq!(w.write(Vec::new()).unwrap(), WriteSummary::default());
    }

    #[test]
    fn identity_change_within_a_day_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Minute, WritePolicy::Overwrite);
        let points = vec![
            DataPoint::new(SeriesId::custom("A", "usa"), at(1, 60), 1.0),
            DataPoint::new(SeriesId::custom("B", "usa"), at(1, 120), 2.0),
        ];
        assert!(matches!(
            w.write(points),
            Err(CacheError::IdentityChanged { .. })
        ));
    }

    #[test]
    fn batches_sharing_an_archive_commit_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Daily, WritePolicy::Overwrite);
        // Both spellings map to `gdp.json#gdp.csv`.
        let upper = SeriesId::custom("GDP", "usa");
        let lower = SeriesId::custom("gdp", "usa");
        let points: Vec<DataPoint> = (1..=6)
            .map(|d| {
                let id = if d % 2 == 1 { &upper } else { &lower };
                DataPoint::new(id.clone(), at(d, 0), f64::from(d))
            })
            .collect();

        let summary = w.write(points).unwrap();

        assert_eq!(summary.partitions.len(), 6);
        assert!(summary.partitions.iter().all(|p| p.key == summary.partitions[0].key));
        assert_eq!(read(&summary.partitions[0].key), "20200106 00:00,60000");
    }

    #[test]
    fn unstorable_value_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Minute, WritePolicy::Overwrite);
        let id = SeriesId::custom("GDP", "usa");
        let result = w.write(vec![
            DataPoint::new(id.clone(), at(1, 60), 1.0),
            DataPoint::new(id.clone(), at(2, 60), f64::NAN),
        ]);
        assert!(matches!(result, Err(CacheError::UnstorableValue { .. })));

        // The finished first day is still committed.
        let key = ArchiveLayout::new(dir.path(), true).entry_key(&id, Resolution::Minute, at(1, 0).date());
        assert_eq!(read(&key), "60000,10000");
    }

    #[test]
    fn equal_timestamps_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), Resolution::Tick, WritePolicy::Overwrite);
        let id = SeriesId::custom("GDP", "usa");
        let summary = w
            .write(vec![
                DataPoint::new(id.clone(), at(1, 1), 1.0),
                DataPoint::new(id.clone(), at(1, 1), 2.0),
            ])
            .unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(read(&summary.partitions[0].key), "1000,10000\n1000,20000");
    }

    #[test]
    fn store_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the category directory should be.
        fs::write(dir.path().join("custom"), b"").unwrap();
        let w = writer(dir.path(), Resolution::Daily, WritePolicy::Overwrite);
        let id = SeriesId::custom("GDP", "usa");
        let result = w.write(vec![DataPoint::new(id, at(1, 0), 1.0)]);
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }
}
