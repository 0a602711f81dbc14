//! Keyed critical sections.
//!
//! `KeySynchronizer` offers two flavours of per-key coordination:
//! - [`KeySynchronizer::execute`]: mutual exclusion. Callers for the same key
//!   queue up and run one at a time. Used around read-modify-write of an
//!   archive file.
//! - [`KeySynchronizer::execute_single`]: single-flight. A caller that finds
//!   the key already running returns `None` straight away instead of waiting.
//!   Used to avoid downloading the same series twice at once.
//!
//! Distinct keys never contend beyond the short map lookups, and no map lock is
//! held while an action runs, so actions may re-enter with other keys.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct KeySynchronizer {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: Mutex<HashSet<String>>,
}

impl KeySynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` while holding the exclusive section for `key`.
    ///
    /// The section is released on every exit path, panics included. Errors are
    /// whatever `action` returns.
    pub fn execute<T>(&self, key: &str, action: impl FnOnce() -> T) -> T {
        let lease = LockLease::acquire(self, key);
        let _guard = lease.lock.lock().unwrap_or_else(PoisonError::into_inner);
        action()
    }

    /// Run `action` unless another single-flight execution for `key` is active,
    /// in which case return `None` without running it.
    pub fn execute_single<T>(&self, key: &str, action: impl FnOnce() -> T) -> Option<T> {
        if !guard(&self.in_flight).insert(key.to_owned()) {
            return None;
        }
        let _marker = InFlight { sync: self, key };
        Some(action())
    }

    /// Whether a single-flight execution for `key` is currently running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        guard(&self.in_flight).contains(key)
    }

    /// Number of keys with a live exclusive section (held or awaited).
    pub fn active_locks(&self) -> usize {
        guard(&self.locks).len()
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reference-counted handle on one key's mutex. Removes the map entry when the
/// last holder goes away.
struct LockLease<'a> {
    sync: &'a KeySynchronizer,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> LockLease<'a> {
    fn acquire(sync: &'a KeySynchronizer, key: &'a str) -> Self {
        let lock = Arc::clone(guard(&sync.locks).entry(key.to_owned()).or_default());
        Self { sync, key, lock }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = guard(&self.sync.locks);
        // One reference in the map, one here: nobody else holds or waits.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.key);
        }
    }
}

struct InFlight<'a> {
    sync: &'a KeySynchronizer,
    key: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        guard(&self.sync.in_flight).remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn exclusive_sections_for_one_key_never_overlap() {
        let sync = Arc::new(KeySynchronizer::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (sync, active, max_seen) =
                    (Arc::clone(&sync), Arc::clone(&active), Arc::clone(&max_seen));
                thread::spawn(move || {
                    sync.execute("archive.json", || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(sync.active_locks(), 0);
    }

    #[test]
    fn distinct_keys_run_in_parallel() {
        let sync = Arc::new(KeySynchronizer::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                sync.execute("a", || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                })
            })
        };
        entered_rx.recv().unwrap();

        // "a" is held; "b" must not block on it.
        assert_eq!(sync.execute("b", || 7), 7);

        release_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn reentry_with_another_key_does_not_deadlock() {
        let sync = KeySynchronizer::new();
        let out = sync.execute("outer", || sync.execute("inner", || "done"));
        assert_eq!(out, "done");
    }

    #[test]
    fn single_flight_drops_concurrent_duplicates() {
        let sync = Arc::new(KeySynchronizer::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let first = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                sync.execute_single("SPY", || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    1
                })
            })
        };
        entered_rx.recv().unwrap();

        assert!(sync.is_in_flight("SPY"));
        assert_eq!(sync.execute_single("SPY", || 2), None);

        release_tx.send(()).unwrap();
        assert_eq!(first.join().unwrap(), Some(1));
        assert!(!sync.is_in_flight("SPY"));
        assert_eq!(sync.execute_single("SPY", || 3), Some(3));
    }

    #[test]
    fn errors_propagate_and_release_the_key() {
        let sync = KeySynchronizer::new();
        let res: Result<(), String> = sync.execute("k", || Err("boom".into()));
        assert_eq!(res, Err("boom".to_string()));
        assert_eq!(sync.active_locks(), 0);

        let res: Option<Result<(), String>> = sync.execute_single("k", || Err("boom".into()));
        assert!(matches!(res, Some(Err(_))));
        assert!(!sync.is_in_flight("k"));
    }

    #[test]
    fn panics_release_the_key() {
        let sync = Arc::new(KeySynchronizer::new());
        let s = Arc::clone(&sync);
        let result = thread::spawn(move || s.execute("k", || panic!("boom"))).join();
        assert!(result.is_err());
        assert_eq!(sync.active_locks(), 0);
        assert_eq!(sync.execute("k", || 1), 1);
    }
}
