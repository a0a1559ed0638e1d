//! Age-based eviction sweeper
//!
//! Periodically walks the repository and deletes every blob whose
//! manifest is older than the configured maximum age.
//!
//! # States
//!
//! ```text
//!          tick (flag claimed)
//!   Idle ───────────────────────▶ Sweeping
//!    ▲                               │
//!    └───────── pass finished ───────┘
//!
//!   tick while Sweeping: dropped, counted as skipped
//! ```
//!
//! The flag is claimed with a compare-and-swap and released by a guard,
//! so at most one pass runs per sweeper even if `tick` is called from
//! several threads, and a panicking pass does not wedge it in Sweeping.
//!
//! Eviction is best-effort cleanup: a failed delete is logged and counted
//! and the pass moves on.

use crate::store::ShardStore;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;
use shardstore_common::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether a blob created at `created` is past `max_age_secs` at `now`
pub fn should_evict(created: DateTime<Utc>, max_age_secs: u64, now: DateTime<Utc>) -> bool {
    let elapsed_ms = i128::from(now.signed_duration_since(created).num_milliseconds());
    elapsed_ms > i128::from(max_age_secs) * 1000
}

/// Sweeper statistics
#[derive(Debug, Default)]
pub struct SweepStats {
    /// Passes run to completion
    pub passes: AtomicU64,
    /// Ticks dropped because a pass was already running
    pub skipped_ticks: AtomicU64,
    /// Blobs deleted across all passes
    pub evicted: AtomicU64,
    /// Unreadable manifests and failed deletes across all passes
    pub failures: AtomicU64,
}

/// Result of one completed pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Manifests examined
    pub scanned: u64,
    /// Blobs deleted
    pub evicted: u64,
    /// Manifests that could not be read or deleted
    pub failed: u64,
}

/// What a tick did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// A pass ran to completion
    Completed(SweepReport),
    /// Another pass was in progress, nothing was done
    Skipped,
}

/// Releases the sweeping flag when the pass ends
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Deletes blobs older than a maximum age
pub struct EvictionSweeper {
    store: Arc<ShardStore>,
    max_age_secs: u64,
    sweeping: AtomicBool,
    stats: SweepStats,
}

impl EvictionSweeper {
    /// Create a sweeper for `store`
    pub fn new(store: Arc<ShardStore>, max_age: Duration) -> Self {
        Self {
            store,
            max_age_secs: max_age.as_secs(),
            sweeping: AtomicBool::new(false),
            stats: SweepStats::default(),
        }
    }

    /// Maximum blob age
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Whether a pass is currently running
    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    /// Statistics
    pub const fn stats(&self) -> &SweepStats {
        &self.stats
    }

    /// Whether a blob created at `created` is due for eviction now
    pub fn is_expired(&self, created: DateTime<Utc>) -> bool {
        should_evict(created, self.max_age_secs, Utc::now())
    }

    /// Run one pass unless one is already running
    pub fn tick(&self) -> Result<SweepOutcome> {
        let Some(_guard) = SweepGuard::acquire(&self.sweeping) else {
            self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            debug!("Eviction sweep already in progress, skipping tick");
            return Ok(SweepOutcome::Skipped);
        };

        let report = self.sweep(Utc::now())?;

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .evicted
            .fetch_add(report.evicted, Ordering::Relaxed);
        self.stats
            .failures
            .fetch_add(report.failed, Ordering::Relaxed);

        Ok(SweepOutcome::Completed(report))
    }

    /// One pass: delete every expired blob as it is found
    fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        debug!(
            "Starting eviction sweep of {:?} (max age {}s)",
            self.store.root(),
            self.max_age_secs
        );

        for item in self.store.manifests()? {
            let manifest = match item {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Skipping unreadable manifest during sweep: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            if !should_evict(manifest.created, self.max_age_secs, now) {
                continue;
            }

            match self.store.delete(&manifest.file_id) {
                Ok(()) => {
                    report.evicted += 1;
                    debug!("Evicted {} (created {})", manifest.file_id, manifest.created);
                }
                Err(Error::ManifestNotFound { .. }) if !self.store.exists(&manifest.file_id) => {
                    debug!("{} already removed", manifest.file_id);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to evict {}: {}", manifest.file_id, e);
                }
            }
        }

        if report.evicted > 0 || report.failed > 0 {
            info!(
                "Eviction sweep finished: {} scanned, {} evicted, {} failed",
                report.scanned, report.evicted, report.failed
            );
        }

        Ok(report)
    }

    /// Drive [`Self::tick`] every `interval` on a background thread
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> Result<SweeperHandle> {
        let sweeper = Arc::clone(self);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("shardstore-sweeper".to_string())
            .spawn(move || {
                info!(
                    "Eviction sweeper started (max age {}s, every {:?})",
                    sweeper.max_age_secs, interval
                );

                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if let Err(e) = sweeper.tick() {
                                error!("Eviction sweep failed: {}", e);
                            }
                        }
                    }
                }

                info!("Eviction sweeper stopped");
            })?;

        Ok(SweeperHandle {
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(handle)),
        })
    }
}

/// Handle to a running background sweeper; stops it on drop
pub struct SweeperHandle {
    shutdown: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SweeperHandle {
    /// Stop the background thread, waiting for a running pass to finish
    pub fn shutdown(&self) {
        // Dropping the sender wakes the thread's select
        drop(self.shutdown.lock().take());

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Eviction sweeper thread panicked");
            }
        }
    }

    /// Whether the background thread is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DirEntries, FileSystem, LocalFs};
    use crate::fs::test_support::StickyManifestFs;
    use shardstore_common::{FileId, StoreConfig, UuidGenerator};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    const MAX_AGE: u64 = 60;

    fn test_sweeper() -> (TempDir, Arc<ShardStore>, EvictionSweeper) {
        let dir = tempdir().unwrap();
        let store = Arc::new(ShardStore::open(&StoreConfig::new(dir.path()).with_shard_width(1)).unwrap());
        let sweeper = EvictionSweeper::new(Arc::clone(&store), Duration::from_secs(MAX_AGE));
        (dir, store, sweeper)
    }

    /// Rewrite a blob's creation time
    fn backdate(store: &ShardStore, id: &FileId, secs: i64) {
        let mut manifest = store.manifest(id).unwrap();
        manifest.created = Utc::now() - chrono::Duration::seconds(secs);
        store.update_manifest(id, &manifest).unwrap();
    }

    #[test]
    fn test_should_evict() {
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(2 * MAX_AGE as i64);
        assert!(should_evict(old, MAX_AGE, now));
        assert!(!should_evict(now, MAX_AGE, now));

        // Strictly greater than the max age
        let edge = now - chrono::Duration::seconds(MAX_AGE as i64);
        assert!(!should_evict(edge, MAX_AGE, now));
        let past_edge = edge - chrono::Duration::milliseconds(1);
        assert!(should_evict(past_edge, MAX_AGE, now));

        // Timestamps from the future are never evicted
        let future = now + chrono::Duration::seconds(3600);
        assert!(!should_evict(future, 0, now));
    }

    #[test]
    fn test_is_expired() {
        let (_dir, _store, sweeper) = test_sweeper();
        assert!(sweeper.is_expired(Utc::now() - chrono::Duration::seconds(10 * 60)));
        assert!(!sweeper.is_expired(Utc::now()));
    }

    #[test]
    fn test_sweep_evicts_only_old_blobs() {
        let (_dir, store, sweeper) = test_sweeper();
        let old = store.add_bytes(b"old", "txt").unwrap();
        let fresh = store.add_bytes(b"fresh", "txt").unwrap();
        backdate(&store, &old, 2 * MAX_AGE as i64);
        let old_content = store.content_path(&old).unwrap();

        let outcome = sweeper.tick().unwrap();
        assert_eq!(
            outcome,
            SweepOutcome::Completed(SweepReport {
                scanned: 2,
                evicted: 1,
                failed: 0,
            })
        );

        assert!(!store.exists(&old));
        assert!(!old_content.exists());
        assert!(store.exists(&fresh));
        assert_eq!(sweeper.stats().evicted.load(Ordering::Relaxed), 1);
        assert_eq!(sweeper.stats().passes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sweep_evicts_many_in_one_pass() {
        let (_dir, store, sweeper) = test_sweeper();
        for _ in 0..150 {
            let id = store.add_bytes(b"x", "bin").unwrap();
            backdate(&store, &id, 3600);
        }
        let keep = store.add_bytes(b"keep", "bin").unwrap();

        let SweepOutcome::Completed(report) = sweeper.tick().unwrap() else {
            panic!("sweep was skipped");
        };
        assert_eq!(report.evicted, 150);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.exists(&keep));
    }

    #[test]
    fn test_sweep_tolerates_malformed_manifest() {
        let (_dir, store, sweeper) = test_sweeper();
        let broken = store.add_bytes(b"x", "bin").unwrap();
        std::fs::write(store.layout().manifest_path(&broken).unwrap(), b"nope").unwrap();
        let old = store.add_bytes(b"old", "bin").unwrap();
        backdate(&store, &old, 2 * MAX_AGE as i64);

        let SweepOutcome::Completed(report) = sweeper.tick().unwrap() else {
            panic!("sweep was skipped");
        };
        assert_eq!(report.failed, 1);
        assert_eq!(report.evicted, 1);
        assert!(!store.exists(&old));
    }

    #[test]
    fn test_sweep_counts_misplaced_manifest_as_failed() {
        let (_dir, store, sweeper) = test_sweeper();
        let moved = store.add_bytes(b"moved", "bin").unwrap();
        let mut manifest = store.manifest(&moved).unwrap();
        manifest.file_id = FileId::new("otherblob0099").unwrap();
        store.update_manifest(&moved, &manifest).unwrap();
        let old = store.add_bytes(b"old", "bin").unwrap();
        backdate(&store, &old, 2 * MAX_AGE as i64);

        let SweepOutcome::Completed(report) = sweeper.tick().unwrap() else {
            panic!("sweep was skipped");
        };
        assert_eq!(report.failed, 1);
        assert_eq!(report.evicted, 1);
        assert!(store.exists(&moved));
    }

    #[test]
    fn test_sweep_counts_undeletable_manifest_as_failed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            ShardStore::with_backends(
                &StoreConfig::new(dir.path()),
                Arc::new(StickyManifestFs),
                Arc::new(UuidGenerator),
            )
            .unwrap(),
        );
        let stuck = store.add_bytes(b"stuck", "bin").unwrap();
        backdate(&store, &stuck, 2 * MAX_AGE as i64);
        let sweeper = EvictionSweeper::new(Arc::clone(&store), Duration::from_secs(MAX_AGE));

        let SweepOutcome::Completed(report) = sweeper.tick().unwrap() else {
            panic!("sweep was skipped");
        };
        assert_eq!(report.evicted, 0);
        assert_eq!(report.failed, 1);
        assert!(store.exists(&stuck));
        assert_eq!(sweeper.stats().failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_flag_released_after_error() {
        let (dir, store, sweeper) = test_sweeper();
        std::fs::remove_dir_all(dir.path()).unwrap();

        assert!(sweeper.tick().is_err());
        assert!(!sweeper.is_sweeping());

        std::fs::create_dir_all(store.root()).unwrap();
        assert!(matches!(sweeper.tick().unwrap(), SweepOutcome::Completed(_)));
    }

    /// Filesystem that holds every root listing open for a while and
    /// records how many root listings overlap (one per pass)
    struct SlowRootFs {
        root: PathBuf,
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FileSystem for SlowRootFs {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            LocalFs.read(path)
        }

        fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            LocalFs.write(path, contents)
        }

        fn append(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            LocalFs.append(path, contents)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            LocalFs.remove_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            LocalFs.rename(from, to)
        }

        fn is_file(&self, path: &Path) -> bool {
            LocalFs.is_file(path)
        }

        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            LocalFs.create_dir_all(path)
        }

        fn read_dir<'a>(&'a self, path: &Path) -> io::Result<DirEntries<'a>> {
            if path == self.root {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                thread::sleep(self.delay);
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            LocalFs.read_dir(path)
        }
    }

    #[test]
    fn test_concurrent_ticks_never_overlap() {
        let dir = tempdir().unwrap();
        let fs = Arc::new(SlowRootFs {
            root: dir.path().to_path_buf(),
            delay: Duration::from_millis(200),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let store = Arc::new(
            ShardStore::with_backends(
                &StoreConfig::new(dir.path()),
                fs.clone(),
                Arc::new(UuidGenerator),
            )
            .unwrap(),
        );
        store.add_bytes(b"x", "bin").unwrap();

        let sweeper = Arc::new(EvictionSweeper::new(store, Duration::from_secs(MAX_AGE)));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let sweeper = Arc::clone(&sweeper);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    sweeper.tick().unwrap()
                })
            })
            .collect();
        let outcomes: Vec<SweepOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, SweepOutcome::Completed(_)))
            .count();
        let skipped = outcomes.len() - completed;

        assert_eq!(fs.max_active.load(Ordering::SeqCst), 1);
        assert!(completed >= 1);
        assert!(skipped >= 1);
        assert_eq!(
            sweeper.stats().skipped_ticks.load(Ordering::Relaxed),
            skipped as u64
        );
        assert!(!sweeper.is_sweeping());
    }

    #[test]
    fn test_background_sweeper_evicts_and_stops() {
        let (_dir, store, sweeper) = test_sweeper();
        let old = store.add_bytes(b"old", "bin").unwrap();
        backdate(&store, &old, 2 * MAX_AGE as i64);

        let sweeper = Arc::new(sweeper);
        let handle = sweeper.spawn(Duration::from_millis(20)).unwrap();
        assert!(handle.is_running());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.exists(&old) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!store.exists(&old));

        handle.shutdown();
        assert!(!handle.is_running());
        let passes = sweeper.stats().passes.load(Ordering::Relaxed);
        assert!(passes >= 1);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(sweeper.stats().passes.load(Ordering::Relaxed), passes);
    }

    #[test]
    fn test_two_sweepers_coexist() {
        let (_dir_a, store_a, sweeper_a) = test_sweeper();
        let (_dir_b, store_b, sweeper_b) = test_sweeper();

        let old_a = store_a.add_bytes(b"a", "bin").unwrap();
        backdate(&store_a, &old_a, 2 * MAX_AGE as i64);
        let fresh_b = store_b.add_bytes(b"b", "bin").unwrap();

        sweeper_a.tick().unwrap();
        sweeper_b.tick().unwrap();

        assert!(!store_a.exists(&old_a));
        assert!(store_b.exists(&fresh_b));
    }
}
