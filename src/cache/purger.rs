//! Periodic sweep of the disk tier.
//!
//! Every `interval`, files in the cache directory whose mtime is more than
//! `ttl` in the past are deleted. Only committed entries (`<key>.webp`) and
//! leftover temp files are considered; anything else in the directory is
//! left alone. Per-file failures are logged and skipped.
//!
//! By default the sweep does not touch the memory tier, so a purged key can
//! still be served from memory until LRU eviction or restart. Attach the
//! coordinator with [`Purger::with_memory_eviction`] to close that window.
//!
//! A file's mtime is read before it is deleted. A write that renames a fresh
//! file over the same key in between loses that file (and, with memory
//! eviction on, its memory entry); the next request recomputes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::coordinator::CacheCoordinator;
use super::disk::{classify, EntryKind};
use super::key::CacheKey;

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Cache and temp files inspected.
    pub scanned: usize,
    /// Files deleted.
    pub removed: usize,
    /// Files whose metadata could not be read or that could not be deleted.
    pub failed: usize,
    /// Purged keys also dropped from memory.
    pub memory_evicted: usize,
}

#[derive(Debug, Default)]
struct SweepReport {
    stats: PurgeStats,
    removed_keys: Vec<CacheKey>,
}

/// Shortest accepted sweep period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Background reclaimer for stale disk entries.
pub struct Purger {
    dir: PathBuf,
    ttl: Duration,
    interval: Duration,
    cache: Option<Arc<CacheCoordinator>>,
}

impl Purger {
    /// `interval` is raised to [`MIN_INTERVAL`] when shorter.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            interval: interval.max(MIN_INTERVAL),
            cache: None,
        }
    }

    /// Also evict purged keys from `cache`'s memory tier.
    pub fn with_memory_eviction(mut self, cache: Arc<CacheCoordinator>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep against the current time.
    pub async fn sweep(&self) -> PurgeStats {
        self.sweep_at(SystemTime::now()).await
    }

    /// Run one sweep treating `now` as the current time.
    pub async fn sweep_at(&self, now: SystemTime) -> PurgeStats {
        let dir = self.dir.clone();
        let ttl = self.ttl;
        let report = match tokio::task::spawn_blocking(move || sweep_dir(&dir, ttl, now)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Purge sweep task failed");
                return PurgeStats::default();
            }
        };

        let mut stats = report.stats;
        if let Some(ref cache) = self.cache {
            stats.memory_evicted = cache.evict_memory(&report.removed_keys);
        }
        if stats.removed > 0 || stats.failed > 0 {
            info!(
                dir = %self.dir.display(),
                scanned = stats.scanned,
                removed = stats.removed,
                failed = stats.failed,
                memory_evicted = stats.memory_evicted,
                "Purged expired cache files"
            );
        } else {
            debug!(dir = %self.dir.display(), scanned = stats.scanned, "Purge sweep found nothing to remove");
        }
        stats
    }

    /// Sweep every `interval` until `shutdown_rx` turns `true`.
    ///
    /// The first sweep runs immediately. A sweep in progress always finishes
    /// before shutdown is observed.
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                dir = %self.dir.display(),
                ttl_secs = self.ttl.as_secs(),
                interval_secs = self.interval.as_secs(),
                "Cache purger started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Cache purger shutting down");
                            return;
                        }
                        continue;
                    }
                }
                self.sweep().await;
            }
        })
    }
}

fn sweep_dir(dir: &Path, ttl: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read cache directory");
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read cache directory entry");
                report.stats.failed += 1;
                continue;
            }
        };
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let key = match classify(&name) {
            EntryKind::Entry(key) => Some(key),
            EntryKind::Temp => None,
            EntryKind::Foreign => continue,
        };
        report.stats.scanned += 1;

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to read cache file metadata");
                report.stats.failed += 1;
                continue;
            }
        };
        if !is_expired(modified, now, ttl) {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(file = %name, "Deleted expired cache file");
                report.stats.removed += 1;
                if let Some(key) = key {
                    report.removed_keys.push(key);
                }
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to delete expired cache file");
                report.stats.failed += 1;
            }
        }
    }
    report
}

/// `now - modified > ttl`. Files from the future never expire.
fn is_expired(modified: SystemTime, now: SystemTime, ttl: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age > ttl)
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk::DiskStore;
    use crate::cache::memory::MemoryStore;
    use bytes::Bytes;
    use tempfile::TempDir;

    const MIN: Duration = Duration::from_secs(60);

    fn key(c: char) -> CacheKey {
        CacheKey::from_hex(&c.to_string().repeat(64)).unwrap()
    }

    fn write_aged(path: &Path, age: Duration) {
        std::fs::write(path, b"payload").unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn entry_path(dir: &Path, c: char) -> PathBuf {
        DiskStore::new(dir).path_for(&key(c))
    }

    #[test]
    fn test_is_expired() {
        let now = SystemTime::now();
        assert!(is_expired(now - 31 * MIN, now, 30 * MIN));
        assert!(!is_expired(now - 10 * MIN, now, 30 * MIN));
        assert!(!is_expired(now - 30 * MIN, now, 30 * MIN));
        assert!(!is_expired(now + MIN, now, 30 * MIN));
    }

    #[tokio::test]
    async fn test_sweep_removes_old_keeps_fresh() {
        let tmp = TempDir::new().unwrap();
        let old = entry_path(tmp.path(), 'a');
        let fresh = entry_path(tmp.path(), 'b');
        write_aged(&old, 31 * MIN);
        write_aged(&fresh, 10 * MIN);

        let purger = Purger::new(tmp.path(), 30 * MIN, 30 * MIN);
        let stats = purger.sweep().await;

        assert!(!old.exists());
        assert!(fresh.exists());
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_sweep_at_future_time_expires_everything() {
        let tmp = TempDir::new().unwrap();
        let path = entry_path(tmp.path(), 'a');
        write_aged(&path, Duration::ZERO);

        let purger = Purger::new(tmp.path(), 30 * MIN, 30 * MIN);
        assert_eq!(purger.sweep().await.removed, 0);
        let stats = purger.sweep_at(SystemTime::now() + 31 * MIN).await;
        assert_eq!(stats.removed, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sweep_ignores_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let foreign = tmp.path().join("someone-elses-file.txt");
        write_aged(&foreign, 120 * MIN);

        let stats = Purger::new(tmp.path(), 30 * MIN, 30 * MIN).sweep().await;
        assert!(foreign.exists());
        assert_eq!(stats.scanned, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_orphaned_temp_files() {
        let tmp = TempDir::new().unwrap();
        let orphan = tmp.path().join(".krofi-tmp-abc123");
        write_aged(&orphan, 60 * MIN);

        let stats = Purger::new(tmp.path(), 30 * MIN, 30 * MIN).sweep().await;
        assert!(!orphan.exists());
        assert_eq!(stats.removed, 1);
    }

    #[tokio::test]
    async fn test_sweep_missing_dir_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let stats = Purger::new(tmp.path().join("missing"), MIN, MIN)
            .sweep()
            .await;
        assert_eq!(stats, PurgeStats::default());
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_abort_sweep() {
        let tmp = TempDir::new().unwrap();
        // A non-empty directory named like an entry cannot be removed by
        // `remove_file`; the regular entry next to it must still go.
        let stuck = entry_path(tmp.path(), 'c');
        std::fs::create_dir_all(stuck.join("inner")).unwrap();
        let old = entry_path(tmp.path(), 'a');
        write_aged(&old, 31 * MIN);

        let purger = Purger::new(tmp.path(), 30 * MIN, 30 * MIN);
        let stats = purger.sweep_at(SystemTime::now() + 60 * MIN).await;
        assert!(!old.exists());
        assert!(stuck.exists());
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_purged_entry_still_served_from_memory_by_default() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(CacheCoordinator::new(
            MemoryStore::new(4).unwrap(),
            DiskStore::new(tmp.path()),
        ));
        cache.store(&key('a'), Bytes::from_static(b"A")).await.unwrap();

        let purger = Purger::new(tmp.path(), 30 * MIN, 30 * MIN);
        let stats = purger.sweep_at(SystemTime::now() + 31 * MIN).await;
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.memory_evicted, 0);
        assert!(cache.memory().contains(&key('a')));
    }

    #[tokio::test]
    async fn test_memory_eviction_on_purge() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(CacheCoordinator::new(
            MemoryStore::new(4).unwrap(),
            DiskStore::new(tmp.path()),
        ));
        cache.store(&key('a'), Bytes::from_static(b"A")).await.unwrap();
        cache.store(&key('b'), Bytes::from_static(b"B")).await.unwrap();
        write_aged(&cache.disk().path_for(&key('b')), Duration::ZERO);
        write_aged(&cache.disk().path_for(&key('a')), 31 * MIN);

        let purger = Purger::new(tmp.path(), 30 * MIN, 30 * MIN)
            .with_memory_eviction(Arc::clone(&cache));
        let stats = purger.sweep().await;
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.memory_evicted, 1);
        assert!(!cache.memory().contains(&key('a')));
        assert!(cache.memory().contains(&key('b')));
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let purger = Purger::new(tmp.path(), 30 * MIN, Duration::ZERO);
        assert_eq!(purger.interval(), MIN_INTERVAL);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = purger.spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawn_sweeps_and_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let old = entry_path(tmp.path(), 'a');
        write_aged(&old, 31 * MIN);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Purger::new(tmp.path(), 30 * MIN, Duration::from_millis(20))
            .spawn(shutdown_rx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while old.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!old.exists());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
