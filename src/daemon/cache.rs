//! Per-workspace storage handle cache.
//!
//! Keyed by canonical workspace root. Handles are invalidated when the
//! database file's mtime changes (another process wrote it), evicted by
//! TTL, by LRU when over capacity, and by half when process RSS crosses
//! the memory threshold. Handle drops happen outside the cache lock so
//! closing never blocks readers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::config::{WorkspacePaths, canonical_root};
use crate::daemon::metrics::Metrics;
use crate::error::Result;
use crate::storage::SqliteStorage;

/// Shared handle to one workspace's storage.
pub type StorageHandle = Arc<Mutex<SqliteStorage>>;

struct CacheEntry {
    handle: StorageHandle,
    last_access: Instant,
    db_mtime: Option<SystemTime>,
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub max_size: usize,
    pub ttl: Duration,
    pub memory_threshold_mb: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_size: 50,
            ttl: Duration::from_secs(30 * 60),
            memory_threshold_mb: 500,
        }
    }
}

/// The cache itself; owned by the server instance.
pub struct StorageCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
    options: CacheOptions,
    metrics: Arc<Metrics>,
}

impl StorageCache {
    #[must_use]
    pub fn new(options: CacheOptions, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            options,
            metrics,
        }
    }

    /// Fetch (or open) the storage handle for a workspace root.
    ///
    /// A cached handle is only reused while the database file's mtime is
    /// unchanged; an external mutation evicts and reopens.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn get(&self, workspace_root: &Path) -> Result<StorageHandle> {
        let key = canonical_root(workspace_root);
        let db_path = WorkspacePaths::for_root(&key).db_path();
        let current_mtime = std::fs::metadata(&db_path)
            .and_then(|m| m.modified())
            .ok();

        let mut stale: Option<CacheEntry> = None;
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(&key) {
                if entry.db_mtime == current_mtime {
                    entry.last_access = Instant::now();
                    self.metrics.cache_hit();
                    return Ok(Arc::clone(&entry.handle));
                }
                // Mutated externally: evict, close outside the lock.
                stale = entries.remove(&key);
            }
        }
        if stale.is_some() {
            self.metrics.cache_eviction(1);
            drop(stale);
        }

        self.metrics.cache_miss();
        let handle: StorageHandle = Arc::new(Mutex::new(SqliteStorage::open(&db_path)?));
        let db_mtime = std::fs::metadata(&db_path)
            .and_then(|m| m.modified())
            .ok();

        let mut displaced: Vec<CacheEntry> = Vec::new();
        {
            let mut entries = self.entries.lock();
            // Another request may have opened concurrently; keep theirs.
            if let Some(entry) = entries.get_mut(&key) {
                entry.last_access = Instant::now();
                return Ok(Arc::clone(&entry.handle));
            }
            entries.insert(
                key,
                CacheEntry {
                    handle: Arc::clone(&handle),
                    last_access: Instant::now(),
                    db_mtime,
                },
            );

            // LRU enforcement when over capacity.
            while entries.len() > self.options.max_size {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        if let Some(entry) = entries.remove(&k) {
                            displaced.push(entry);
                        }
                    }
                    None => break,
                }
            }
        }
        if !displaced.is_empty() {
            self.metrics.cache_eviction(displaced.len() as u64);
            drop(displaced);
        }

        Ok(handle)
    }

    /// Periodic sweep: TTL eviction plus memory-pressure eviction of the
    /// oldest half when RSS is over the threshold.
    pub fn sweep(&self) {
        let now = Instant::now();
        let over_memory = process_rss_mb().is_some_and(|rss| rss > self.options.memory_threshold_mb);

        let mut evicted: Vec<CacheEntry> = Vec::new();
        {
            let mut entries = self.entries.lock();

            let expired: Vec<PathBuf> = entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_access) > self.options.ttl)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                if let Some(entry) = entries.remove(&key) {
                    evicted.push(entry);
                }
            }

            if over_memory && !entries.is_empty() {
                let mut by_age: Vec<(PathBuf, Instant)> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.last_access))
                    .collect();
                by_age.sort_by_key(|(_, at)| *at);
                for (key, _) in by_age.into_iter().take(entries.len().div_ceil(2)) {
                    if let Some(entry) = entries.remove(&key) {
                        evicted.push(entry);
                    }
                }
            }
        }

        if !evicted.is_empty() {
            self.metrics.cache_eviction(evicted.len() as u64);
            tracing::debug!(evicted = evicted.len(), "storage cache sweep");
            drop(evicted);
        }
    }

    /// Drop every cached handle (shutdown).
    pub fn drain(&self) {
        let drained: Vec<CacheEntry> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, e)| e).collect()
        };
        drop(drained);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Resident set size in MiB, from `/proc/self/statm`. `None` where the
/// proc filesystem is unavailable.
#[must_use]
pub fn process_rss_mb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096 / (1024 * 1024))
}
