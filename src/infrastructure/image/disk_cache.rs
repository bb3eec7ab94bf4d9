//! Disk-based image cache for persistence across restarts.
//!
//! One file per entry, named by its [`CacheKey`], directly under the cache
//! directory. There is no index: the directory listing is the index.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheResult, ImageError};

use super::pending::PendingJobs;

/// Default entry time-to-live (7 days).
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default disk cache size cap in bytes (200 MB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Default number of writes allowed to run at once.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 4;

/// Default capacity of the background write queue.
pub const DEFAULT_WRITE_QUEUE: usize = 256;

const ENTRY_EXTENSION: &str = "img";
const TEMP_EXTENSION: &str = "tmp";

/// Tunables for [`DiskImageCache`].
#[derive(Debug, Clone)]
pub struct DiskCacheOptions {
    /// Size cap enforced by the sweep.
    pub max_size: u64,
    /// Concurrent background writes.
    pub write_concurrency: usize,
    /// Queued background writes before new ones are dropped.
    pub write_queue: usize,
}

impl Default for DiskCacheOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_CACHE_SIZE,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    /// Entries removed for exceeding the TTL.
    pub expired: usize,
    /// Entries removed to get back under the size cap.
    pub trimmed: usize,
    /// Bytes freed.
    pub freed_bytes: u64,
    /// Entries kept.
    pub retained: usize,
    /// Deletions that failed and were skipped.
    pub failed: usize,
}

/// Files and bytes currently on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiskUsage {
    /// Number of cache entries.
    pub files: usize,
    /// Total size in bytes.
    pub bytes: u64,
}

struct WriteJob {
    key: CacheKey,
    bytes: Bytes,
}

/// Disk-based cache of encoded image bytes.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    write_tx: mpsc::Sender<WriteJob>,
    pending: Arc<PendingJobs>,
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .field("pending_writes", &self.pending.len())
            .finish()
    }
}

impl DiskImageCache {
    /// Creates a disk cache in the specified directory and starts its
    /// background writer. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn new(cache_dir: PathBuf, options: DiskCacheOptions) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| ImageError::storage(format!("Failed to create cache dir: {e}")))?;

        let (write_tx, write_rx) = mpsc::channel(options.write_queue.max(1));
        let pending = Arc::new(PendingJobs::default());
        let semaphore = Arc::new(Semaphore::new(options.write_concurrency.max(1)));

        tokio::spawn(Self::run_writer_loop(
            cache_dir.clone(),
            write_rx,
            semaphore,
            pending.clone(),
        ));

        debug!(path = %cache_dir.display(), "Opened disk image cache");

        Ok(Self {
            cache_dir,
            max_size: options.max_size,
            write_tx,
            pending,
        })
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Worker loop draining queued writes under a concurrency limit.
    async fn run_writer_loop(
        cache_dir: PathBuf,
        mut write_rx: mpsc::Receiver<WriteJob>,
        semaphore: Arc<Semaphore>,
        pending: Arc<PendingJobs>,
    ) {
        while let Some(job) = write_rx.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                pending.finish();
                break;
            };
            let cache_dir = cache_dir.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                if let Err(e) = write_entry(&cache_dir, &job.key, &job.bytes).await {
                    warn!(key = %job.key, error = %e, "Failed to cache to disk");
                }
                drop(permit);
                pending.finish();
            });
        }
        trace!("Disk writer loop stopped");
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        entry_path(&self.cache_dir, key)
    }

    /// Reads the raw bytes for `key`.
    ///
    /// Missing, unreadable or empty files are all reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(Bytes::from(bytes))
            }
            Ok(_) => {
                debug!(key = %key, "Ignoring empty disk cache entry");
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Queues `bytes` to be written for `key` without waiting for the write.
    ///
    /// Overwrites any existing entry. A full queue drops the write.
    pub fn put(&self, key: CacheKey, bytes: Bytes) {
        self.pending.begin();
        if let Err(e) = self.write_tx.try_send(WriteJob { key, bytes }) {
            self.pending.finish();
            let job = e.into_inner();
            warn!(key = %job.key, "Disk write queue unavailable, dropping write");
        }
    }

    /// Writes `bytes` for `key` and waits for the write to land.
    ///
    /// # Errors
    /// Returns error if the file cannot be created, written or moved into place.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        write_entry(&self.cache_dir, key, bytes).await
    }

    /// Waits until every queued write has finished.
    pub async fn flush(&self) {
        self.pending.wait_idle().await;
    }

    /// Number of writes queued or running.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Removes the entry for `key`.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(key = %key, "Evicted from disk cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to evict from disk cache"),
        }
    }

    /// Checks if an entry exists.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.entry_path(key)).await.unwrap_or(false)
    }

    /// Deletes and recreates the cache directory.
    ///
    /// # Errors
    /// Returns error if the directory cannot be removed or recreated.
    pub async fn clear(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.cache_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ImageError::storage(format!(
                    "Failed to remove cache dir: {e}"
                )));
            }
        }
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| ImageError::storage(format!("Failed to recreate cache dir: {e}")))?;
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Scans the directory for current usage.
    pub async fn usage(&self) -> DiskUsage {
        let files = self.list_entries().await;
        DiskUsage {
            files: files.len(),
            bytes: files.iter().map(|f| f.size).sum(),
        }
    }

    /// Removes entries older than `ttl`, then trims to the size cap.
    pub async fn sweep(&self, ttl: Duration) -> SweepStats {
        self.sweep_at(SystemTime::now(), ttl).await
    }

    /// Runs a sweep as if the current time were `now`.
    ///
    /// Failures to delete single files are counted and skipped.
    pub async fn sweep_at(&self, now: SystemTime, ttl: Duration) -> SweepStats {
        self.sweep_with(now, ttl, |path| async move { fs::remove_file(path).await })
            .await
    }

    async fn sweep_with<F, Fut>(&self, now: SystemTime, ttl: Duration, remove: F) -> SweepStats
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let mut stats = SweepStats::default();
        let threshold = now.checked_sub(ttl);
        let mut survivors = Vec::new();

        for file in self.list_entries().await {
            let expired = threshold.is_some_and(|t| file.modified < t);
            if !expired {
                survivors.push(file);
                continue;
            }
            match remove(file.path.clone()).await {
                Ok(()) => {
                    trace!(path = %file.path.display(), "Removed expired cache file");
                    stats.expired += 1;
                    stats.freed_bytes += file.size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Failed to remove expired cache file");
                    stats.failed += 1;
                    survivors.push(file);
                }
            }
        }

        let mut current: u64 = survivors.iter().map(|f| f.size).sum();
        if current > self.max_size {
            debug!(
                current_size = current,
                max_size = self.max_size,
                "Disk cache over limit, trimming"
            );
            let target = self.max_size - self.max_size / 10;
            survivors.sort_by_key(|f| f.modified);
            let mut kept = Vec::with_capacity(survivors.len());
            for file in survivors {
                if current <= target {
                    kept.push(file);
                    continue;
                }
                match remove(file.path.clone()).await {
                    Ok(()) => {
                        current -= file.size;
                        stats.trimmed += 1;
                        stats.freed_bytes += file.size;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        current -= file.size;
                    }
                    Err(e) => {
                        warn!(path = %file.path.display(), error = %e, "Failed to trim cache file");
                        stats.failed += 1;
                        kept.push(file);
                    }
                }
            }
            survivors = kept;
        }

        stats.retained = survivors.len();
        debug!(
            expired = stats.expired,
            trimmed = stats.trimmed,
            freed_bytes = stats.freed_bytes,
            retained = stats.retained,
            "Disk cache sweep complete"
        );
        stats
    }

    /// Spawns a task sweeping every `interval`. The first sweep happens one
    /// interval from now.
    pub fn spawn_sweeper(self: &Arc<Self>, ttl: Duration, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let stats = cache.sweep(ttl).await;
                if stats.expired + stats.trimmed > 0 {
                    info!(
                        expired = stats.expired,
                        trimmed = stats.trimmed,
                        "Periodic disk cache sweep"
                    );
                }
            }
        })
    }

    /// Lists every file in the cache directory, including stale temp files.
    async fn list_entries(&self) -> Vec<CacheFile> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "Failed to read cache dir");
                }
                return files;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(CacheFile {
                path: entry.path(),
                modified,
                size: meta.len(),
            });
        }
        files
    }
}

struct CacheFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn entry_path(cache_dir: &Path, key: &CacheKey) -> PathBuf {
    cache_dir.join(format!("{}.{ENTRY_EXTENSION}", key.as_str()))
}

/// Writes through a uniquely named temp file and renames it into place.
async fn write_entry(cache_dir: &Path, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
    fs::create_dir_all(cache_dir)
        .await
        .map_err(|e| ImageError::storage(format!("Failed to create cache dir: {e}")))?;

    let path = entry_path(cache_dir, key);
    let temp = cache_dir.join(format!(
        ".{}.{}.{TEMP_EXTENSION}",
        key.as_str(),
        uuid::Uuid::new_v4().simple()
    ));

    let result = async {
        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| ImageError::storage(format!("Failed to create cache file: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| ImageError::storage(format!("Failed to write cache file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| ImageError::storage(format!("Failed to flush cache file: {e}")))?;
        drop(file);
        fs::rename(&temp, &path)
            .await
            .map_err(|e| ImageError::storage(format!("Failed to move cache file: {e}")))
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp).await;
    } else {
        debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored image in disk cache");
    }
    result
}
