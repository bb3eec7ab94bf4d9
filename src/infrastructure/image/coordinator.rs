//! Fetch coordination across the memory, disk and network tiers.
//!
//! Concurrent requests for one key share a single load: the first caller
//! spawns it and registers a shared handle in the in-flight ledger, later
//! callers attach to that handle until it completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage, TargetSize};
use crate::domain::errors::{CacheResult, ImageError};
use crate::domain::ports::ImageTransport;

use super::disk_cache::DiskImageCache;
use super::downsampler::Downsampler;
use super::memory_cache::MemoryImageCache;

type SharedLoad = Shared<BoxFuture<'static, CacheResult<LoadedImage>>>;
type InFlightMap = Mutex<HashMap<CacheKey, SharedLoad>>;

/// Removes a ledger entry when its load task ends, including by panic.
struct InFlightGuard {
    coordinator: Arc<FetchCoordinator>,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.coordinator.in_flight.lock().remove(&self.key);
        trace!(key = %self.key, "Released in-flight entry");
    }
}

/// Counters describing coordinator activity.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CoordinatorStats {
    /// Network fetches issued.
    pub network_fetches: u64,
    /// Requests that attached to an existing in-flight load.
    pub coalesced: u64,
    /// Loads currently in flight.
    pub in_flight: usize,
}

/// Orchestrates lookups through memory, disk and network.
pub struct FetchCoordinator {
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    transport: Arc<dyn ImageTransport>,
    downsampler: Downsampler,
    in_flight: InFlightMap,
    network_fetches: AtomicU64,
    coalesced: AtomicU64,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("downsampler", &self.downsampler)
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator over the given tiers.
    #[must_use]
    pub fn new(
        memory: Arc<MemoryImageCache>,
        disk: Arc<DiskImageCache>,
        transport: Arc<dyn ImageTransport>,
        downsampler: Downsampler,
    ) -> Self {
        Self {
            memory,
            disk,
            transport,
            downsampler,
            in_flight: Mutex::new(HashMap::new()),
            network_fetches: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Returns the memory tier.
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryImageCache> {
        &self.memory
    }

    /// Returns the disk tier.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskImageCache> {
        &self.disk
    }

    /// Checks the memory tier without suspending.
    #[must_use]
    pub fn cached(&self, identifier: &str) -> Option<LoadedImage> {
        let key = CacheKey::derive(identifier);
        self.memory.get(&key).map(|image| LoadedImage {
            key,
            image,
            source: ImageSource::MemoryCache,
        })
    }

    /// Loads an image, checking caches first.
    ///
    /// A memory hit returns without suspending. Otherwise the request joins
    /// the in-flight load for its key, starting one if none exists.
    ///
    /// # Errors
    /// Returns [`ImageError::Transport`] or [`ImageError::Decode`] when the
    /// network tier fails. Nothing is cached for a failed load.
    pub async fn request(
        self: &Arc<Self>,
        identifier: &str,
        target: Option<TargetSize>,
    ) -> CacheResult<LoadedImage> {
        if let Some(hit) = self.cached(identifier) {
            return Ok(hit);
        }
        self.join_or_start(CacheKey::derive(identifier), identifier, target)
            .await
    }

    /// Returns true if a load for `identifier` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, identifier: &str) -> bool {
        self.in_flight
            .lock()
            .contains_key(&CacheKey::derive(identifier))
    }

    /// Returns the number of loads in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            in_flight: self.in_flight_count(),
        }
    }

    fn join_or_start(
        self: &Arc<Self>,
        key: CacheKey,
        identifier: &str,
        target: Option<TargetSize>,
    ) -> SharedLoad {
        let mut in_flight = self.in_flight.lock();

        if let Some(existing) = in_flight.get(&key) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Attaching to in-flight load");
            return existing.clone();
        }

        // A load may have finished between the memory check and taking the lock.
        if let Some(image) = self.memory.peek(&key) {
            let hit = LoadedImage {
                key,
                image,
                source: ImageSource::MemoryCache,
            };
            return futures_util::future::ready(Ok(hit)).boxed().shared();
        }

        let (result_tx, result_rx) = oneshot::channel();
        let load = async move {
            result_rx
                .await
                .unwrap_or_else(|_| Err(ImageError::unexpected("Load task ended without a result")))
        }
        .boxed()
        .shared();
        in_flight.insert(key.clone(), load.clone());
        drop(in_flight);

        // The ledger lock must be released before spawning: a runtime that is
        // shutting down drops the task, and with it the guard, inline.
        let guard = InFlightGuard {
            coordinator: Arc::clone(self),
            key,
        };
        let url = identifier.to_string();
        tokio::spawn(async move {
            let result = guard.coordinator.load(&guard.key, &url, target).await;
            drop(guard);
            let _ = result_tx.send(result);
        });

        load
    }

    /// Disk then network for a key with no memory entry.
    async fn load(
        &self,
        key: &CacheKey,
        url: &str,
        target: Option<TargetSize>,
    ) -> CacheResult<LoadedImage> {
        if let Some(bytes) = self.disk.get(key).await {
            match self.decode(bytes, target).await {
                Ok(image) => {
                    let image = Arc::new(image);
                    self.memory.put(key.clone(), image.clone());
                    debug!(key = %key, source = "disk", "Image loaded successfully");
                    return Ok(LoadedImage {
                        key: key.clone(),
                        image,
                        source: ImageSource::DiskCache,
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable disk cache entry");
                    self.disk.evict(key).await;
                }
            }
        }

        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, url = %url, "Downloading image from network");

        let bytes = self.transport.fetch(url).await.inspect_err(|e| {
            warn!(key = %key, url = %url, error = %e, "Image download failed");
        })?;
        if bytes.is_empty() {
            warn!(key = %key, url = %url, "Image download returned an empty body");
            return Err(ImageError::transport("empty response body"));
        }

        let image = self.decode(bytes.clone(), target).await.inspect_err(|e| {
            warn!(key = %key, url = %url, error = %e, "Downloaded image failed to decode");
        })?;
        let image = Arc::new(image);

        self.memory.put(key.clone(), image.clone());
        self.disk.put(key.clone(), bytes);

        debug!(key = %key, source = "network", "Image loaded successfully");

        Ok(LoadedImage {
            key: key.clone(),
            image,
            source: ImageSource::Network,
        })
    }

    async fn decode(
        &self,
        bytes: Bytes,
        target: Option<TargetSize>,
    ) -> CacheResult<image::DynamicImage> {
        let downsampler = self.downsampler;
        tokio::task::spawn_blocking(move || downsampler.downsample(&bytes, target))
            .await
            .map_err(|e| ImageError::unexpected(format!("Decode task panicked: {e}")))?
    }

    /// Clears both cache tiers. Loads already in flight still complete.
    ///
    /// # Errors
    /// Returns error if the disk cache directory cannot be recreated.
    pub async fn clear(&self) -> CacheResult<()> {
        self.memory.clear();
        self.disk.clear().await
    }
}
