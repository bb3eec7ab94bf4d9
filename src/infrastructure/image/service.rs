//! The shared image cache service.
//!
//! Constructed once at startup and handed to consumers behind an `Arc`.
//! Owns the tiers, the coordinator, the prefetcher and the periodic sweeper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::entities::{CacheKey, ImageStatus, LoadedImage, TargetSize};
use crate::domain::errors::CacheResult;
use crate::domain::ports::{ImageLoaderPort, ImageTransport};
use crate::infrastructure::config::CacheConfig;

use super::coordinator::{CoordinatorStats, FetchCoordinator};
use super::disk_cache::{DiskImageCache, DiskUsage, SweepStats};
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::prefetcher::Prefetcher;

/// Message sent when an asynchronous load finishes.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// The requested identifier.
    pub identifier: String,
    /// The derived cache key.
    pub key: CacheKey,
    /// The image, or `Unavailable`.
    pub status: ImageStatus,
}

/// Snapshot of every tier's counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    /// Memory tier.
    pub memory: CacheStats,
    /// Disk tier.
    pub disk: DiskUsage,
    /// Fetch coordination.
    pub coordinator: CoordinatorStats,
}

/// Tiered image cache with a defined lifecycle.
pub struct ImageCacheService {
    coordinator: Arc<FetchCoordinator>,
    prefetcher: Prefetcher,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    event_tx: Option<mpsc::UnboundedSender<ImageLoadedEvent>>,
}

impl std::fmt::Debug for ImageCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCacheService")
            .field("coordinator", &self.coordinator)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ImageCacheService {
    /// Opens the caches, runs the startup sweep and starts the periodic
    /// sweeper. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the disk cache directory cannot be created.
    pub async fn new(config: &CacheConfig, transport: Arc<dyn ImageTransport>) -> CacheResult<Self> {
        let ttl = config.ttl();
        let disk = Arc::new(DiskImageCache::new(config.cache_dir(), config.disk_options()).await?);

        let initial = disk.sweep(ttl).await;
        info!(
            path = %disk.cache_dir().display(),
            expired = initial.expired,
            trimmed = initial.trimmed,
            retained = initial.retained,
            "Image cache opened"
        );

        let memory = Arc::new(MemoryImageCache::new(
            config.memory_count_limit,
            config.memory_cost_limit,
        ));
        let sweeper = config
            .sweep_interval()
            .map(|interval| disk.spawn_sweeper(ttl, interval));
        let coordinator = Arc::new(FetchCoordinator::new(
            memory,
            disk,
            transport,
            config.downsampler(),
        ));
        let mut prefetcher = Prefetcher::new(coordinator.clone(), config.prefetch_concurrency);
        if let Some(target) = config.prefetch_target {
            prefetcher = prefetcher.with_target(target);
        }

        Ok(Self {
            coordinator,
            prefetcher,
            ttl,
            sweeper: Mutex::new(sweeper),
            event_tx: None,
        })
    }

    /// Delivers [`ImageLoadedEvent`]s from [`Self::load_async`] to `event_tx`.
    ///
    /// Events are sent from worker tasks; the receiver is responsible for
    /// moving them onto its presentation context.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<ImageLoadedEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Returns the fetch coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.coordinator
    }

    /// Checks memory synchronously.
    #[must_use]
    pub fn cached(&self, identifier: &str) -> Option<LoadedImage> {
        self.coordinator.cached(identifier)
    }

    /// Loads an image through memory, disk and network.
    ///
    /// # Errors
    /// Returns the terminal network-tier error if every tier missed.
    pub async fn request(
        &self,
        identifier: &str,
        target: Option<TargetSize>,
    ) -> CacheResult<LoadedImage> {
        self.coordinator.request(identifier, target).await
    }

    /// Starts loading an image; the outcome is sent as an [`ImageLoadedEvent`].
    pub fn load_async(&self, identifier: String, target: Option<TargetSize>) {
        let coordinator = self.coordinator.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let status = match coordinator.request(&identifier, target).await {
                Ok(loaded) => ImageStatus::Ready(loaded),
                Err(e) => {
                    debug!(url = %identifier, error = %e, "Image unavailable");
                    ImageStatus::Unavailable
                }
            };
            let Some(event_tx) = event_tx else {
                return;
            };
            let event = ImageLoadedEvent {
                key: CacheKey::derive(&identifier),
                identifier,
                status,
            };
            if event_tx.send(event).is_err() {
                debug!("Image event receiver dropped");
            }
        });
    }

    /// Warms the caches for a batch of identifiers in the background.
    pub fn prefetch<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefetcher.prefetch(identifiers);
    }

    /// Waits for scheduled prefetches to finish.
    pub async fn wait_for_prefetch(&self) {
        self.prefetcher.wait_idle().await;
    }

    /// Runs a disk sweep now.
    pub async fn sweep(&self) -> SweepStats {
        self.coordinator.disk().sweep(self.ttl).await
    }

    /// Clears every cache tier.
    pub async fn clear(&self) {
        if let Err(e) = self.coordinator.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }

    /// Returns counters for every tier.
    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            memory: self.coordinator.memory().stats(),
            disk: self.coordinator.disk().usage().await,
            coordinator: self.coordinator.stats(),
        }
    }

    /// Stops the sweeper and waits for queued disk writes to land.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.coordinator.disk().flush().await;
        info!("Image cache shut down");
    }
}

impl Drop for ImageCacheService {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ImageLoaderPort for ImageCacheService {
    async fn request(
        &self,
        identifier: &str,
        target: Option<TargetSize>,
    ) -> CacheResult<LoadedImage> {
        Self::request(self, identifier, target).await
    }

    fn prefetch(&self, identifiers: Vec<String>) {
        Self::prefetch(self, identifiers);
    }

    async fn clear(&self) {
        Self::clear(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use bytes::Bytes;
    use tempfile::TempDir;

    use crate::domain::entities::ImageSource;
    use crate::domain::errors::ImageError;
    use crate::domain::ports::mocks::MockTransport;

    const URL: &str = "https://cdn.example.com/matches/7/photo.jpg";

    fn jpeg(width: u32, height: u32) -> Bytes {
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(buf.into_inner())
    }

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            disk_dir: Some(dir.path().join("images")),
            sweep_interval_secs: 0,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_load_async_delivers_ready_event() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, jpeg(40, 30));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = ImageCacheService::new(&config(&temp), transport)
            .await
            .unwrap()
            .with_events(tx);

        service.load_async(URL.to_string(), None);
        let event = rx.recv().await.unwrap();

        assert_eq!(event.identifier, URL);
        assert_eq!(event.key, CacheKey::derive(URL));
        assert_eq!(event.status.image().map(LoadedImage::dimensions), Some((40, 30)));
    }

    #[tokio::test]
    async fn test_load_async_reports_unavailable_without_detail() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.fail(URL, ImageError::transport("HTTP 502: Bad Gateway"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = ImageCacheService::new(&config(&temp), transport)
            .await
            .unwrap()
            .with_events(tx);

        service.load_async(URL.to_string(), None);
        let event = rx.recv().await.unwrap();

        assert!(matches!(event.status, ImageStatus::Unavailable));
    }

    #[tokio::test]
    async fn test_disk_entries_survive_restart() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, jpeg(16, 16));

        {
            let service = ImageCacheService::new(&config(&temp), transport.clone())
                .await
                .unwrap();
            service.request(URL, None).await.unwrap();
            service.shutdown().await;
        }

        let service = ImageCacheService::new(&config(&temp), transport.clone())
            .await
            .unwrap();
        let loaded = service.request(URL, None).await.unwrap();

        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(transport.calls(URL), 1);
    }

    #[tokio::test]
    async fn test_startup_sweep_removes_expired_entries() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, jpeg(8, 8));
        let mut config = config(&temp);

        {
            let service = ImageCacheService::new(&config, transport.clone())
                .await
                .unwrap();
            service.request(URL, None).await.unwrap();
            service.shutdown().await;
        }

        config.disk_ttl_days = 0;
        let service = ImageCacheService::new(&config, transport.clone())
            .await
            .unwrap();
        assert_eq!(service.stats().await.disk.files, 0);
    }

    #[tokio::test]
    async fn test_port_clear_and_stats() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, jpeg(8, 8));
        let service: Arc<ImageCacheService> = Arc::new(
            ImageCacheService::new(&config(&temp), transport.clone())
                .await
                .unwrap(),
        );
        let port: Arc<dyn ImageLoaderPort> = service.clone();

        port.request(URL, None).await.unwrap();
        service.shutdown().await;
        let stats = service.stats().await;
        assert_eq!(stats.memory.size, 1);
        assert_eq!(stats.disk.files, 1);
        assert_eq!(stats.coordinator.network_fetches, 1);

        port.clear().await;
        let stats = service.stats().await;
        assert_eq!(stats.memory.size, 0);
        assert_eq!(stats.disk.files, 0);
    }

    #[tokio::test]
    async fn test_prefetch_through_service() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let urls: Vec<String> = (0..3).map(|i| format!("https://x.test/{i}.jpg")).collect();
        for url in &urls {
            transport.respond(url, jpeg(10, 10));
        }
        let service = ImageCacheService::new(&config(&temp), transport.clone())
            .await
            .unwrap();

        service.prefetch(urls.clone());
        service.wait_for_prefetch().await;

        for url in &urls {
            assert!(service.cached(url).is_some());
        }
        assert_eq!(transport.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_prefetch_decodes_for_configured_target() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond(URL, jpeg(800, 600));
        let config = CacheConfig {
            prefetch_target: Some(TargetSize::square(40)),
            ..config(&temp)
        };
        let service = ImageCacheService::new(&config, transport.clone())
            .await
            .unwrap();

        service.prefetch([URL]);
        service.wait_for_prefetch().await;
        let loaded = service
            .request(URL, Some(TargetSize::square(40)))
            .await
            .unwrap();

        assert_eq!(loaded.source, ImageSource::MemoryCache);
        assert_eq!(loaded.dimensions(), (120, 90));
        assert_eq!(transport.calls(URL), 1);
    }
}
