//! Best-effort cache warming.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, TargetSize};

use super::coordinator::FetchCoordinator;
use super::pending::PendingJobs;

/// Default number of prefetches allowed to run at once.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 2;

/// Primes the caches for batches of images in the background.
///
/// Runs through [`FetchCoordinator::request`], so a prefetch for a key that
/// is already loading attaches to that load. A small permit pool keeps
/// prefetches from crowding out on-demand requests.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    coordinator: Arc<FetchCoordinator>,
    permits: Arc<Semaphore>,
    pending: Arc<PendingJobs>,
    target: Option<TargetSize>,
}

impl Prefetcher {
    /// Creates a prefetcher running at most `concurrency` loads at once.
    #[must_use]
    pub fn new(coordinator: Arc<FetchCoordinator>, concurrency: usize) -> Self {
        Self {
            coordinator,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            pending: Arc::new(PendingJobs::default()),
            target: None,
        }
    }

    /// Downsamples prefetched images to `target`.
    #[must_use]
    pub const fn with_target(mut self, target: TargetSize) -> Self {
        self.target = Some(target);
        self
    }

    /// Starts background loads for every identifier not already in memory.
    ///
    /// Returns immediately. Failures are logged and dropped. Must be called
    /// within a Tokio runtime.
    pub fn prefetch<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scheduled = 0usize;
        for identifier in identifiers {
            let identifier = identifier.into();
            if self
                .coordinator
                .memory()
                .contains(&CacheKey::derive(&identifier))
            {
                trace!(url = %identifier, "Prefetch skipped, already in memory");
                continue;
            }

            let coordinator = self.coordinator.clone();
            let permits = self.permits.clone();
            let pending = self.pending.clone();
            let target = self.target;
            pending.begin();
            tokio::spawn(async move {
                if let Ok(_permit) = permits.acquire_owned().await {
                    match coordinator.request(&identifier, target).await {
                        Ok(loaded) => {
                            trace!(url = %identifier, source = %loaded.source, "Prefetched image");
                        }
                        Err(e) => debug!(url = %identifier, error = %e, "Prefetch failed"),
                    }
                }
                pending.finish();
            });
            scheduled += 1;
        }
        if scheduled > 0 {
            debug!(count = scheduled, "Scheduled image prefetch");
        }
    }

    /// Number of prefetches queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Waits until every scheduled prefetch has finished.
    pub async fn wait_idle(&self) {
        self.pending.wait_idle().await;
    }
}
