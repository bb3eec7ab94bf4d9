//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::ImageError;

/// Port for the network byte-fetch collaborator.
///
/// Implementations apply HTTP-style success semantics (non-2xx is an
/// error) and own their timeout and retry policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Fetches the raw encoded bytes behind `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, ImageError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    /// Scripted transport that counts fetches per URL.
    pub struct MockTransport {
        responses: Mutex<HashMap<String, Result<Bytes, ImageError>>>,
        calls: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        delay: Duration,
    }

    impl MockTransport {
        /// Creates a transport with no scripted responses.
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                total: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        /// Delays every fetch, widening the window for concurrent callers.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Scripts a successful response.
        pub fn respond(&self, url: &str, bytes: impl Into<Bytes>) {
            self.responses
                .lock()
                .insert(url.to_string(), Ok(bytes.into()));
        }

        /// Scripts a failure.
        pub fn fail(&self, url: &str, error: ImageError) {
            self.responses.lock().insert(url.to_string(), Err(error));
        }

        /// Number of fetches issued for `url`.
        pub fn calls(&self, url: &str) -> usize {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }

        /// Number of fetches issued overall.
        pub fn total_calls(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ImageTransport for MockTransport {
        async fn fetch(&self, url: &str) -> Result<Bytes, ImageError> {
            self.total.fetch_add(1, Ordering::SeqCst);
            *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(ImageError::transport(format!("HTTP 404 for {url}"))))
        }
    }
}
