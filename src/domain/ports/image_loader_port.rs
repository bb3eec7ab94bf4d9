//! Port definition for loading images.

use async_trait::async_trait;

use crate::domain::entities::{LoadedImage, TargetSize};
use crate::domain::errors::CacheResult;

/// Inbound port used by UI components.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageLoaderPort: Send + Sync {
    /// Loads an image, checking caches first then network.
    /// Returns the loaded image with source information.
    async fn request(&self, identifier: &str, target: Option<TargetSize>)
    -> CacheResult<LoadedImage>;

    /// Warms the caches for a batch of identifiers without blocking.
    fn prefetch(&self, identifiers: Vec<String>);

    /// Drops every cached image from memory and disk.
    async fn clear(&self);
}
