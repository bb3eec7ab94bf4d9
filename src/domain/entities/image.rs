//! Domain types for decoded images flowing through the cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::CacheKey;

/// Requested display size in points, before density scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    /// Width in points.
    pub width: u32,
    /// Height in points.
    pub height: u32,
}

impl TargetSize {
    /// Creates a target size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Creates a square target size.
    #[must_use]
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Returns the pixel bound for this size at the given display density.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn scaled(self, scale: f32) -> (u32, u32) {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        let w = (self.width as f32 * scale).round().max(1.0) as u32;
        let h = (self.height as f32 * scale).round().max(1.0) as u32;
        (w, h)
    }
}

/// Memory cost of a decoded image: width × height × 4 bytes.
#[must_use]
pub fn decoded_cost(image: &image::DynamicImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height()) * 4
}

/// A decoded image handed back to callers.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Key the image is cached under.
    pub key: CacheKey,
    /// Decoded pixels, shared with the memory cache.
    pub image: Arc<image::DynamicImage>,
    /// Tier that satisfied the request.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Returns the decoded dimensions.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory cache.
    MemoryCache,
    /// Loaded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Caller-facing outcome of an asynchronous load.
///
/// Carries no transport or storage detail; that is logged internally.
#[derive(Debug, Clone)]
pub enum ImageStatus {
    /// Image is decoded and ready for display.
    Ready(LoadedImage),
    /// Image could not be obtained from any tier.
    Unavailable,
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns the loaded image, if any.
    #[must_use]
    pub const fn image(&self) -> Option<&LoadedImage> {
        match self {
            Self::Ready(img) => Some(img),
            Self::Unavailable => None,
        }
    }
}
