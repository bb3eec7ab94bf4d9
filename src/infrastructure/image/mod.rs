//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction and a decoded-size budget
//! - Disk caching with expiry and a size cap
//! - Size-aware decoding
//! - Deduplicated fetching across the tiers

pub mod coordinator;
pub mod disk_cache;
pub mod downsampler;
pub mod http_transport;
pub mod memory_cache;
mod pending;
pub mod prefetcher;
pub mod service;

pub use coordinator::{CoordinatorStats, FetchCoordinator};
pub use disk_cache::{DiskCacheOptions, DiskImageCache, DiskUsage, SweepStats};
pub use downsampler::Downsampler;
pub use http_transport::HttpTransport;
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use prefetcher::Prefetcher;
pub use service::{ImageCacheService, ImageLoadedEvent, ServiceStats};
