//! Infrastructure layer with caching, transport and configuration adapters.

/// Application configuration.
pub mod config;
/// Image caching, decoding and fetching.
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, Command, LogLevel, StorageManager};
pub use image::{
    CacheStats, DiskImageCache, Downsampler, FetchCoordinator, HttpTransport, ImageCacheService,
    ImageLoadedEvent, MemoryImageCache, Prefetcher,
};
