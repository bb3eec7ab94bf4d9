//! Domain layer with core entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, ImageSource, ImageStatus, LoadedImage, TargetSize};
pub use errors::{CacheResult, ImageError};
pub use ports::{ImageLoaderPort, ImageTransport};
