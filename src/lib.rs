//! Photocache - a tiered image cache for media-heavy feeds.
//!
//! Images are served from an in-memory LRU of decoded bitmaps, then from a
//! persistent disk store of encoded bytes, and finally from the network.
//! Concurrent requests for the same image share one load.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "photocache";
