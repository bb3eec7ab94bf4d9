//! Domain entity definitions.

mod cache_key;
mod image;

pub use cache_key::{CacheKey, KEY_HEX_LEN};
pub use image::{ImageSource, ImageStatus, LoadedImage, TargetSize, decoded_cost};
