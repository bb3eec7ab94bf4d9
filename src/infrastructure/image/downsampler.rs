//! Memory-bounded image decoding.
//!
//! Oversized sources are decoded straight to a reduced size. For JPEG the
//! reduction happens inside the IDCT (1/2, 1/4 or 1/8 scale), so the
//! full-resolution bitmap is never allocated. Other formats decode under an
//! allocation limit and are then thumbnailed.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use tracing::{debug, trace};

use crate::domain::entities::TargetSize;
use crate::domain::errors::{CacheResult, ImageError};

/// Default display density factor.
pub const DEFAULT_DISPLAY_SCALE: f32 = 3.0;

/// Default factor by which a source must exceed the target to be reduced.
pub const DEFAULT_THRESHOLD: f32 = 2.0;

/// Default ceiling on decoder allocations (256 MiB).
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

/// Decodes encoded bytes, reducing oversized images to a target bound.
#[derive(Debug, Clone, Copy)]
pub struct Downsampler {
    display_scale: f32,
    threshold: f32,
    max_decode_bytes: u64,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_SCALE, DEFAULT_THRESHOLD)
    }
}

impl Downsampler {
    /// Creates a downsampler for the given density and threshold.
    #[must_use]
    pub const fn new(display_scale: f32, threshold: f32) -> Self {
        Self {
            display_scale,
            threshold,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    /// Overrides the decoder allocation ceiling.
    #[must_use]
    pub const fn with_max_decode_bytes(mut self, max: u64) -> Self {
        self.max_decode_bytes = max;
        self
    }

    /// Returns the pixel bound for `target` at this density.
    #[must_use]
    pub fn bound(&self, target: TargetSize) -> (u32, u32) {
        target.scaled(self.display_scale)
    }

    /// Decodes `bytes`, bounding the result by `target` at this density when
    /// the source is more than `threshold` times larger than `target`.
    /// Never upsamples.
    ///
    /// # Errors
    /// Returns [`ImageError::Decode`] if the bytes are not a decodable image.
    pub fn downsample(&self, bytes: &[u8], target: Option<TargetSize>) -> CacheResult<DynamicImage> {
        if bytes.is_empty() {
            return Err(ImageError::decode("empty image data"));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::decode(format!("Failed to read image header: {e}")))?;
        let Some(format) = reader.format() else {
            return Err(ImageError::decode("unrecognized image format"));
        };
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ImageError::decode(format!("Failed to read dimensions: {e}")))?;

        let Some((bound_w, bound_h)) = target
            .filter(|&t| self.exceeds(width, height, t))
            .map(|t| self.bound(t))
        else {
            trace!(width, height, "Decoding at native resolution");
            return self.decode_native(bytes, format);
        };

        let decoded = if format == ImageFormat::Jpeg {
            match decode_jpeg_scaled(bytes, bound_w, bound_h)? {
                Some(img) => img,
                None => self.decode_native(bytes, format)?,
            }
        } else {
            self.decode_native(bytes, format)?
        };

        let result = if decoded.width() > bound_w || decoded.height() > bound_h {
            decoded.thumbnail(bound_w, bound_h)
        } else {
            decoded
        };

        debug!(
            source_width = width,
            source_height = height,
            width = result.width(),
            height = result.height(),
            "Downsampled image"
        );
        Ok(result)
    }

    #[allow(clippy::cast_precision_loss)]
    fn exceeds(&self, width: u32, height: u32, target: TargetSize) -> bool {
        let threshold = if self.threshold.is_finite() && self.threshold >= 1.0 {
            self.threshold
        } else {
            1.0
        };
        width as f32 > target.width as f32 * threshold
            || height as f32 > target.height as f32 * threshold
    }

    fn decode_native(&self, bytes: &[u8], format: ImageFormat) -> CacheResult<DynamicImage> {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_decode_bytes);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        reader
            .decode()
            .map_err(|e| ImageError::decode(format!("Failed to decode image: {e}")))
    }
}

/// Decodes a JPEG at the smallest IDCT scale still covering the bound.
///
/// Returns `Ok(None)` for lossless JPEGs, which the IDCT scaler does not
/// reduce. Nothing is decoded in that case.
fn decode_jpeg_scaled(bytes: &[u8], bound_w: u32, bound_h: u32) -> CacheResult<Option<DynamicImage>> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder
        .read_info()
        .map_err(|e| ImageError::decode(format!("Failed to read JPEG header: {e}")))?;

    let Some(info) = decoder.info() else {
        return Ok(None);
    };
    if info.coding_process == jpeg_decoder::CodingProcess::Lossless {
        trace!("Lossless JPEG, skipping scaled decode");
        return Ok(None);
    }

    let requested_w = u16::try_from(bound_w).unwrap_or(u16::MAX);
    let requested_h = u16::try_from(bound_h).unwrap_or(u16::MAX);
    let (width, height) = decoder
        .scale(requested_w, requested_h)
        .map_err(|e| ImageError::decode(format!("Failed to scale JPEG: {e}")))?;
    let pixels = decoder
        .decode()
        .map_err(|e| ImageError::decode(format!("Failed to decode JPEG: {e}")))?;

    let (width, height) = (u32::from(width), u32::from(height));
    trace!(width, height, format = ?info.pixel_format, "Scaled JPEG decode");
    scaled_pixels_to_image(info.pixel_format, width, height, pixels).map(Some)
}

fn scaled_pixels_to_image(
    format: jpeg_decoder::PixelFormat,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
) -> CacheResult<DynamicImage> {
    let image = match format {
        jpeg_decoder::PixelFormat::L8 => {
            image::GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        jpeg_decoder::PixelFormat::L16 => {
            let samples = pixels
                .chunks_exact(2)
                .map(|p| u16::from_ne_bytes([p[0], p[1]]))
                .collect();
            image::ImageBuffer::from_raw(width, height, samples).map(DynamicImage::ImageLuma16)
        }
        jpeg_decoder::PixelFormat::RGB24 => {
            image::RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        jpeg_decoder::PixelFormat::CMYK32 => {
            image::RgbImage::from_raw(width, height, cmyk_to_rgb(&pixels)).map(DynamicImage::ImageRgb8)
        }
    };
    image.ok_or_else(|| ImageError::decode("Scaled JPEG buffer does not match its dimensions"))
}

/// Converts CMYK samples (0 is no ink) to RGB.
#[allow(clippy::cast_possible_truncation)]
fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(cmyk.len() / 4 * 3);
    for pixel in cmyk.chunks_exact(4) {
        let k = 255 - u16::from(pixel[3]);
        for &channel in &pixel[..3] {
            let c = 255 - u16::from(channel);
            rgb.push((k * c / 255) as u8);
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn test_large_jpeg_is_bounded_by_scaled_target() {
        let source = DynamicImage::ImageLuma8(image::GrayImage::new(4000, 3000));
        let bytes = encode(&source, ImageFormat::Jpeg);

        let out = Downsampler::new(3.0, 2.0)
            .downsample(&bytes, Some(TargetSize::square(200)))
            .unwrap();

        assert!(out.width().max(out.height()) <= 600);
        assert_eq!((out.width(), out.height()), (600, 450));
    }

    #[test_case(ImageFormat::Jpeg, 1600, 1200, 100, (200, 150) ; "rgb_jpeg")]
    #[test_case(ImageFormat::Png, 1600, 1200, 100, (200, 150) ; "png")]
    fn test_downsample_bounds(
        format: ImageFormat,
        width: u32,
        height: u32,
        side: u32,
        expected: (u32, u32),
    ) {
        let bytes = encode(&gradient(width, height), format);
        let out = Downsampler::new(2.0, 2.0)
            .downsample(&bytes, Some(TargetSize::square(side)))
            .unwrap();
        assert_eq!((out.width(), out.height()), expected);
    }

    #[test]
    fn test_wide_source_keeps_aspect_ratio() {
        let bytes = encode(&gradient(900, 300), ImageFormat::Png);
        let out = Downsampler::new(2.0, 2.0)
            .downsample(&bytes, Some(TargetSize::square(100)))
            .unwrap();
        assert_eq!(out.width(), 200);
        assert!((66..=67).contains(&out.height()));
    }

    #[test_case(120, 80, Some(TargetSize::square(200)) ; "smaller_than_target")]
    #[test_case(350, 300, Some(TargetSize::square(200)) ; "within_threshold")]
    #[test_case(3000, 2000, None ; "no_target")]
    fn test_native_resolution_kept(width: u32, height: u32, target: Option<TargetSize>) {
        let bytes = encode(&gradient(width, height), ImageFormat::Png);
        let out = Downsampler::new(3.0, 2.0).downsample(&bytes, target).unwrap();
        assert_eq!((out.width(), out.height()), (width, height));
    }

    #[test_case(1000, 1000 ; "five_times_target")]
    #[test_case(1100, 1100 ; "five_and_a_half_times_target")]
    fn test_threshold_measured_against_target_not_scaled_bound(width: u32, height: u32) {
        let bytes = encode(&gradient(width, height), ImageFormat::Png);
        let out = Downsampler::new(3.0, 2.0)
            .downsample(&bytes, Some(TargetSize::square(200)))
            .unwrap();
        assert_eq!((out.width(), out.height()), (600, 600));
    }

    #[test]
    fn test_source_past_threshold_but_under_bound_is_not_upsampled() {
        let bytes = encode(&gradient(500, 450), ImageFormat::Png);
        let out = Downsampler::new(3.0, 2.0)
            .downsample(&bytes, Some(TargetSize::square(200)))
            .unwrap();
        assert_eq!((out.width(), out.height()), (500, 450));
    }

    #[test]
    fn test_cmyk_conversion() {
        let pixels = vec![0, 0, 0, 0, 255, 0, 0, 0, 0, 0, 0, 255];
        assert_eq!(cmyk_to_rgb(&pixels), vec![255, 255, 255, 0, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_scaled_cmyk_buffer_becomes_rgb_image() {
        let pixels = vec![255u8; 4 * 6];
        let image =
            scaled_pixels_to_image(jpeg_decoder::PixelFormat::CMYK32, 3, 2, pixels).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert!(matches!(image, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_scaled_buffer_size_mismatch_is_decode_error() {
        let result = scaled_pixels_to_image(jpeg_decoder::PixelFormat::RGB24, 4, 4, vec![0; 5]);
        assert!(matches!(result, Err(ImageError::Decode { .. })));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = Downsampler::default()
            .downsample(b"definitely not an image", Some(TargetSize::square(10)))
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode { .. }));
    }

    #[test]
    fn test_empty_is_decode_error() {
        let err = Downsampler::default().downsample(&[], None).unwrap_err();
        assert!(matches!(err, ImageError::Decode { .. }));
    }

    #[test]
    fn test_truncated_jpeg_is_decode_error() {
        let bytes = encode(&gradient(64, 64), ImageFormat::Jpeg);
        let truncated = &bytes[..bytes.len() / 3];
        assert!(Downsampler::default().downsample(truncated, None).is_err());
    }

    #[test]
    fn test_allocation_limit_rejects_huge_native_decode() {
        let bytes = encode(&gradient(512, 512), ImageFormat::Png);
        let result = Downsampler::default()
            .with_max_decode_bytes(1024)
            .downsample(&bytes, None);
        assert!(matches!(result, Err(ImageError::Decode { .. })));
    }
}
