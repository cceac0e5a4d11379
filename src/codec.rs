//! External image-codec collaborator interface.
//!
//! The engine depends only on decode, resize and PNG encode; the concrete
//! codec is swappable. `StandardCodec` backs the interface with the `image`
//! crate.

use crate::error::{BlueprintError, Result};
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, ImageError, RgbaImage};
use std::io::Cursor;

/// A decoded, contiguous row-major RGBA buffer.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub trait ImageCodec: Send + Sync {
    /// Decode arbitrary container bytes to RGBA.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage>;

    /// Scale so that `max(width, height) <= target_max_dim`, preserving
    /// aspect ratio. Buffers already within the cap pass through untouched.
    fn resize(&self, rgba: &[u8], width: u32, height: u32, target_max_dim: u32)
        -> Result<DecodedImage>;

    /// Encode a three-channel raster as PNG bytes.
    fn encode_png(&self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;
}

/// `image`-crate backed codec used by default.
#[derive(Debug, Default)]
pub struct StandardCodec;

impl ImageCodec for StandardCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage> {
        let decoded = image::load_from_memory(bytes).map_err(|err| match err {
            ImageError::Unsupported(inner) => BlueprintError::UnsupportedFormat(inner.to_string()),
            other => BlueprintError::InvalidImage(other.to_string()),
        })?;

        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage {
            rgba: rgba.into_raw(),
            width,
            height,
        })
    }

    fn resize(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        target_max_dim: u32,
    ) -> Result<DecodedImage> {
        if width.max(height) <= target_max_dim {
            return Ok(DecodedImage {
                rgba: rgba.to_vec(),
                width,
                height,
            });
        }

        let buffer = RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or_else(|| {
            BlueprintError::internal("resize", "buffer length does not match dimensions")
        })?;

        let scale = target_max_dim as f64 / width.max(height) as f64;
        let new_w = ((width as f64 * scale).round() as u32).max(1);
        let new_h = ((height as f64 * scale).round() as u32).max(1);
        let resized = image::imageops::resize(&buffer, new_w, new_h, FilterType::Triangle);

        Ok(DecodedImage {
            rgba: resized.into_raw(),
            width: new_w,
            height: new_h,
        })
    }

    fn encode_png(&self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        PngEncoder::new(Cursor::new(&mut bytes))
            .write_image(rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| BlueprintError::internal("preview-encode", e.to_string()))?;
        Ok(bytes)
    }
}
