use bytes::Bytes;
use homestead_core::{MediaError, MediaResult};
use image::{GenericImageView, ImageReader};
use std::io::Cursor;

use super::placeholder::{placeholder_data_uri, PLACEHOLDER_SIZE};
use super::OptimizedImage;
use crate::traits::ImageCodec;

/// Re-encodes photos to lossless WebP.
#[derive(Debug, Clone)]
pub struct WebpImageCodec {
    placeholder_size: u32,
}

impl Default for WebpImageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WebpImageCodec {
    pub fn new() -> Self {
        Self {
            placeholder_size: PLACEHOLDER_SIZE,
        }
    }

    pub fn with_placeholder_size(mut self, size: u32) -> Self {
        self.placeholder_size = size.max(1);
        self
    }
}

impl ImageCodec for WebpImageCodec {
    fn optimize(&self, data: &[u8]) -> MediaResult<OptimizedImage> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| MediaError::Encode(format!("Failed to read image: {}", e)))?;
        let img = reader
            .decode()
            .map_err(|e| MediaError::Encode(format!("Failed to decode image: {}", e)))?;

        let (width, height) = img.dimensions();

        // Convert to RGBA for WebP encoding
        let rgba_img = img.to_rgba8();
        let encoder = webp::Encoder::from_rgba(&rgba_img, width, height);
        let webp_data = encoder
            .encode_simple(true, 100.0)
            .map_err(|e| MediaError::Encode(format!("WebP encoding failed: {:?}", e)))?;

        let placeholder = placeholder_data_uri(&img, self.placeholder_size)?;

        tracing::debug!(
            width = width,
            height = height,
            input_bytes = data.len(),
            output_bytes = webp_data.len(),
            "Image re-encoded to lossless WebP"
        );

        Ok(OptimizedImage {
            data: Bytes::copy_from_slice(&webp_data),
            placeholder,
            width,
            height,
        })
    }
}
