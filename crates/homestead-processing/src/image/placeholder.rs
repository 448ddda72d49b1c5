use base64::Engine;
use homestead_core::{MediaError, MediaResult};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Longest edge of a placeholder, in pixels.
pub const PLACEHOLDER_SIZE: u32 = 10;

const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Downscale `img` to fit within `size` x `size` (aspect ratio kept) and
/// return it as a base64 PNG data URI.
pub fn placeholder_data_uri(img: &DynamicImage, size: u32) -> MediaResult<String> {
    let thumbnail = img.thumbnail(size.max(1), size.max(1));

    let mut buffer = Vec::new();
    thumbnail
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| MediaError::Encode(format!("Failed to encode placeholder: {}", e)))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&buffer);
    Ok(format!("{}{}", DATA_URI_PREFIX, encoded))
}
