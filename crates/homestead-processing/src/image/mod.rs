//! Image optimization: lossless WebP plus a tiny placeholder preview.

mod codec;
mod placeholder;

pub use self::codec::WebpImageCodec;
pub use self::placeholder::{placeholder_data_uri, PLACEHOLDER_SIZE};

use bytes::Bytes;

/// Output of one image optimization.
#[derive(Debug, Clone)]
pub struct OptimizedImage {
    /// Encoded WebP bytes.
    pub data: Bytes,
    /// `data:image/png;base64,...` preview for progressive loading.
    pub placeholder: String,
    pub width: u32,
    pub height: u32,
}
