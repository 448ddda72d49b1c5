//! Seams between the orchestrator and the media tools it drives.

use async_trait::async_trait;
use homestead_core::MediaResult;
use homestead_storage::ByteStream;
use std::path::Path;

use crate::image::OptimizedImage;
use crate::video::TranscodeReport;

/// Multi-rendition HLS transcoder.
#[async_trait]
pub trait TranscodeAdapter: Send + Sync {
    /// Feed `input` to the transcoder and wait until it has written a complete
    /// output set (master playlist plus one directory per rendition) into
    /// `output_dir`.
    ///
    /// Dropping the returned future stops the transcoder.
    async fn transcode(&self, input: ByteStream, output_dir: &Path)
        -> MediaResult<TranscodeReport>;
}

/// Still-image re-encoder.
///
/// Implementations are CPU bound; callers run them on the blocking pool.
pub trait ImageCodec: Send + Sync {
    /// Re-encode to lossless WebP and derive the placeholder preview.
    fn optimize(&self, data: &[u8]) -> MediaResult<OptimizedImage>;
}
