//! Homestead Media Processing Library
//!
//! HLS transcoding through an external `ffmpeg` and lossless WebP re-encoding
//! with a placeholder preview. The orchestration of a whole media job lives in
//! `homestead-services`; this crate only turns bytes into derived artifacts.

pub mod image;
pub mod traits;
pub mod video;

// Re-export commonly used types
pub use self::image::{OptimizedImage, WebpImageCodec};
pub use traits::{ImageCodec, TranscodeAdapter};
pub use video::{
    collect_output_files, hls_content_type, FfmpegTranscoder, HlsRendition, OutputFile,
    TranscodeProcess, TranscodeReport,
};
