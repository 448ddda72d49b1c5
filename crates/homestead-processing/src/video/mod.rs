//! Video processing module
//!
//! Transcodes one source video, read from a pipe, into a four-rendition HLS
//! output set on local disk.

pub mod ffmpeg;
pub mod output;
pub mod process;

pub use ffmpeg::{FfmpegTranscoder, HlsRendition, DEFAULT_RENDITIONS};
pub use output::{collect_output_files, hls_content_type, OutputFile};
pub use process::{TranscodeProcess, TranscodeReport, MAX_STDERR_BYTES};
