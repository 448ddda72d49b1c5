//! Key prefixes, content types and queue defaults.

/// Prefix under which transcoded HLS output sets are uploaded.
pub const HLS_OUTPUT_PREFIX: &str = "hls_output";

/// Prefix under which re-encoded images are uploaded.
pub const OPTIMIZED_IMAGE_PREFIX: &str = "optimize_image";

/// Master playlist written by the transcoder at the root of each output set.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

pub const HLS_PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const HLS_SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const WEBP_CONTENT_TYPE: &str = "image/webp";
pub const WEBP_EXTENSION: &str = "webp";

/// Search index holding one document per property listing.
pub const PROPERTIES_INDEX: &str = "properties";

pub const DEFAULT_QUEUE_CONCURRENCY: usize = 50;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3_600;
pub const DEFAULT_COMPLETED_RETENTION_SECS: i64 = 3_600;
pub const DEFAULT_COMPLETED_RETENTION_COUNT: i64 = 1_000;
pub const DEFAULT_FAILED_RETENTION_SECS: i64 = 86_400;
pub const DEFAULT_FAILED_RETENTION_COUNT: i64 = 1_000;
