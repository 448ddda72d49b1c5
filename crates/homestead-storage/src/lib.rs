//! Homestead Storage Library
//!
//! Blob storage abstraction used by the media pipeline, with an S3-compatible
//! backend (AWS S3, Backblaze B2, MinIO) and a local filesystem backend.
//!
//! # Storage key format
//!
//! Keys are plain `/`-separated object paths such as `raw/video1.mp4`.
//! Derived artifacts live under fixed prefixes built by the [`keys`] module:
//!
//! - **Video**: `hls_output/{base_name}_{unique_id}/{relative_path}`
//! - **Image**: `optimize_image/{base_name}_{unique_id}.webp`
//!
//! Keys must not contain `..` or a leading `/`.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use homestead_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{BlobStore, ByteStream, StorageError, StorageResult, StoredObject};
