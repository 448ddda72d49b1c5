//! Homestead Core Library
//!
//! This crate provides the domain models, error types and configuration shared
//! by the media pipeline crates (storage, processing, db, services, worker).

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, QueueSettings, RetentionWindow};
pub use error::{MediaError, MediaResult, QueueError};
pub use models::{
    ArtifactUpsert, ContentKind, JobCounts, JobOutcome, JobReport, JobStatus, MediaJob,
    SearchMediaEntry, Stage, UploadEvent,
};
pub use storage_types::StorageBackend;
