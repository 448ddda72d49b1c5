//! Error types module
//!
//! `MediaError` is what a single media-processing attempt can fail with; the
//! queue reads [`MediaError::is_retryable`] to decide between a delayed retry
//! and a terminal failure. `QueueError` covers submission and job-store
//! bookkeeping.

use std::io;

use uuid::Uuid;

/// Result alias for pipeline steps.
pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Storage service error: {0}")]
    StorageService(String),

    #[error("Transcode process error ({}): {message}", exit_label(.exit_code))]
    TranscodeProcess {
        exit_code: Option<i32>,
        message: String,
        /// Diagnostic output accumulated from the process.
        stderr: String,
    },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Metadata write error: {0}")]
    MetadataWrite(String),

    /// The job can never succeed as submitted (bad payload, missing record).
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job attempt timed out after {0} seconds")]
    Timeout(u64),

    #[error("Scratch filesystem error: {0}")]
    Io(#[from] io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "not started".to_string(),
    }
}

impl MediaError {
    /// Spawn failure of the external transcoder (missing binary, permissions).
    pub fn transcode_spawn(err: impl std::fmt::Display) -> Self {
        MediaError::TranscodeProcess {
            exit_code: None,
            message: format!("failed to start transcoder: {}", err),
            stderr: String::new(),
        }
    }

    /// Whether the queue should schedule another attempt.
    ///
    /// Infrastructure failures and programming errors carry the same risk of
    /// partial external state, so everything except `InvalidJob` is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MediaError::InvalidJob(_))
    }

    /// Machine-readable error code stored with failed jobs.
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            MediaError::StorageService(_) => "STORAGE_SERVICE_ERROR",
            MediaError::TranscodeProcess { .. } => "TRANSCODE_PROCESS_ERROR",
            MediaError::Encode(_) => "ENCODE_ERROR",
            MediaError::MetadataWrite(_) => "METADATA_WRITE_ERROR",
            MediaError::InvalidJob(_) => "INVALID_JOB",
            MediaError::Timeout(_) => "TIMEOUT",
            MediaError::Io(_) => "IO_ERROR",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A job with this id is queued, delayed or running.
    #[error("Job {0} already exists and has not finished")]
    DuplicateJob(Uuid),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Job queue is shutting down")]
    ShuttingDown,
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Store(format!("{:#}", err))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Store(err.to_string())
    }
}
