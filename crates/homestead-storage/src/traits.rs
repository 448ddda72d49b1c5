//! Blob store abstraction
//!
//! This module defines the `BlobStore` trait that all storage backends implement.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use homestead_core::MediaError;
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Object too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for MediaError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => MediaError::ObjectNotFound(key),
            StorageError::TooLarge { .. } | StorageError::InvalidKey(_) => {
                MediaError::InvalidJob(err.to_string())
            }
            other => MediaError::StorageService(other.to_string()),
        }
    }
}

/// Body of a fetched object, yielded in chunks as they arrive.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// An object fetched from the blob store.
pub struct StoredObject {
    /// Declared content type, if the backend recorded one.
    pub content_type: Option<String>,
    /// Size reported by the backend before the body was read.
    pub size: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl StoredObject {
    pub fn new(content_type: Option<String>, size: Option<u64>, body: ByteStream) -> Self {
        Self {
            content_type,
            size,
            body,
        }
    }

    /// Read the whole body into memory, failing once more than `limit` bytes arrive.
    pub async fn into_bytes(self, limit: usize) -> StorageResult<Bytes> {
        if let Some(size) = self.size {
            if size > limit as u64 {
                return Err(StorageError::TooLarge {
                    size: size as usize,
                    limit,
                });
            }
        }

        let mut body = self.body;
        let mut buffer = BytesMut::with_capacity(self.size.unwrap_or(0) as usize);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if buffer.len() + chunk.len() > limit {
                return Err(StorageError::TooLarge {
                    size: buffer.len() + chunk.len(),
                    limit,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

/// Blob store abstraction
///
/// All storage backends (S3-compatible, local filesystem) implement this trait
/// so the media pipeline works against any of them, and against test doubles.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object and its declared content type.
    ///
    /// Missing objects yield `StorageError::NotFound`.
    async fn get(&self, key: &str) -> StorageResult<StoredObject>;

    /// Store `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Publicly addressable URL of the object stored under `key`.
    fn public_url(&self, key: &str) -> String;
}
