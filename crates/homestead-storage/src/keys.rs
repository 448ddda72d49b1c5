//! Shared key derivation for derived artifacts.
//!
//! Video output sets are stored under `hls_output/{base_name}_{unique_id}/`,
//! re-encoded images under `optimize_image/{base_name}_{unique_id}.webp`.
//! The unique id is fresh for every attempt, so URLs differ between attempts
//! while keeping the same shape.

use crate::traits::{StorageError, StorageResult};
use homestead_core::constants::{
    HLS_OUTPUT_PREFIX, MASTER_PLAYLIST_NAME, OPTIMIZED_IMAGE_PREFIX, WEBP_EXTENSION,
};
use std::path::{Component, Path};

/// Key prefix of one transcoded output set, without a trailing slash.
pub fn video_output_prefix(base_name: &str, unique_id: &str) -> String {
    format!("{}/{}_{}", HLS_OUTPUT_PREFIX, base_name, unique_id)
}

/// Key of one file of an output set, from its path relative to the output directory.
///
/// Path separators are normalized to `/` regardless of platform.
pub fn video_object_key(prefix: &str, relative_path: &Path) -> StorageResult<String> {
    let mut parts = Vec::new();
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(StorageError::InvalidKey(format!(
                    "{} is not a relative path inside the output directory",
                    relative_path.display()
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(StorageError::InvalidKey("empty relative path".to_string()));
    }
    Ok(format!("{}/{}", prefix, parts.join("/")))
}

/// Key of the master playlist of an output set.
pub fn master_playlist_key(prefix: &str) -> String {
    format!("{}/{}", prefix, MASTER_PLAYLIST_NAME)
}

/// Key of a re-encoded image.
pub fn image_object_key(base_name: &str, unique_id: &str) -> String {
    format!(
        "{}/{}_{}.{}",
        OPTIMIZED_IMAGE_PREFIX, base_name, unique_id, WEBP_EXTENSION
    )
}

/// Reject keys that could escape a backend's root: absolute keys, empty
/// segments and `..` segments. Dots inside a segment are fine.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StorageError::InvalidKey(format!("{} is not a relative key", key)));
    }
    if key.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "{} contains an empty or parent segment",
            key
        )));
    }
    Ok(())
}
