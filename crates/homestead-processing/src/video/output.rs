//! Enumeration of a transcoded output set.

use homestead_core::constants::{HLS_PLAYLIST_CONTENT_TYPE, HLS_SEGMENT_CONTENT_TYPE};
use homestead_core::MediaResult;
use std::path::{Path, PathBuf};

/// One file produced by the transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    /// Path relative to the output directory root.
    pub relative_path: PathBuf,
    pub content_type: &'static str,
}

/// Content type of an HLS output file: playlists by their `.m3u8` extension,
/// everything else as a transport-stream segment.
pub fn hls_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("m3u8") => HLS_PLAYLIST_CONTENT_TYPE,
        _ => HLS_SEGMENT_CONTENT_TYPE,
    }
}

/// Every regular file below `root`, recursively, sorted by relative path.
pub async fn collect_output_files(root: &Path) -> MediaResult<Vec<OutputFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative_path = match path.strip_prefix(root) {
                    Ok(relative) => relative.to_path_buf(),
                    Err(_) => continue,
                };
                files.push(OutputFile {
                    content_type: hls_content_type(&path),
                    path,
                    relative_path,
                });
            }
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}
