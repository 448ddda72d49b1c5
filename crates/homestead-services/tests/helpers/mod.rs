//! In-memory collaborators for orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use homestead_core::{
    ArtifactUpsert, MediaError, MediaJob, MediaResult, SearchMediaEntry, UploadEvent,
};
use homestead_db::ArtifactStore;
use homestead_processing::{TranscodeAdapter, TranscodeReport, WebpImageCodec};
use homestead_services::{MediaPipeline, PipelineConfig, SearchIndex};
use homestead_storage::{BlobStore, ByteStream, StorageError, StorageResult, StoredObject};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PUBLIC_HOST: &str = "test-bucket.s3.eu-central-003.backblazeb2.com";

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Blob store keeping objects in a map.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredBlob>>,
    /// Uploads whose key contains this fragment fail.
    fail_puts_containing: Mutex<Option<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryBlobStore {
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredBlob {
                data: data.into(),
                content_type: content_type.map(str::to_string),
            },
        );
    }

    pub fn fail_puts_containing(&self, fragment: &str) {
        *self.fail_puts_containing.lock().unwrap() = Some(fragment.to_string());
    }

    pub fn object(&self, key: &str) -> Option<StoredBlob> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        let blob = self
            .object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let size = blob.data.len() as u64;
        // Two chunks, to exercise streaming consumers
        let split = blob.data.len() / 2;
        let chunks = vec![
            Ok::<_, StorageError>(blob.data.slice(..split)),
            Ok(blob.data.slice(split..)),
        ];
        let body: ByteStream = Box::pin(futures::stream::iter(chunks));
        Ok(StoredObject::new(blob.content_type, Some(size), body))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        if let Some(fragment) = self.fail_puts_containing.lock().unwrap().as_deref() {
            if key.contains(fragment) {
                return Err(StorageError::UploadFailed(format!("injected failure for {}", key)));
            }
        }
        self.insert(key, data, Some(content_type));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://{}/{}", PUBLIC_HOST, key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRow {
    pub id: String,
    pub property_id: String,
    pub content_kind: String,
    pub media_url: String,
    pub placeholder: Option<String>,
    pub source_job_id: Option<uuid::Uuid>,
}

/// Relational store double with the same upsert rules as the Postgres one.
#[derive(Default)]
pub struct MemoryArtifactStore {
    rows: Mutex<Vec<ArtifactRow>>,
    fail: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn seed(&self, id: &str, property_id: &str, media_url: &str) {
        self.rows.lock().unwrap().push(ArtifactRow {
            id: id.to_string(),
            property_id: property_id.to_string(),
            content_kind: "image".to_string(),
            media_url: media_url.to_string(),
            placeholder: None,
            source_job_id: None,
        });
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<ArtifactRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upsert_artifact(&self, artifact: &ArtifactUpsert) -> MediaResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::MetadataWrite("connection refused".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        let existing = match artifact.media_id.as_deref() {
            Some(media_id) => {
                let found = rows
                    .iter_mut()
                    .find(|row| row.id == media_id && row.property_id == artifact.property_id);
                match found {
                    Some(row) => Some(row),
                    None => {
                        return Err(MediaError::InvalidJob(format!(
                            "property media {} not found",
                            media_id
                        )))
                    }
                }
            }
            None => rows
                .iter_mut()
                .find(|row| row.source_job_id == Some(artifact.job_id)),
        };

        if let Some(row) = existing {
            row.content_kind = artifact.content_kind.to_string();
            row.media_url = artifact.media_url.clone();
            row.placeholder = artifact.placeholder.clone();
            return Ok(row.id.clone());
        }

        let id = format!("media-{}", rows.len() + 1);
        rows.push(ArtifactRow {
            id: id.clone(),
            property_id: artifact.property_id.clone(),
            content_kind: artifact.content_kind.to_string(),
            media_url: artifact.media_url.clone(),
            placeholder: artifact.placeholder.clone(),
            source_job_id: Some(artifact.job_id),
        });
        Ok(id)
    }
}

/// Search index double applying add-or-replace by id per property.
#[derive(Default)]
pub struct MemorySearchIndex {
    documents: Mutex<HashMap<String, Vec<SearchMediaEntry>>>,
    fail: AtomicBool,
}

impl MemorySearchIndex {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn media(&self, property_id: &str) -> Vec<SearchMediaEntry> {
        self.documents
            .lock()
            .unwrap()
            .get(property_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert_media_entry(
        &self,
        property_id: &str,
        entry: &SearchMediaEntry,
    ) -> MediaResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::MetadataWrite(
                "Search index update failed: 503".to_string(),
            ));
        }
        let mut documents = self.documents.lock().unwrap();
        let media = documents.entry(property_id.to_string()).or_default();
        match media.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => media.push(entry.clone()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeBehavior {
    /// Writes a four-rendition output set with two segments each.
    Succeed,
    /// Writes part of an output set, then exits with code 1.
    ExitWithError,
    /// Exits 0 without writing a master playlist.
    SucceedWithoutMaster,
}

/// Transcoder double that writes files the way ffmpeg lays them out.
pub struct FakeTranscoder {
    behavior: TranscodeBehavior,
    output_dirs: Mutex<Vec<PathBuf>>,
    received_bytes: Mutex<u64>,
}

impl FakeTranscoder {
    pub fn new(behavior: TranscodeBehavior) -> Self {
        Self {
            behavior,
            output_dirs: Mutex::new(Vec::new()),
            received_bytes: Mutex::new(0),
        }
    }

    pub fn output_dirs(&self) -> Vec<PathBuf> {
        self.output_dirs.lock().unwrap().clone()
    }

    pub fn received_bytes(&self) -> u64 {
        *self.received_bytes.lock().unwrap()
    }
}

#[async_trait]
impl TranscodeAdapter for FakeTranscoder {
    async fn transcode(
        &self,
        mut input: ByteStream,
        output_dir: &Path,
    ) -> MediaResult<TranscodeReport> {
        self.output_dirs
            .lock()
            .unwrap()
            .push(output_dir.to_path_buf());

        let mut input_bytes = 0u64;
        while let Some(chunk) = input.next().await {
            input_bytes += chunk.map_err(MediaError::from)?.len() as u64;
        }
        *self.received_bytes.lock().unwrap() = input_bytes;

        for v in 0..4 {
            let rendition = output_dir.join(format!("v{}", v));
            tokio::fs::create_dir_all(&rendition).await?;
            tokio::fs::write(rendition.join("index.m3u8"), b"#EXTM3U\n").await?;
            tokio::fs::write(rendition.join("segment000.ts"), vec![0x47u8; 188]).await?;
            if self.behavior == TranscodeBehavior::ExitWithError {
                return Err(MediaError::TranscodeProcess {
                    exit_code: Some(1),
                    message: "transcoder exited unsuccessfully".to_string(),
                    stderr: "pipe:0: Invalid data found when processing input".to_string(),
                });
            }
            tokio::fs::write(rendition.join("segment001.ts"), vec![0x47u8; 188]).await?;
        }

        if self.behavior == TranscodeBehavior::Succeed {
            tokio::fs::write(output_dir.join("master.m3u8"), b"#EXTM3U\n").await?;
        }

        Ok(TranscodeReport {
            input_bytes,
            duration_ms: 1.0,
            diagnostics: String::new(),
        })
    }
}

/// Collaborators and scratch space of one test.
pub struct TestPipeline {
    pub pipeline: MediaPipeline,
    pub storage: Arc<MemoryBlobStore>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub search: Arc<MemorySearchIndex>,
    pub transcoder: Arc<FakeTranscoder>,
    pub scratch_root: PathBuf,
    _temp_dir: TempDir,
}

impl TestPipeline {
    /// Entries left under the scratch root.
    pub fn scratch_entries(&self) -> usize {
        match std::fs::read_dir(&self.scratch_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub fn setup_pipeline(behavior: TranscodeBehavior) -> TestPipeline {
    setup_pipeline_with_limit(behavior, 10 * 1024 * 1024)
}

pub fn setup_pipeline_with_limit(behavior: TranscodeBehavior, max_image_bytes: usize) -> TestPipeline {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let scratch_root = temp_dir.path().join("scratch");

    let storage = Arc::new(MemoryBlobStore::default());
    let artifacts = Arc::new(MemoryArtifactStore::default());
    let search = Arc::new(MemorySearchIndex::default());
    let transcoder = Arc::new(FakeTranscoder::new(behavior));

    let pipeline = MediaPipeline::new(
        storage.clone(),
        artifacts.clone(),
        search.clone(),
        transcoder.clone(),
        Arc::new(WebpImageCodec::new()),
        PipelineConfig {
            scratch_dir: scratch_root.clone(),
            max_image_bytes,
            upload_concurrency: 4,
        },
    );

    TestPipeline {
        pipeline,
        storage,
        artifacts,
        search,
        transcoder,
        scratch_root,
        _temp_dir: temp_dir,
    }
}

pub fn job(property_id: &str, media_id: Option<&str>, key: &str) -> MediaJob {
    MediaJob::from_event(UploadEvent {
        property_id: property_id.to_string(),
        media_id: media_id.map(str::to_string),
        object_key: key.to_string(),
    })
}

/// Small PNG with a gradient, for the real WebP codec.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 5 % 256) as u8, (y * 11 % 256) as u8, 200])
    });
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("Failed to encode sample PNG");
    buffer
}
