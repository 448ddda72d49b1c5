//! Media job orchestration: fetch → classify → transcode or re-encode →
//! upload → record metadata → delete source.

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use uuid::Uuid;

use homestead_core::constants::{MASTER_PLAYLIST_NAME, WEBP_CONTENT_TYPE};
use homestead_core::{
    ArtifactUpsert, Config, ContentKind, JobOutcome, JobReport, MediaError, MediaJob,
    MediaResult, SearchMediaEntry, Stage,
};
use homestead_db::ArtifactStore;
use homestead_processing::{collect_output_files, ImageCodec, OutputFile, TranscodeAdapter};
use homestead_storage::keys::{
    image_object_key, master_playlist_key, video_object_key, video_output_prefix,
};
use homestead_storage::{BlobStore, StoredObject};

use crate::services::SearchIndex;

/// Tunables of the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which each video attempt gets its own scratch directory.
    pub scratch_dir: PathBuf,
    /// Largest image body buffered for re-encoding.
    pub max_image_bytes: usize,
    /// Parallel uploads of one HLS output set.
    pub upload_concurrency: usize,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch_dir: PathBuf::from(&config.scratch_dir),
            max_image_bytes: config.max_image_size_bytes,
            upload_concurrency: config.upload_concurrency.max(1),
        }
    }
}

/// Error of one attempt, tagged with the stage that produced it.
struct StageFailure {
    stage: Stage,
    error: MediaError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T, E: Into<MediaError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|e| StageFailure {
            stage,
            error: e.into(),
        })
    }
}

/// Derived artifact ready to be recorded.
struct Produced {
    kind: ContentKind,
    media_url: String,
    placeholder: Option<String>,
    uploaded_objects: usize,
    /// Video scratch directory, removed during cleanup.
    scratch: Option<TempDir>,
}

/// Runs media jobs against injected collaborators.
///
/// Steps within an attempt are strictly sequential. The source object is
/// deleted only after every upload and both metadata writes succeeded; any
/// earlier failure leaves it in place so the job can be retried. Scratch
/// directories are removed on every exit path, including when the attempt's
/// future is dropped.
pub struct MediaPipeline {
    storage: Arc<dyn BlobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    search: Arc<dyn SearchIndex>,
    transcoder: Arc<dyn TranscodeAdapter>,
    codec: Arc<dyn ImageCodec>,
    config: PipelineConfig,
}

impl MediaPipeline {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        search: Arc<dyn SearchIndex>,
        transcoder: Arc<dyn TranscodeAdapter>,
        codec: Arc<dyn ImageCodec>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            storage,
            artifacts,
            search,
            transcoder,
            codec,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one attempt of `job`.
    #[tracing::instrument(
        skip(self, job),
        fields(job_id = %job.id, property_id = %job.property_id, key = %job.object_key)
    )]
    pub async fn run(&self, job: &MediaJob) -> JobOutcome {
        let started = Instant::now();

        match self.process(job).await {
            Ok(report) => {
                tracing::info!(
                    content_type = ?report.content_kind,
                    media_url = ?report.media_url,
                    uploaded_objects = report.uploaded_objects,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Media job processed"
                );
                JobOutcome::Completed(report)
            }
            Err(failure) => {
                tracing::error!(
                    stage = %failure.stage,
                    error = %failure.error,
                    code = failure.error.code(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Media job failed"
                );
                JobOutcome::failed(failure.error, failure.stage)
            }
        }
    }

    async fn process(&self, job: &MediaJob) -> Result<JobReport, StageFailure> {
        job.validate().at(Stage::Fetching)?;
        let base_name = job
            .base_name()
            .ok_or_else(|| MediaError::InvalidJob(format!("unusable object key {}", job.object_key)))
            .at(Stage::Fetching)?;

        tracing::info!("Fetching source object");
        let object = self.storage.get(&job.object_key).await.at(Stage::Fetching)?;

        let declared = object.content_type.clone().unwrap_or_default();
        let Some(kind) = ContentKind::from_content_type(&declared) else {
            tracing::info!(
                content_type = %declared,
                "Content type is neither image nor video, nothing to process"
            );
            return Ok(JobReport::skipped());
        };

        // Fresh per attempt so retries never collide with earlier uploads
        let unique_id = Uuid::new_v4().to_string();

        let produced = match kind {
            ContentKind::Video => self.process_video(job, base_name, &unique_id, object).await?,
            ContentKind::Image => self.process_image(base_name, &unique_id, object).await?,
        };

        let artifact_id = self
            .artifacts
            .upsert_artifact(&ArtifactUpsert {
                job_id: job.id,
                media_id: job.media_id.clone(),
                property_id: job.property_id.clone(),
                content_kind: produced.kind,
                media_url: produced.media_url.clone(),
                placeholder: produced.placeholder.clone(),
            })
            .await
            .at(Stage::RecordingMetadata)?;

        self.search
            .upsert_media_entry(
                &job.property_id,
                &SearchMediaEntry {
                    id: artifact_id.clone(),
                    content_type: produced.kind,
                    media_url: produced.media_url.clone(),
                },
            )
            .await
            .at(Stage::RecordingMetadata)?;

        if let Some(scratch) = produced.scratch {
            remove_scratch_dir(scratch);
        }

        self.storage
            .delete(&job.object_key)
            .await
            .at(Stage::CleaningUp)?;
        tracing::debug!("Source object deleted");

        Ok(JobReport {
            content_kind: Some(produced.kind),
            artifact_id: Some(artifact_id),
            media_url: Some(produced.media_url),
            uploaded_objects: produced.uploaded_objects,
            source_deleted: true,
        })
    }

    async fn process_video(
        &self,
        job: &MediaJob,
        base_name: &str,
        unique_id: &str,
        object: StoredObject,
    ) -> Result<Produced, StageFailure> {
        let scratch = self.create_scratch_dir(job.id).await.at(Stage::VideoBranch)?;

        let report = self
            .transcoder
            .transcode(object.body, scratch.path())
            .await
            .at(Stage::VideoBranch)?;

        let files = collect_output_files(scratch.path())
            .await
            .at(Stage::Uploading)?;
        let master = Path::new(MASTER_PLAYLIST_NAME);
        if !files.iter().any(|file| file.relative_path == master) {
            return Err(MediaError::TranscodeProcess {
                exit_code: Some(0),
                message: "transcoder exited without writing a master playlist".to_string(),
                stderr: report.diagnostics,
            })
            .at(Stage::VideoBranch);
        }

        let prefix = video_output_prefix(base_name, unique_id);
        let uploaded_objects = self.upload_output_set(&prefix, files).await?;
        let media_url = self.storage.public_url(&master_playlist_key(&prefix));

        Ok(Produced {
            kind: ContentKind::Video,
            media_url,
            placeholder: None,
            uploaded_objects,
            scratch: Some(scratch),
        })
    }

    async fn process_image(
        &self,
        base_name: &str,
        unique_id: &str,
        object: StoredObject,
    ) -> Result<Produced, StageFailure> {
        let data = object
            .into_bytes(self.config.max_image_bytes)
            .await
            .at(Stage::Fetching)?;

        let codec = Arc::clone(&self.codec);
        let optimized = tokio::task::spawn_blocking(move || codec.optimize(&data))
            .await
            .map_err(|e| MediaError::Encode(format!("Image encoder task failed: {}", e)))
            .at(Stage::ImageBranch)?
            .at(Stage::ImageBranch)?;

        let key = image_object_key(base_name, unique_id);
        self.storage
            .put(&key, optimized.data, WEBP_CONTENT_TYPE)
            .await
            .at(Stage::Uploading)?;
        tracing::debug!(key = %key, "Optimized image uploaded");

        Ok(Produced {
            kind: ContentKind::Image,
            media_url: self.storage.public_url(&key),
            placeholder: Some(optimized.placeholder),
            uploaded_objects: 1,
            scratch: None,
        })
    }

    /// Exclusive directory for one attempt, named after the job plus a random
    /// suffix.
    async fn create_scratch_dir(&self, job_id: Uuid) -> MediaResult<TempDir> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", job_id))
            .tempdir_in(&self.config.scratch_dir)?;
        tracing::debug!(scratch_dir = %dir.path().display(), "Scratch directory created");
        Ok(dir)
    }

    /// Upload every file of an output set; the first failure aborts the rest.
    async fn upload_output_set(
        &self,
        prefix: &str,
        files: Vec<OutputFile>,
    ) -> Result<usize, StageFailure> {
        let count = files.len();
        let uploads = files.into_iter().map(move |file| async move {
            let key = video_object_key(prefix, &file.relative_path)?;
            let data = tokio::fs::read(&file.path).await?;
            let size = data.len();
            self.storage
                .put(&key, Bytes::from(data), file.content_type)
                .await?;
            tracing::trace!(key = %key, size_bytes = size, "HLS file uploaded");
            Ok::<_, MediaError>(())
        });

        futures::stream::iter(uploads)
            .buffer_unordered(self.config.upload_concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await
            .at(Stage::Uploading)?;

        tracing::info!(prefix = %prefix, files = count, "HLS output set uploaded");
        Ok(count)
    }
}

fn remove_scratch_dir(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::warn!(
            scratch_dir = %path.display(),
            error = %e,
            "Failed to remove scratch directory"
        );
    }
}
