//! End-to-end tests of the media orchestrator against in-memory collaborators.

mod helpers;

use helpers::{job, sample_png, setup_pipeline, setup_pipeline_with_limit, TranscodeBehavior, PUBLIC_HOST};
use homestead_core::{ContentKind, JobOutcome, JobReport, MediaError, Stage};

fn completed(outcome: JobOutcome) -> JobReport {
    match outcome {
        JobOutcome::Completed(report) => report,
        JobOutcome::Failed { error, stage } => panic!("job failed at {stage}: {error}"),
    }
}

fn failed(outcome: JobOutcome) -> (MediaError, Stage) {
    match outcome {
        JobOutcome::Failed { error, stage } => (error, stage),
        JobOutcome::Completed(report) => panic!("job unexpectedly completed: {report:?}"),
    }
}

#[tokio::test]
async fn test_video_job_uploads_hls_output_set() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/video1.mp4", vec![7u8; 4096], Some("video/mp4"));
    let job = job("P1", None, "raw/video1.mp4");

    let report = completed(t.pipeline.run(&job).await);

    assert_eq!(report.content_kind, Some(ContentKind::Video));
    assert_eq!(t.transcoder.received_bytes(), 4096);

    let keys = t.storage.keys_with_prefix("hls_output/");
    assert_eq!(keys.len(), 13, "master + 4 x (playlist + 2 segments): {keys:?}");
    assert_eq!(report.uploaded_objects, 13);

    let master = keys
        .iter()
        .find(|k| k.ends_with("/master.m3u8"))
        .expect("master playlist uploaded");
    let prefix = master.trim_end_matches("/master.m3u8");
    assert!(prefix.starts_with("hls_output/video1_"));
    let unique_id = prefix.trim_start_matches("hls_output/video1_");
    assert!(uuid::Uuid::parse_str(unique_id).is_ok());

    for v in 0..4 {
        let playlist = format!("{}/v{}/index.m3u8", prefix, v);
        assert_eq!(
            t.storage.object(&playlist).unwrap().content_type.as_deref(),
            Some("application/vnd.apple.mpegurl")
        );
        let segment = format!("{}/v{}/segment000.ts", prefix, v);
        assert_eq!(
            t.storage.object(&segment).unwrap().content_type.as_deref(),
            Some("video/mp2t")
        );
    }

    let expected_url = format!("https://{}/{}", PUBLIC_HOST, master);
    assert_eq!(report.media_url.as_deref(), Some(expected_url.as_str()));

    let rows = t.artifacts.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content_kind, "video");
    assert_eq!(rows[0].media_url, expected_url);
    assert_eq!(rows[0].placeholder, None);

    let media = t.search.media("P1");
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].id, rows[0].id);
    assert_eq!(media[0].content_type, ContentKind::Video);

    assert!(!t.storage.contains("raw/video1.mp4"));
    assert!(report.source_deleted);
    assert_eq!(t.scratch_entries(), 0);
    for dir in t.transcoder.output_dirs() {
        assert!(!dir.exists());
    }
}

#[tokio::test]
async fn test_image_job_updates_existing_media_record() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.artifacts.seed("M1", "P1", "https://example.com/old.jpg");
    t.storage
        .insert("raw/photo1.jpg", sample_png(48, 32), Some("image/jpeg"));
    let job = job("P1", Some("M1"), "raw/photo1.jpg");

    let report = completed(t.pipeline.run(&job).await);

    assert_eq!(report.content_kind, Some(ContentKind::Image));
    assert_eq!(report.artifact_id.as_deref(), Some("M1"));

    let keys = t.storage.keys_with_prefix("optimize_image/");
    assert_eq!(keys.len(), 1);
    let key = &keys[0];
    assert!(key.starts_with("optimize_image/photo1_"));
    assert!(key.ends_with(".webp"));
    let uploaded = t.storage.object(key).unwrap();
    assert_eq!(uploaded.content_type.as_deref(), Some("image/webp"));
    assert_eq!(&uploaded.data[0..4], b"RIFF");

    let rows = t.artifacts.rows();
    assert_eq!(rows.len(), 1, "existing record updated, not duplicated");
    assert_eq!(rows[0].id, "M1");
    assert_eq!(rows[0].media_url, format!("https://{}/{}", PUBLIC_HOST, key));
    let placeholder = rows[0].placeholder.as_deref().unwrap();
    assert!(placeholder.starts_with("data:image/png;base64,"));

    let media = t.search.media("P1");
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].id, "M1");
    assert_eq!(media[0].content_type, ContentKind::Image);

    assert!(!t.storage.contains("raw/photo1.jpg"));
}

#[tokio::test]
async fn test_transcode_failure_keeps_source_and_removes_scratch() {
    let t = setup_pipeline(TranscodeBehavior::ExitWithError);
    t.storage
        .insert("raw/video1.mp4", vec![1u8; 512], Some("video/mp4"));
    let job = job("P1", None, "raw/video1.mp4");

    let (error, stage) = failed(t.pipeline.run(&job).await);

    assert_eq!(stage, Stage::VideoBranch);
    assert!(matches!(
        error,
        MediaError::TranscodeProcess {
            exit_code: Some(1),
            ..
        }
    ));
    assert!(error.is_retryable());

    assert!(t.storage.contains("raw/video1.mp4"));
    assert!(t.storage.deleted().is_empty());
    assert!(t.storage.keys_with_prefix("hls_output/").is_empty());
    assert!(t.artifacts.rows().is_empty());
    assert!(t.search.media("P1").is_empty());
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test]
async fn test_missing_master_playlist_fails_attempt() {
    let t = setup_pipeline(TranscodeBehavior::SucceedWithoutMaster);
    t.storage
        .insert("raw/video1.mp4", vec![1u8; 64], Some("video/mp4"));

    let (error, stage) = failed(t.pipeline.run(&job("P1", None, "raw/video1.mp4")).await);

    assert_eq!(stage, Stage::VideoBranch);
    assert!(matches!(error, MediaError::TranscodeProcess { .. }));
    assert!(t.storage.keys_with_prefix("hls_output/").is_empty());
    assert!(t.storage.contains("raw/video1.mp4"));
}

#[tokio::test]
async fn test_unknown_content_type_is_skipped() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/brochure.pdf", b"%PDF-1.7".to_vec(), Some("application/pdf"));

    let report = completed(t.pipeline.run(&job("P1", None, "raw/brochure.pdf")).await);

    assert_eq!(report, JobReport::skipped());
    assert!(t.storage.contains("raw/brochure.pdf"));
    assert!(t.artifacts.rows().is_empty());
    assert!(t.search.media("P1").is_empty());
    assert!(t.transcoder.output_dirs().is_empty());
}

#[tokio::test]
async fn test_missing_content_type_is_skipped() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage.insert("raw/unknown", b"bytes".to_vec(), None);

    let report = completed(t.pipeline.run(&job("P1", None, "raw/unknown")).await);

    assert_eq!(report.content_kind, None);
    assert!(t.storage.contains("raw/unknown"));
}

#[tokio::test]
async fn test_missing_source_object_fails_at_fetch() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);

    let (error, stage) = failed(t.pipeline.run(&job("P1", None, "raw/gone.jpg")).await);

    assert_eq!(stage, Stage::Fetching);
    assert!(matches!(error, MediaError::ObjectNotFound(_)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_failed_segment_upload_fails_attempt() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage.fail_puts_containing("v2/segment001.ts");
    t.storage
        .insert("raw/video1.mp4", vec![3u8; 256], Some("video/mp4"));

    let (error, stage) = failed(t.pipeline.run(&job("P1", None, "raw/video1.mp4")).await);

    assert_eq!(stage, Stage::Uploading);
    assert!(matches!(error, MediaError::StorageService(_)));
    assert!(t.storage.contains("raw/video1.mp4"));
    assert!(t.artifacts.rows().is_empty());
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test]
async fn test_search_failure_keeps_source_and_retry_does_not_duplicate() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/photo2.png", sample_png(16, 16), Some("image/png"));
    let job = job("P1", None, "raw/photo2.png");

    t.search.set_failing(true);
    let (error, stage) = failed(t.pipeline.run(&job).await);
    assert_eq!(stage, Stage::RecordingMetadata);
    assert!(matches!(error, MediaError::MetadataWrite(_)));
    assert!(t.storage.contains("raw/photo2.png"));
    // The relational write is not rolled back
    assert_eq!(t.artifacts.rows().len(), 1);

    t.search.set_failing(false);
    let report = completed(t.pipeline.run(&job).await);

    let rows = t.artifacts.rows();
    assert_eq!(rows.len(), 1, "retry reuses the record created for the job");
    assert_eq!(report.artifact_id.as_deref(), Some(rows[0].id.as_str()));
    assert_eq!(rows[0].media_url, report.media_url.clone().unwrap());
    assert_eq!(t.search.media("P1").len(), 1);
    assert!(!t.storage.contains("raw/photo2.png"));
}

#[tokio::test]
async fn test_relational_failure_fails_before_search_write() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.artifacts.set_failing(true);
    t.storage
        .insert("raw/photo3.png", sample_png(8, 8), Some("image/png"));

    let (error, stage) = failed(t.pipeline.run(&job("P1", None, "raw/photo3.png")).await);

    assert_eq!(stage, Stage::RecordingMetadata);
    assert!(matches!(error, MediaError::MetadataWrite(_)));
    assert!(t.search.media("P1").is_empty());
    assert!(t.storage.contains("raw/photo3.png"));
}

#[tokio::test]
async fn test_unknown_media_id_is_not_retryable() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/photo1.jpg", sample_png(8, 8), Some("image/jpeg"));

    let (error, stage) = failed(
        t.pipeline
            .run(&job("P1", Some("does-not-exist"), "raw/photo1.jpg"))
            .await,
    );

    assert_eq!(stage, Stage::RecordingMetadata);
    assert!(matches!(error, MediaError::InvalidJob(_)));
    assert!(!error.is_retryable());
    assert!(t.storage.contains("raw/photo1.jpg"));
}

#[tokio::test]
async fn test_corrupt_image_is_encode_error() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/broken.jpg", b"not really a jpeg".to_vec(), Some("image/jpeg"));

    let (error, stage) = failed(t.pipeline.run(&job("P1", None, "raw/broken.jpg")).await);

    assert_eq!(stage, Stage::ImageBranch);
    assert!(matches!(error, MediaError::Encode(_)));
    assert!(t.storage.contains("raw/broken.jpg"));
    assert!(t.storage.keys_with_prefix("optimize_image/").is_empty());
}

#[tokio::test]
async fn test_oversized_image_is_rejected() {
    let t = setup_pipeline_with_limit(TranscodeBehavior::Succeed, 1024);
    t.storage
        .insert("raw/huge.png", vec![0u8; 4096], Some("image/png"));

    let (error, stage) = failed(t.pipeline.run(&job("P1", None, "raw/huge.png")).await);

    assert_eq!(stage, Stage::Fetching);
    assert!(matches!(error, MediaError::InvalidJob(_)));
    assert!(t.storage.contains("raw/huge.png"));
}

#[tokio::test]
async fn test_invalid_payload_is_rejected_before_fetch() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);

    let (error, stage) = failed(t.pipeline.run(&job(" ", None, "raw/photo1.jpg")).await);

    assert_eq!(stage, Stage::Fetching);
    assert!(matches!(error, MediaError::InvalidJob(_)));
}

#[tokio::test]
async fn test_attempts_use_distinct_output_keys() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/photo1.jpg", sample_png(8, 8), Some("image/jpeg"));
    let first = completed(t.pipeline.run(&job("P1", None, "raw/photo1.jpg")).await);

    t.storage
        .insert("raw/photo1.jpg", sample_png(8, 8), Some("image/jpeg"));
    let second = completed(t.pipeline.run(&job("P1", None, "raw/photo1.jpg")).await);

    assert_ne!(first.media_url, second.media_url);
    assert_eq!(t.storage.keys_with_prefix("optimize_image/photo1_").len(), 2);
    assert_eq!(t.search.media("P1").len(), 2);
}

#[tokio::test]
async fn test_concurrent_jobs_for_one_property_keep_distinct_media_entries() {
    let t = setup_pipeline(TranscodeBehavior::Succeed);
    t.storage
        .insert("raw/video1.mp4", vec![7u8; 2048], Some("video/mp4"));
    t.storage
        .insert("raw/photo1.png", sample_png(32, 24), Some("image/png"));
    let video_job = job("P1", None, "raw/video1.mp4");
    let image_job = job("P1", None, "raw/photo1.png");

    let (video, image) = tokio::join!(t.pipeline.run(&video_job), t.pipeline.run(&image_job));
    let video = completed(video);
    let image = completed(image);

    let video_id = video.artifact_id.clone().unwrap();
    let image_id = image.artifact_id.clone().unwrap();
    assert_ne!(video_id, image_id);

    let media = t.search.media("P1");
    assert_eq!(media.len(), 2);
    let mut ids: Vec<&str> = media.iter().map(|m| m.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 2);

    // A replacement upload targeting the image record replaces its entry
    t.storage
        .insert("raw/photo2.png", sample_png(16, 16), Some("image/png"));
    let replacement = job("P1", Some(&image_id), "raw/photo2.png");
    let replaced = completed(t.pipeline.run(&replacement).await);
    assert_eq!(replaced.artifact_id.as_deref(), Some(image_id.as_str()));

    let media = t.search.media("P1");
    assert_eq!(media.len(), 2);
    let image_entry = media.iter().find(|m| m.id == image_id).unwrap();
    assert_eq!(image_entry.content_type, ContentKind::Image);
    assert_eq!(Some(&image_entry.media_url), replaced.media_url.as_ref());
    assert_ne!(replaced.media_url, image.media_url);
    assert!(image_entry.media_url.contains("optimize_image/photo2_"));

    let video_entry = media.iter().find(|m| m.id == video_id).unwrap();
    assert_eq!(Some(&video_entry.media_url), video.media_url.as_ref());
    assert_eq!(t.artifacts.rows().len(), 2);
}
