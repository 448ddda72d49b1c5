use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;

use homestead_core::Config;
use homestead_db::{setup_database, JobRepository, PropertyMediaRepository};
use homestead_processing::{FfmpegTranscoder, WebpImageCodec};
use homestead_services::{ElasticsearchIndex, MediaPipeline, PipelineConfig};
use homestead_storage::create_storage;
use homestead_worker::telemetry::init_telemetry;
use homestead_worker::{JobQueue, JobQueueConfig, QueueEvent};

const SHUTDOWN_GRACE_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    init_telemetry(&config.log_format)?;

    tracing::info!(
        environment = %config.environment,
        storage_backend = ?config.storage_backend,
        "Starting homestead media worker"
    );

    let pool = setup_database(&config).await?;
    let storage = create_storage(&config)
        .await
        .context("Failed to initialize blob storage")?;

    let search = ElasticsearchIndex::from_config(&config)?;
    match search.ensure_index().await {
        Ok(true) => tracing::info!(index = %search.index(), "Search index created"),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, index = %search.index(), "Could not verify search index")
        }
    }

    let pipeline = MediaPipeline::new(
        storage,
        Arc::new(PropertyMediaRepository::new(pool.clone())),
        Arc::new(search),
        Arc::new(FfmpegTranscoder::new(&config.ffmpeg_path)),
        Arc::new(WebpImageCodec::new()),
        PipelineConfig::from_config(&config),
    );

    let (events_tx, events_rx) = mpsc::channel(256);
    tokio::spawn(log_queue_events(events_rx));

    let queue = JobQueue::new(
        Arc::new(JobRepository::new(pool.clone())),
        Arc::new(pipeline),
        JobQueueConfig::from(&config.queue),
        Some(events_tx),
    );
    queue.listen_for_jobs(pool.clone());

    match queue.counts().await {
        Ok(counts) => tracing::info!(
            queued = counts.queued,
            delayed = counts.delayed,
            active = counts.active,
            "Media worker ready"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to read queue counts"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    queue
        .shutdown(Duration::from_secs(SHUTDOWN_GRACE_SECS))
        .await;
    pool.close().await;

    tracing::info!("Homestead media worker stopped");
    Ok(())
}

async fn log_queue_events(mut events: mpsc::Receiver<QueueEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::Completed { job_id, report } => {
                tracing::info!(
                    job_id = %job_id,
                    content_kind = ?report.content_kind,
                    media_url = ?report.media_url,
                    artifact_id = ?report.artifact_id,
                    "Job completed"
                );
            }
            QueueEvent::Failed {
                job_id,
                error,
                stage,
                previous_state,
                attempts,
                will_retry,
            } => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %error,
                    stage = ?stage,
                    previous_state = %previous_state,
                    attempts = attempts,
                    will_retry = will_retry,
                    "Job failed"
                );
            }
            QueueEvent::Drained => tracing::info!("All media jobs processed"),
        }
    }
}
