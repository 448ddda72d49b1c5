//! Scripted job handlers and queue setup for worker tests.

#![allow(dead_code)]

use async_trait::async_trait;
use homestead_core::{
    JobOutcome, JobReport, MediaError, MediaJob, RetentionWindow, Stage, UploadEvent,
};
use homestead_db::{JobStore, MemoryJobStore};
use homestead_worker::{JobHandler, JobQueue, JobQueueConfig, QueueEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What the handler does on one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    /// Fails with a retryable metadata error at `RecordingMetadata`.
    FailRetryable,
    /// Fails with `InvalidJob` at `Fetching`.
    FailInvalid,
    /// Sleeps for the given duration, then succeeds.
    Sleep(Duration),
}

/// Handler that follows a per-object-key script, then succeeds.
#[derive(Default)]
pub struct ScriptedHandler {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(Uuid, i32)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedHandler {
    pub fn script(&self, object_key: &str, steps: &[Step]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(object_key.to_string(), steps.iter().copied().collect());
    }

    /// `(job id, attempt number)` for every call, in call order.
    pub fn calls(&self) -> Vec<(Uuid, i32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, job_id: Uuid) -> usize {
        self.calls().iter().filter(|(id, _)| *id == job_id).count()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_step(&self, object_key: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(object_key)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Succeed)
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn handle(&self, job: &MediaJob) -> JobOutcome {
        self.calls.lock().unwrap().push((job.id, job.attempts));
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        match self.next_step(&job.object_key) {
            Step::Succeed => JobOutcome::Completed(JobReport {
                media_url: Some(format!("https://cdn.test/{}", job.object_key)),
                ..JobReport::default()
            }),
            Step::FailRetryable => JobOutcome::failed(
                MediaError::MetadataWrite("search cluster unavailable".into()),
                Stage::RecordingMetadata,
            ),
            Step::FailInvalid => JobOutcome::failed(
                MediaError::InvalidJob("property media record not found".into()),
                Stage::Fetching,
            ),
            Step::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                JobOutcome::Completed(JobReport::default())
            }
        }
    }
}

/// Decrements the running counter even when the handler future is dropped.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fast settings: short polls and backoff, maintenance tasks off.
pub fn test_config() -> JobQueueConfig {
    JobQueueConfig {
        concurrency: 4,
        poll_interval_ms: 20,
        max_attempts: 3,
        backoff_ms: 10,
        job_timeout: Duration::from_secs(5),
        stale_reap_interval_secs: 0,
        stale_grace_secs: 0,
        retention_sweep_interval_secs: 0,
        completed_retention: RetentionWindow {
            max_age_secs: 3600,
            max_count: 1000,
        },
        failed_retention: RetentionWindow {
            max_age_secs: 86_400,
            max_count: 1000,
        },
    }
}

pub struct TestQueue {
    pub queue: JobQueue,
    pub store: Arc<MemoryJobStore>,
    pub handler: Arc<ScriptedHandler>,
    pub events: mpsc::Receiver<QueueEvent>,
}

impl TestQueue {
    /// Next lifecycle event, failing the test after a few seconds.
    pub async fn next_event(&mut self) -> QueueEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for a queue event")
            .expect("event channel closed")
    }

    /// Skip `Drained` and return the next completion or failure.
    pub async fn next_settled(&mut self) -> QueueEvent {
        loop {
            match self.next_event().await {
                QueueEvent::Drained => continue,
                event => return event,
            }
        }
    }

    pub async fn job(&self, job_id: Uuid) -> MediaJob {
        self.store
            .get(job_id)
            .await
            .unwrap()
            .expect("job should exist")
    }
}

pub fn start_queue(config: JobQueueConfig) -> TestQueue {
    start_queue_with_store(config, Arc::new(MemoryJobStore::new()))
}

pub fn start_queue_with_store(config: JobQueueConfig, store: Arc<MemoryJobStore>) -> TestQueue {
    let handler = Arc::new(ScriptedHandler::default());
    let (tx, events) = mpsc::channel(64);
    let queue = JobQueue::new(store.clone(), handler.clone(), config, Some(tx));
    TestQueue {
        queue,
        store,
        handler,
        events,
    }
}

pub fn upload(key: &str) -> UploadEvent {
    UploadEvent {
        property_id: "prop-1".to_string(),
        media_id: None,
        object_key: key.to_string(),
    }
}
