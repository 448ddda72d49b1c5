//! Media job queue: worker pool, polling plus wakeups, retry and retention.
//!
//! Delivery is at least once. A job is claimed by one worker at a time; a
//! worker that disappears mid-attempt leaves the job `active` until the stale
//! job reaper puts it back in the queue.

use chrono::Utc;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use homestead_core::{
    JobCounts, JobOutcome, JobReport, JobStatus, MediaError, MediaJob, QueueError,
    QueueSettings, RetentionWindow, Stage, UploadEvent,
};
use homestead_db::{JobStore, JOB_NOTIFY_CHANNEL};

use crate::context::JobHandler;

/// Maximum delay before retrying a failed job. Caps exponential backoff so
/// that late attempts do not wait excessively long.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Delay before the next attempt after attempt number `attempt` (1-based)
/// failed: `base_ms * 2^(attempt - 1)`, capped at [`MAX_RETRY_BACKOFF_SECS`].
pub fn compute_retry_backoff(base_ms: u64, attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 32) as u32;
    let delay_ms = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay_ms.min(MAX_RETRY_BACKOFF_SECS * 1000))
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: i32,
    pub backoff_ms: u64,
    pub job_timeout: Duration,
    /// Interval in seconds between runs of the stale job reaper (0 disables it).
    pub stale_reap_interval_secs: u64,
    /// Grace period added to the job timeout before an active job is reaped.
    pub stale_grace_secs: u64,
    /// Interval in seconds between retention sweeps (0 disables them).
    pub retention_sweep_interval_secs: u64,
    pub completed_retention: RetentionWindow,
    pub failed_retention: RetentionWindow,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for JobQueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            poll_interval_ms: settings.poll_interval_ms.max(1),
            max_attempts: settings.max_attempts.max(1),
            backoff_ms: settings.backoff_ms,
            job_timeout: settings.job_timeout(),
            stale_reap_interval_secs: 60,
            stale_grace_secs: settings.stale_grace_secs,
            retention_sweep_interval_secs: settings.retention_sweep_interval_secs,
            completed_retention: settings.completed_retention,
            failed_retention: settings.failed_retention,
        }
    }
}

/// Lifecycle notifications, delivered on the channel given to [`JobQueue::new`].
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Completed {
        job_id: Uuid,
        report: JobReport,
    },
    Failed {
        job_id: Uuid,
        error: String,
        /// `None` when the attempt timed out.
        stage: Option<Stage>,
        /// State the job was in when the attempt failed.
        previous_state: JobStatus,
        attempts: i32,
        will_retry: bool,
    },
    /// Nothing pending and nothing in flight, after having been busy.
    Drained,
}

struct Shared {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: JobQueueConfig,
    events: Option<mpsc::Sender<QueueEvent>>,
    semaphore: Arc<Semaphore>,
    wake: Notify,
    /// Set when a job is claimed, cleared when `Drained` is emitted.
    busy: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// Handle to a running job queue. Clones share the same worker pool.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    /// Start the worker pool and its background maintenance tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        config: JobQueueConfig,
        events: Option<mpsc::Sender<QueueEvent>>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            store,
            handler,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            events,
            wake: Notify::new(),
            busy: AtomicBool::new(false),
            shutdown_tx,
        });

        tokio::spawn(Arc::clone(&shared).worker_pool());
        if shared.config.stale_reap_interval_secs > 0 {
            tokio::spawn(Arc::clone(&shared).stale_job_reaper());
        }
        if shared.config.retention_sweep_interval_secs > 0 {
            tokio::spawn(Arc::clone(&shared).retention_sweeper());
        }

        Self { shared }
    }

    /// Persist `job` as queued and wake the pool.
    ///
    /// Fails with [`QueueError::DuplicateJob`] while a job with the same id is
    /// queued, delayed or running.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn enqueue(&self, job: MediaJob) -> Result<Uuid, QueueError> {
        if *self.shared.shutdown_tx.borrow() {
            return Err(QueueError::ShuttingDown);
        }

        let job = job.with_max_attempts(self.shared.config.max_attempts);
        self.shared.store.insert(&job).await.map_err(|e| {
            tracing::error!(error = %e, job_id = %job.id, "Failed to enqueue media job");
            e
        })?;

        tracing::info!(
            job_id = %job.id,
            property_id = %job.property_id,
            key = %job.object_key,
            "Media job enqueued"
        );
        self.shared.wake.notify_one();
        Ok(job.id)
    }

    /// Enqueue an upload event under a fresh job id.
    pub async fn submit(&self, event: UploadEvent) -> Result<Uuid, QueueError> {
        self.enqueue(MediaJob::from_event(event)).await
    }

    pub async fn counts(&self) -> Result<JobCounts, QueueError> {
        self.shared.store.counts().await
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, QueueError> {
        self.shared.store.get(job_id).await
    }

    /// Jobs currently running on this queue.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Wake the pool whenever a job is inserted elsewhere (PostgreSQL
    /// LISTEN/NOTIFY on the job channel). Polling continues regardless.
    pub fn listen_for_jobs(&self, pool: PgPool) {
        let shared = Arc::clone(&self.shared);
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let retry_delay = Duration::from_secs(5);
            loop {
                let mut listener = match PgListener::connect_with(&pool).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        if wait_or_shutdown(&mut shutdown_rx, retry_delay).await {
                            return;
                        }
                        continue;
                    }
                };
                if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                    tracing::warn!(error = %e, "LISTEN failed, will retry");
                    if wait_or_shutdown(&mut shutdown_rx, retry_delay).await {
                        return;
                    }
                    continue;
                }
                tracing::debug!(channel = JOB_NOTIFY_CHANNEL, "Listening for new media jobs");

                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => return,
                        received = listener.recv() => match received {
                            Ok(_) => shared.wake.notify_one(),
                            Err(e) => {
                                tracing::warn!(error = %e, "Job notification listener lost, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop claiming jobs and wait up to `grace` for in-flight jobs to finish.
    ///
    /// Returns `false` if jobs were still running when the grace period ran
    /// out; those attempts are recovered by the stale job reaper of whichever
    /// worker runs next.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        tracing::info!(in_flight = self.in_flight(), "Initiating media queue shutdown");
        self.shared.shutdown_tx.send_replace(true);

        let permits = self.shared.config.concurrency.max(1) as u32;
        match tokio::time::timeout(grace, self.shared.semaphore.acquire_many(permits)).await {
            Ok(Ok(_all)) => {
                tracing::info!("Media queue stopped");
                true
            }
            _ => {
                tracing::warn!(
                    in_flight = self.in_flight(),
                    "Shutdown grace period elapsed with jobs still running"
                );
                false
            }
        }
    }
}

/// Sleep for `delay`; `true` if shutdown was signalled first.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => true,
        _ = sleep(delay) => *shutdown_rx.borrow(),
    }
}

impl Shared {
    fn in_flight(&self) -> usize {
        self.config
            .concurrency
            .max(1)
            .saturating_sub(self.semaphore.available_permits())
    }

    async fn emit(&self, event: QueueEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    async fn worker_pool(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        tracing::info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            max_attempts = self.config.max_attempts,
            "Media queue worker pool started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            self.dispatch_available().await;

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = self.wake.notified() => {}
                _ = sleep(poll_interval) => {}
            }
        }

        tracing::info!("Media queue worker pool stopped");
    }

    /// Claim due jobs until the pool is full or nothing is due.
    async fn dispatch_available(self: &Arc<Self>) {
        loop {
            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::trace!("No workers available, skipping claim");
                    return;
                }
            };

            match self.store.claim_next().await {
                Ok(Some(job)) => {
                    self.busy.store(true, Ordering::SeqCst);
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        shared.run_attempt(job).await;
                        drop(permit);
                        shared.wake.notify_one();
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.check_drained().await;
                    return;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to claim media job");
                    return;
                }
            }
        }
    }

    async fn check_drained(&self) {
        if !self.busy.load(Ordering::SeqCst) || self.in_flight() > 0 {
            return;
        }
        match self.store.counts().await {
            Ok(counts) if counts.pending() == 0 => {
                if self.busy.swap(false, Ordering::SeqCst) {
                    tracing::info!("Media queue drained");
                    self.emit(QueueEvent::Drained).await;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read queue counts"),
        }
    }

    #[tracing::instrument(
        skip(self, job),
        fields(job_id = %job.id, attempt = job.attempts, max_attempts = job.max_attempts)
    )]
    async fn run_attempt(&self, job: MediaJob) {
        tracing::info!(key = %job.object_key, "Processing media job");

        match tokio::time::timeout(self.config.job_timeout, self.handler.handle(&job)).await {
            Ok(JobOutcome::Completed(report)) => self.record_completed(&job, report).await,
            Ok(JobOutcome::Failed { error, stage }) => {
                self.record_failure(&job, error, Some(stage)).await
            }
            Err(_) => {
                // The handler future is dropped here, which stops its work.
                let timeout_secs = self.config.job_timeout.as_secs();
                tracing::error!(timeout_secs = timeout_secs, "Media job attempt timed out");
                self.record_failure(&job, MediaError::Timeout(timeout_secs), None)
                    .await
            }
        }
    }

    async fn record_completed(&self, job: &MediaJob, report: JobReport) {
        match self.store.mark_completed(job.id).await {
            Ok(true) => {
                tracing::info!(job_id = %job.id, "Media job completed");
                self.emit(QueueEvent::Completed {
                    job_id: job.id,
                    report,
                })
                .await;
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Job no longer active, completion ignored");
            }
            Err(e) => {
                tracing::error!(error = %e, job_id = %job.id, "Failed to mark media job completed");
            }
        }
    }

    async fn record_failure(&self, job: &MediaJob, error: MediaError, stage: Option<Stage>) {
        let message = error.to_string();
        let stage_name = stage.map(|s| s.to_string());
        let will_retry = error.is_retryable() && job.can_retry();

        let recorded = if will_retry {
            let delay = compute_retry_backoff(self.config.backoff_ms, job.attempts);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_BACKOFF_SECS as i64));
            tracing::warn!(
                job_id = %job.id,
                error = %message,
                code = error.code(),
                stage = ?stage_name,
                attempt = job.attempts,
                backoff_ms = delay.as_millis() as u64,
                "Media job failed, scheduling retry"
            );
            self.store
                .schedule_retry(job.id, run_at, &message, stage_name.as_deref())
                .await
        } else {
            tracing::error!(
                job_id = %job.id,
                error = %message,
                code = error.code(),
                stage = ?stage_name,
                attempt = job.attempts,
                retryable = error.is_retryable(),
                "Media job failed permanently"
            );
            self.store
                .mark_failed(job.id, &message, stage_name.as_deref())
                .await
        };

        match recorded {
            Ok(true) => {
                self.emit(QueueEvent::Failed {
                    job_id: job.id,
                    error: message,
                    stage,
                    previous_state: JobStatus::Active,
                    attempts: job.attempts,
                    will_retry,
                })
                .await;
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Job no longer active, failure ignored");
            }
            Err(e) => {
                tracing::error!(error = %e, job_id = %job.id, "Failed to record media job failure");
            }
        }
    }

    async fn stale_job_reaper(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.stale_reap_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let abandoned_after = self.config.job_timeout
            + Duration::from_secs(self.config.stale_grace_secs);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    let cutoff = Utc::now()
                        - chrono::Duration::from_std(abandoned_after)
                            .unwrap_or_else(|_| chrono::Duration::days(1));
                    match self.store.requeue_stale(cutoff).await {
                        Ok(count) if count > 0 => self.wake.notify_one(),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Stale job reaper failed"),
                    }
                }
            }
        }
    }

    async fn retention_sweeper(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.retention_sweep_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    self.sweep(JobStatus::Completed, self.config.completed_retention).await;
                    self.sweep(JobStatus::Failed, self.config.failed_retention).await;
                }
            }
        }
    }

    async fn sweep(&self, status: JobStatus, window: RetentionWindow) {
        match self.store.purge_finished(status, window).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(status = %status, removed = removed, "Finished media jobs purged");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, status = %status, "Retention sweep failed"),
        }
    }
}
