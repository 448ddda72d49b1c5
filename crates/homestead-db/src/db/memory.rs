//! In-process job store for single-node deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use homestead_core::{JobCounts, JobStatus, MediaJob, QueueError, RetentionWindow};

use super::job::JobStore;

/// [`JobStore`] backed by a map guarded by a mutex. Jobs do not survive a
/// restart.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, MediaJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, MediaJob>> {
        // A panic while holding the lock cannot leave a job half-written.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on an active job; `false` when the job is missing or settled.
    fn settle<F>(&self, job_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut MediaJob),
    {
        let mut jobs = self.lock();
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Active => {
                f(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &MediaJob) -> Result<(), QueueError> {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(&job.id) {
            if !existing.is_terminal() {
                return Err(QueueError::DuplicateJob(job.id));
            }
        }

        let now = Utc::now();
        let mut stored = job.clone();
        stored.status = JobStatus::Queued;
        stored.attempts = 0;
        stored.last_error = None;
        stored.failed_stage = None;
        stored.started_at = None;
        stored.finished_at = None;
        stored.created_at = now;
        stored.updated_at = now;
        jobs.insert(stored.id, stored);
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<MediaJob>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.lock();

        let next = jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Queued | JobStatus::Delayed))
            .filter(|job| job.run_at <= now)
            .min_by_key(|job| (job.run_at, job.created_at))
            .map(|job| job.id);

        let Some(job) = next.and_then(|id| jobs.get_mut(&id)) else {
            return Ok(None);
        };

        job.status = JobStatus::Active;
        job.attempts += 1;
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<bool, QueueError> {
        Ok(self.settle(job_id, |job| {
            job.status = JobStatus::Completed;
            job.last_error = None;
            job.failed_stage = None;
            job.finished_at = Some(Utc::now());
        }))
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        stage: Option<&str>,
    ) -> Result<bool, QueueError> {
        Ok(self.settle(job_id, |job| {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            job.failed_stage = stage.map(str::to_string);
            job.finished_at = Some(Utc::now());
        }))
    }

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
        stage: Option<&str>,
    ) -> Result<bool, QueueError> {
        Ok(self.settle(job_id, |job| {
            job.status = JobStatus::Delayed;
            job.run_at = run_at;
            job.last_error = Some(error.to_string());
            job.failed_stage = stage.map(str::to_string);
            job.started_at = None;
        }))
    }

    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut jobs = self.lock();
        let mut count = 0;

        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Active
                && job.started_at.is_some_and(|started| started < started_before);
            if !stale {
                continue;
            }
            job.last_error = Some("worker stopped before the attempt finished".to_string());
            if job.can_retry() {
                job.status = JobStatus::Queued;
                job.finished_at = None;
            } else {
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
            }
            job.run_at = now;
            job.started_at = None;
            job.updated_at = now;
            count += 1;
        }

        if count > 0 {
            tracing::warn!(count = count, "Recovered stale media jobs");
        }
        Ok(count)
    }

    async fn purge_finished(
        &self,
        status: JobStatus,
        window: RetentionWindow,
    ) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - Duration::seconds(window.max_age_secs);
        let mut jobs = self.lock();

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|job| job.status == status)
            .map(|job| (job.finished_at.unwrap_or(job.updated_at), job.id))
            .collect();
        // Newest first
        finished.sort_by(|a, b| b.cmp(a));

        let keep = usize::try_from(window.max_count.max(0)).unwrap_or(usize::MAX);
        let mut removed = 0;
        for (position, (finished_at, id)) in finished.into_iter().enumerate() {
            if position >= keep || finished_at < cutoff {
                jobs.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let jobs = self.lock();
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Delayed => counts.delayed += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, QueueError> {
        Ok(self.lock().get(&job_id).cloned())
    }
}
