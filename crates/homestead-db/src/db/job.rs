use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use homestead_core::{JobCounts, JobStatus, MediaJob, QueueError, RetentionWindow};

/// Channel notified after a job is inserted, so idle workers on other hosts
/// wake before their next poll.
pub const JOB_NOTIFY_CHANNEL: &str = "homestead_media_job";

/// Durable storage behind the job queue.
///
/// State transitions out of `active` only apply to a job that is still
/// active; they return `false` when the job was already settled, which makes
/// them safe to repeat.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new queued job.
    ///
    /// A job whose id is already queued, delayed or active is rejected with
    /// [`QueueError::DuplicateJob`]. A finished job with the same id is
    /// replaced and runs again.
    async fn insert(&self, job: &MediaJob) -> Result<(), QueueError>;

    /// Atomically claim the oldest due job, moving it to `active` and
    /// counting the attempt.
    async fn claim_next(&self) -> Result<Option<MediaJob>, QueueError>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<bool, QueueError>;

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        stage: Option<&str>,
    ) -> Result<bool, QueueError>;

    /// Move an active job to `delayed` until `run_at`.
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
        stage: Option<&str>,
    ) -> Result<bool, QueueError>;

    /// Recover jobs whose worker vanished: active jobs started before
    /// `started_before` go back to `queued`, or to `failed` once their
    /// attempts are used up. Returns the number of jobs touched.
    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64, QueueError>;

    /// Delete finished jobs in `status` that fall outside the retention
    /// window (older than its age, or beyond its count of newest jobs).
    async fn purge_finished(
        &self,
        status: JobStatus,
        window: RetentionWindow,
    ) -> Result<u64, QueueError>;

    async fn counts(&self) -> Result<JobCounts, QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, QueueError>;
}

const JOB_COLUMNS: &str = r#"
    id,
    property_id,
    media_id,
    object_key,
    status,
    attempts,
    max_attempts,
    last_error,
    failed_stage,
    run_at,
    started_at,
    finished_at,
    created_at,
    updated_at
"#;

/// Postgres job store; workers on any number of hosts can share it.
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: &MediaJob) -> Result<(), QueueError> {
        // Replaces a finished row with the same id; leaves unfinished ones alone.
        let inserted = sqlx::query(
            r#"
            INSERT INTO media_jobs (
                id, property_id, media_id, object_key, status, attempts,
                max_attempts, run_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                property_id = EXCLUDED.property_id,
                media_id = EXCLUDED.media_id,
                object_key = EXCLUDED.object_key,
                status = 'queued',
                attempts = 0,
                max_attempts = EXCLUDED.max_attempts,
                last_error = NULL,
                failed_stage = NULL,
                run_at = EXCLUDED.run_at,
                started_at = NULL,
                finished_at = NULL,
                updated_at = NOW()
            WHERE media_jobs.status IN ('completed', 'failed')
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.property_id)
        .bind(&job.media_id)
        .bind(&job.object_key)
        .bind(job.max_attempts)
        .bind(job.run_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, job_id = %job.id, "Failed to insert media job");
            QueueError::from(e)
        })?;

        if inserted.is_none() {
            tracing::warn!(job_id = %job.id, "Rejected duplicate media job");
            return Err(QueueError::DuplicateJob(job.id));
        }

        tracing::debug!(
            job_id = %job.id,
            property_id = %job.property_id,
            object_key = %job.object_key,
            "Media job inserted"
        );

        // Workers fall back to polling when the notification is lost
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_NOTIFY_CHANNEL)
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, job_id = %job.id, "Failed to notify workers of new job");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn claim_next(&self) -> Result<Option<MediaJob>, QueueError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for job claim")?;

        let candidate: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM media_jobs
            WHERE status IN ('queued', 'delayed')
            AND run_at <= NOW()
            ORDER BY run_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to select next media job")?;

        let Some(job_id) = candidate else {
            tx.commit()
                .await
                .context("Failed to commit empty job claim")?;
            return Ok(None);
        };

        let job = sqlx::query_as::<Postgres, MediaJob>(&format!(
            r#"
            UPDATE media_jobs
            SET status = 'active',
                attempts = attempts + 1,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to mark media job active")?;

        tx.commit()
            .await
            .context("Failed to commit job claim")?;

        tracing::debug!(job_id = %job.id, attempt = job.attempts, "Media job claimed");
        Ok(Some(job))
    }

    #[tracing::instrument(skip(self))]
    async fn mark_completed(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = 'completed',
                last_error = NULL,
                failed_stage = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark media job completed")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, error))]
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        stage: Option<&str>,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = 'failed',
                last_error = $2,
                failed_stage = $3,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(stage)
        .execute(&self.pool)
        .await
        .context("Failed to mark media job failed")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, error))]
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        run_at: DateTime<Utc>,
        error: &str,
        stage: Option<&str>,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = 'delayed',
                run_at = $2,
                last_error = $3,
                failed_stage = $4,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(job_id)
        .bind(run_at)
        .bind(error)
        .bind(stage)
        .execute(&self.pool)
        .await
        .context("Failed to schedule media job retry")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'queued' END,
                last_error = 'worker stopped before the attempt finished',
                finished_at = CASE WHEN attempts >= max_attempts THEN NOW() ELSE NULL END,
                run_at = NOW(),
                started_at = NULL,
                updated_at = NOW()
            WHERE status = 'active'
            AND started_at < $1
            "#,
        )
        .bind(started_before)
        .execute(&self.pool)
        .await
        .context("Failed to requeue stale media jobs")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count = count, "Recovered stale media jobs");
        }
        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn purge_finished(
        &self,
        status: JobStatus,
        window: RetentionWindow,
    ) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            WITH ranked AS (
                SELECT id,
                       finished_at,
                       ROW_NUMBER() OVER (ORDER BY finished_at DESC, id) AS position
                FROM media_jobs
                WHERE status = $1
            ),
            deleted AS (
                DELETE FROM media_jobs m
                USING ranked r
                WHERE m.id = r.id
                AND (
                    r.position > $3
                    OR r.finished_at < NOW() - ($2::bigint * INTERVAL '1 second')
                )
                RETURNING m.id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(status.to_string())
        .bind(window.max_age_secs)
        .bind(window.max_count)
        .fetch_one(&self.pool)
        .await
        .context("Failed to purge finished media jobs")?;

        if count > 0 {
            tracing::info!(status = %status, count = count, "Purged finished media jobs");
        }
        Ok(count.max(0) as u64)
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*)::bigint AS count
            FROM media_jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count media jobs")?;

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match status.parse::<JobStatus>()? {
                JobStatus::Queued => counts.queued = count,
                JobStatus::Delayed => counts.delayed = count,
                JobStatus::Active => counts.active = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, QueueError> {
        let job = sqlx::query_as::<Postgres, MediaJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM media_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch media job")?;

        Ok(job)
    }
}
