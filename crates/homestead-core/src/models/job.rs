use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::error::{MediaError, MediaResult};

/// Payload of an upload-completion event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    pub property_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    pub object_key: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Waiting for its retry backoff to elapse.
    Delayed,
    /// Claimed by a worker.
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Delayed => write!(f, "delayed"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "delayed" => Ok(JobStatus::Delayed),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// A unit of media-processing work owned by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaJob {
    pub id: Uuid,
    pub property_id: String,
    pub media_id: Option<String>,
    pub object_key: String,
    pub status: JobStatus,
    /// Number of attempts started so far (incremented on claim).
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub failed_stage: Option<String>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for MediaJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(MediaJob {
            id: row.try_get("id")?,
            property_id: row.try_get("property_id")?,
            media_id: row.try_get("media_id")?,
            object_key: row.try_get("object_key")?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job status: {}", e).into())
            })?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            last_error: row.try_get("last_error")?,
            failed_stage: row.try_get("failed_stage")?,
            run_at: row.try_get("run_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl MediaJob {
    /// Build a queued job with a caller-chosen id.
    pub fn new(id: Uuid, event: UploadEvent) -> Self {
        let now = Utc::now();
        Self {
            id,
            property_id: event.property_id,
            media_id: event.media_id,
            object_key: event.object_key,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            failed_stage: None,
            run_at: now,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a queued job with a fresh id, one per physical upload.
    pub fn from_event(event: UploadEvent) -> Self {
        Self::new(Uuid::new_v4(), event)
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt may be scheduled after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Final path component of the object key without its extension,
    /// e.g. `video1` for `raw/video1.mp4`.
    pub fn base_name(&self) -> Option<&str> {
        Path::new(&self.object_key)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
    }

    /// Reject payloads that can never be processed.
    pub fn validate(&self) -> MediaResult<()> {
        if self.property_id.trim().is_empty() {
            return Err(MediaError::InvalidJob("property id is empty".to_string()));
        }
        if self.object_key.trim().is_empty() {
            return Err(MediaError::InvalidJob("object key is empty".to_string()));
        }
        if self.base_name().is_none() {
            return Err(MediaError::InvalidJob(format!(
                "object key {} has no file name",
                self.object_key
            )));
        }
        Ok(())
    }
}

/// Number of jobs per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: i64,
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

impl JobCounts {
    /// Jobs that still have to run (queued now or after a backoff).
    pub fn pending(&self) -> i64 {
        self.queued + self.delayed
    }
}
