//! Configuration module
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file). `Config::from_lookup` takes the variable source as a closure so the
//! parsing and validation rules can be exercised without touching the process
//! environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_MS, DEFAULT_COMPLETED_RETENTION_COUNT, DEFAULT_COMPLETED_RETENTION_SECS,
    DEFAULT_FAILED_RETENTION_COUNT, DEFAULT_FAILED_RETENTION_SECS, DEFAULT_JOB_TIMEOUT_SECS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_CONCURRENCY, PROPERTIES_INDEX,
};
use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_IMAGE_SIZE_MB: usize = 50;
const UPLOAD_CONCURRENCY: usize = 16;
const POLL_INTERVAL_MS: u64 = 1000;
const STALE_GRACE_SECS: u64 = 300;
const RETENTION_SWEEP_INTERVAL_SECS: u64 = 60;

/// How long and how many finished jobs of one kind are kept. Oldest go first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionWindow {
    pub max_age_secs: i64,
    pub max_count: i64,
}

/// Job queue tuning.
#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: i32,
    /// Delay before the first retry; doubles on each further attempt.
    pub backoff_ms: u64,
    pub job_timeout_secs: u64,
    /// Added to the job timeout before an `active` job is considered abandoned.
    pub stale_grace_secs: u64,
    pub retention_sweep_interval_secs: u64,
    pub completed_retention: RetentionWindow,
    pub failed_retention: RetentionWindow,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_QUEUE_CONCURRENCY,
            poll_interval_ms: POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            stale_grace_secs: STALE_GRACE_SECS,
            retention_sweep_interval_secs: RETENTION_SWEEP_INTERVAL_SECS,
            completed_retention: RetentionWindow {
                max_age_secs: DEFAULT_COMPLETED_RETENTION_SECS,
                max_count: DEFAULT_COMPLETED_RETENTION_COUNT,
            },
            failed_retention: RetentionWindow {
                max_age_secs: DEFAULT_FAILED_RETENTION_SECS,
                max_count: DEFAULT_FAILED_RETENTION_COUNT,
            },
        }
    }
}

impl QueueSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Worker configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub log_format: String,
    // Database
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Blob storage
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (Backblaze B2, MinIO, ...)
    pub s3_endpoint: Option<String>,
    /// Host appended to `<bucket>.` when building public URLs.
    pub s3_public_host: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    // Search index
    pub elasticsearch_endpoint: String,
    pub elasticsearch_api_key: Option<String>,
    pub elasticsearch_index: String,
    // Media processing
    pub ffmpeg_path: String,
    pub scratch_dir: String,
    pub max_image_size_bytes: usize,
    pub upload_concurrency: usize,
    // Job queue
    pub queue: QueueSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str, default: u64| -> u64 {
            var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::S3,
        };

        let defaults = QueueSettings::default();
        let queue = QueueSettings {
            concurrency: parse_or(var("MEDIA_QUEUE_CONCURRENCY"), defaults.concurrency).max(1),
            poll_interval_ms: parsed("MEDIA_QUEUE_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            max_attempts: parse_or(var("MEDIA_QUEUE_MAX_ATTEMPTS"), defaults.max_attempts).max(1),
            backoff_ms: parsed("MEDIA_QUEUE_BACKOFF_MS", defaults.backoff_ms),
            job_timeout_secs: parsed("MEDIA_QUEUE_JOB_TIMEOUT_SECS", defaults.job_timeout_secs),
            stale_grace_secs: parsed("MEDIA_QUEUE_STALE_GRACE_SECS", defaults.stale_grace_secs),
            retention_sweep_interval_secs: parsed(
                "MEDIA_QUEUE_RETENTION_SWEEP_SECS",
                defaults.retention_sweep_interval_secs,
            ),
            completed_retention: RetentionWindow {
                max_age_secs: parse_or(
                    var("MEDIA_QUEUE_COMPLETED_RETENTION_SECS"),
                    defaults.completed_retention.max_age_secs,
                ),
                max_count: parse_or(
                    var("MEDIA_QUEUE_COMPLETED_RETENTION_COUNT"),
                    defaults.completed_retention.max_count,
                ),
            },
            failed_retention: RetentionWindow {
                max_age_secs: parse_or(
                    var("MEDIA_QUEUE_FAILED_RETENTION_SECS"),
                    defaults.failed_retention.max_age_secs,
                ),
                max_count: parse_or(
                    var("MEDIA_QUEUE_FAILED_RETENTION_COUNT"),
                    defaults.failed_retention.max_count,
                ),
            },
        };

        let config = Config {
            environment,
            log_format: var("LOG_FORMAT")
                .unwrap_or_else(|| "pretty".to_string())
                .to_lowercase(),
            database_url: var("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: parse_or(var("DB_MAX_CONNECTIONS"), MAX_CONNECTIONS),
            db_timeout_seconds: parsed("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            storage_backend,
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION").or_else(|| var("AWS_REGION")),
            s3_endpoint: var("S3_ENDPOINT"),
            s3_public_host: var("S3_PUBLIC_HOST"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
            elasticsearch_endpoint: var("ELASTICSEARCH_ENDPOINT")
                .ok_or_else(|| anyhow::anyhow!("ELASTICSEARCH_ENDPOINT must be set"))?,
            elasticsearch_api_key: var("ELASTICSEARCH_API_KEY"),
            elasticsearch_index: var("ELASTICSEARCH_INDEX")
                .unwrap_or_else(|| PROPERTIES_INDEX.to_string()),
            ffmpeg_path: var("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            scratch_dir: var("SCRATCH_DIR").unwrap_or_else(|| {
                env::temp_dir()
                    .join("homestead-hls")
                    .to_string_lossy()
                    .to_string()
            }),
            max_image_size_bytes: parse_or(var("MAX_IMAGE_SIZE_MB"), MAX_IMAGE_SIZE_MB)
                * 1024
                * 1024,
            upload_concurrency: parse_or(var("UPLOAD_CONCURRENCY"), UPLOAD_CONCURRENCY).max(1),
            queue,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if !self.elasticsearch_endpoint.starts_with("http://")
            && !self.elasticsearch_endpoint.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "ELASTICSEARCH_ENDPOINT must be an http(s) URL"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        if self.queue.job_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "MEDIA_QUEUE_JOB_TIMEOUT_SECS must be greater than zero"
            ));
        }

        Ok(())
    }

    /// Check if the worker is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
