//! Homestead Worker
//!
//! Durable media job queue: a bounded worker pool that claims jobs from a
//! [`homestead_db::JobStore`], runs them through a [`JobHandler`], and applies
//! the retry, timeout and retention policy. The `homestead-worker` binary wires
//! the queue to the media pipeline.

pub mod context;
pub mod queue;
pub mod telemetry;

pub use context::JobHandler;
pub use queue::{compute_retry_backoff, JobQueue, JobQueueConfig, QueueEvent, MAX_RETRY_BACKOFF_SECS};
