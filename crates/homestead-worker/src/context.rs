//! Job handler trait
//!
//! The queue knows nothing about media processing; it hands every claimed job
//! to a `JobHandler` and records the outcome.

use async_trait::async_trait;

use homestead_core::{JobOutcome, MediaJob};
use homestead_services::MediaPipeline;

/// Runs one attempt of a claimed job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process `job` and report the outcome. Called exactly once per attempt;
    /// the returned future is dropped when the attempt times out.
    async fn handle(&self, job: &MediaJob) -> JobOutcome;
}

#[async_trait]
impl JobHandler for MediaPipeline {
    async fn handle(&self, job: &MediaJob) -> JobOutcome {
        self.run(job).await
    }
}
