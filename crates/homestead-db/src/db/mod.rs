//! Database repositories
//!
//! Each repository owns one table. The traits are what the queue and the
//! orchestrator depend on, so both can run against in-memory doubles.

pub mod artifact;
pub mod job;
pub mod memory;

pub use artifact::{ArtifactStore, PropertyMediaRepository};
pub use job::{JobRepository, JobStore, JOB_NOTIFY_CHANNEL};
pub use memory::MemoryJobStore;
