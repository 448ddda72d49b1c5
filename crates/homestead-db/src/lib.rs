//! Homestead Database Layer
//!
//! Persistence for the media pipeline: the durable job store backing the
//! queue and the relational media records written by the orchestrator.

pub mod db;
pub mod setup;

// Re-exports: repositories and the traits the pipeline depends on
pub use db::{
    ArtifactStore, JobRepository, JobStore, MemoryJobStore, PropertyMediaRepository,
    JOB_NOTIFY_CHANNEL,
};
pub use setup::{setup_database, MIGRATOR};
