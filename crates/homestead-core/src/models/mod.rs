//! Domain models shared by the queue, the orchestrator and the stores.

pub mod job;
pub mod media;
pub mod outcome;

pub use job::{JobCounts, JobStatus, MediaJob, UploadEvent};
pub use media::{ArtifactUpsert, ContentKind, SearchMediaEntry};
pub use outcome::{JobOutcome, JobReport, Stage};
