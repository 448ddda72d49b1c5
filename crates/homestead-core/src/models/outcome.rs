use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::media::ContentKind;
use crate::error::MediaError;

/// Step of a media-processing attempt, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Classifying,
    ImageBranch,
    VideoBranch,
    Uploading,
    RecordingMetadata,
    CleaningUp,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Classifying => "classifying",
            Stage::ImageBranch => "image_branch",
            Stage::VideoBranch => "video_branch",
            Stage::Uploading => "uploading",
            Stage::RecordingMetadata => "recording_metadata",
            Stage::CleaningUp => "cleaning_up",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summary of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// `None` when the content type was neither image nor video.
    pub content_kind: Option<ContentKind>,
    pub artifact_id: Option<String>,
    pub media_url: Option<String>,
    pub uploaded_objects: usize,
    pub source_deleted: bool,
}

impl JobReport {
    /// Report for an object whose content type is not processed.
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Result of one attempt, recorded by the queue.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(JobReport),
    Failed { error: MediaError, stage: Stage },
}

impl JobOutcome {
    pub fn failed(error: MediaError, stage: Stage) -> Self {
        JobOutcome::Failed { error, stage }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}
