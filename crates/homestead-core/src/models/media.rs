use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Kind of derived media attached to a property.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Video,
}

impl ContentKind {
    /// Classify a declared content type by its top-level type.
    ///
    /// Returns `None` for anything that is neither `image/*` nor `video/*`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let normalized = content_type.trim().to_ascii_lowercase();
        if normalized.starts_with("video/") {
            Some(ContentKind::Video)
        } else if normalized.starts_with("image/") {
            Some(ContentKind::Image)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Image => "image",
            ContentKind::Video => "video",
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ContentKind::Image),
            "video" => Ok(ContentKind::Video),
            _ => Err(anyhow::anyhow!("Invalid content kind: {}", s)),
        }
    }
}

/// Write request for the relational media record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUpsert {
    /// Job that produced the artifact; inserts are idempotent on it.
    pub job_id: Uuid,
    /// Existing record to replace in place.
    pub media_id: Option<String>,
    pub property_id: String,
    pub content_kind: ContentKind,
    pub media_url: String,
    pub placeholder: Option<String>,
}

/// One entry of the `media` list on a property's search document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMediaEntry {
    pub id: String,
    pub content_type: ContentKind,
    pub media_url: String,
}
