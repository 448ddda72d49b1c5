//! Search index abstraction.

use async_trait::async_trait;
use homestead_core::{MediaResult, SearchMediaEntry};

/// Search index holding one document per property listing.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Add `entry` to the property's `media` list, replacing an entry with the
    /// same id. Creates the document, or its `media` list, when missing.
    ///
    /// Failures are reported as `MetadataWrite`.
    async fn upsert_media_entry(
        &self,
        property_id: &str,
        entry: &SearchMediaEntry,
    ) -> MediaResult<()>;
}
