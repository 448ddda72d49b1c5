use async_trait::async_trait;
use sqlx::PgPool;

use homestead_core::{ArtifactUpsert, MediaError, MediaResult};

/// Relational record of a processed media artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write the artifact and return the id of the record holding it.
    ///
    /// With a media id the existing record is updated in place; a missing
    /// record is an `InvalidJob`. Without one a record keyed by the job id is
    /// created, so repeating the call never creates a second record.
    async fn upsert_artifact(&self, artifact: &ArtifactUpsert) -> MediaResult<String>;
}

/// `property_media` table.
#[derive(Clone)]
pub struct PropertyMediaRepository {
    pool: PgPool,
}

impl PropertyMediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn update_existing(
        &self,
        media_id: &str,
        artifact: &ArtifactUpsert,
    ) -> MediaResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            UPDATE property_media
            SET content_type = $3,
                media_url = $4,
                blur_data_url = $5,
                updated_at = NOW()
            WHERE id = $1 AND property_id = $2
            RETURNING id
            "#,
        )
        .bind(media_id)
        .bind(&artifact.property_id)
        .bind(artifact.content_kind.as_str())
        .bind(&artifact.media_url)
        .bind(&artifact.placeholder)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| metadata_error("update property media", e))
    }

    async fn insert_for_job(&self, artifact: &ArtifactUpsert) -> MediaResult<String> {
        sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO property_media (
                property_id, content_type, media_url, blur_data_url, source_job_id
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_job_id) DO UPDATE SET
                content_type = EXCLUDED.content_type,
                media_url = EXCLUDED.media_url,
                blur_data_url = EXCLUDED.blur_data_url,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&artifact.property_id)
        .bind(artifact.content_kind.as_str())
        .bind(&artifact.media_url)
        .bind(&artifact.placeholder)
        .bind(artifact.job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| metadata_error("insert property media", e))
    }
}

fn metadata_error(action: &str, err: sqlx::Error) -> MediaError {
    tracing::error!(error = %err, "Failed to {}", action);
    MediaError::MetadataWrite(format!("Failed to {}: {}", action, err))
}

#[async_trait]
impl ArtifactStore for PropertyMediaRepository {
    #[tracing::instrument(
        skip(self, artifact),
        fields(job_id = %artifact.job_id, property_id = %artifact.property_id)
    )]
    async fn upsert_artifact(&self, artifact: &ArtifactUpsert) -> MediaResult<String> {
        let id = match artifact.media_id.as_deref() {
            Some(media_id) => self
                .update_existing(media_id, artifact)
                .await?
                .ok_or_else(|| {
                    MediaError::InvalidJob(format!(
                        "property media {} not found for property {}",
                        media_id, artifact.property_id
                    ))
                })?,
            None => self.insert_for_job(artifact).await?,
        };

        tracing::info!(
            media_id = %id,
            content_type = %artifact.content_kind,
            "Property media record written"
        );
        Ok(id)
    }
}
