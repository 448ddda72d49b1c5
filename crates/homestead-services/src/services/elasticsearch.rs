//! Elasticsearch client for the `properties` index.
//!
//! Talks to the REST API directly: partial updates with a painless script for
//! media entries, and index creation with the listing mapping.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;

use homestead_core::{Config, MediaError, MediaResult, SearchMediaEntry};

use super::search_index::SearchIndex;

/// Concurrent updates to one property document retry this many times on
/// version conflicts.
const RETRY_ON_CONFLICT: u32 = 3;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Add-or-replace by id on `ctx._source.media`, initializing the list when it
/// is null or missing.
pub const MEDIA_UPSERT_SCRIPT: &str = r#"
if (ctx._source.media == null) {
  ctx._source.media = [];
}

boolean found = false;

for (int i = 0; i < ctx._source.media.size(); i++) {
  if (ctx._source.media[i].id == params.media.id) {
    ctx._source.media[i] = params.media;
    found = true;
    break;
  }
}

if (!found) {
  ctx._source.media.add(params.media);
}
"#;

/// Body of the `_update` request for one media entry.
fn media_update_body(entry: &SearchMediaEntry) -> Value {
    json!({
        "script": {
            "lang": "painless",
            "source": MEDIA_UPSERT_SCRIPT,
            "params": { "media": entry },
        },
        "upsert": {
            "media": [entry],
        },
    })
}

/// Mapping of the property listing documents.
pub fn properties_mapping() -> Value {
    let searchable_text = json!({
        "type": "text",
        "fields": { "keyword": { "type": "keyword" } },
        "copy_to": "semantic_field",
    });

    json!({
        "properties": {
            "price": { "type": "scaled_float", "scaling_factor": 100 },

            "purchaseType": { "type": "keyword" },
            "propertyType": { "type": "keyword" },
            "listingStatus": { "type": "keyword" },
            "tour": { "type": "keyword" },
            "stories": { "type": "keyword" },

            "beds": { "type": "integer" },
            "baths": { "type": "integer" },
            "garage": { "type": "integer" },

            "features": { "type": "keyword" },
            "amenities": { "type": "keyword" },

            "areaSize": { "type": "float" },
            "lotSize": { "type": "float" },

            "address": searchable_text.clone(),
            "street": searchable_text.clone(),
            "city": searchable_text.clone(),
            "country": searchable_text,

            "zipcode": { "type": "keyword" },
            "location": { "type": "geo_point" },

            "listingDate": { "type": "date" },
            "buildDate": { "type": "date" },
            "openHouse": { "type": "date" },

            "images": { "type": "keyword" },
            "media": {
                "properties": {
                    "id": { "type": "keyword" },
                    "contentType": { "type": "keyword" },
                    "mediaUrl": { "type": "keyword", "index": false },
                }
            },

            "semantic_field": { "type": "text" },
        }
    })
}

/// [`SearchIndex`] backed by an Elasticsearch cluster.
#[derive(Clone)]
pub struct ElasticsearchIndex {
    http_client: reqwest::Client,
    endpoint: Url,
    index: String,
    api_key: Option<String>,
}

impl ElasticsearchIndex {
    pub fn new(
        endpoint: impl Into<String>,
        index: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for Elasticsearch")?;

        let endpoint = endpoint.into();
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .with_context(|| format!("Invalid Elasticsearch endpoint: {}", endpoint))?;
        if endpoint.cannot_be_a_base() {
            return Err(anyhow::anyhow!(
                "Elasticsearch endpoint {} cannot carry a path",
                endpoint
            ));
        }

        Ok(Self {
            http_client,
            endpoint,
            index: index.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.elasticsearch_endpoint.clone(),
            config.elasticsearch_index.clone(),
            config.elasticsearch_api_key.clone(),
        )
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Endpoint URL with `segments` appended, each percent-encoded as one
    /// path segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in `new`: the endpoint can carry a path
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("authorization", format!("ApiKey {}", key)),
            None => builder,
        }
    }

    /// Create the index with the listing mapping unless it already exists.
    ///
    /// Returns whether the index was created.
    pub async fn ensure_index(&self) -> Result<bool> {
        let response = self
            .request(Method::HEAD, self.url(&[&self.index]))
            .send()
            .await
            .context("Failed to reach Elasticsearch")?;

        match response.status() {
            StatusCode::OK => {
                tracing::debug!(index = %self.index, "Search index already exists");
                return Ok(false);
            }
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(anyhow::anyhow!(
                    "Unexpected status checking index {}: {}",
                    self.index,
                    status
                ))
            }
        }

        let response = self
            .request(Method::PUT, self.url(&[&self.index]))
            .json(&json!({ "mappings": properties_mapping() }))
            .send()
            .await
            .context("Failed to send index creation request")?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(index = %self.index, "Search index created");
            return Ok(true);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        // Another worker created it in the meantime
        if status == StatusCode::BAD_REQUEST && error_text.contains("resource_already_exists") {
            return Ok(false);
        }

        Err(anyhow::anyhow!(
            "Index creation failed: {} - {}",
            status,
            error_text
        ))
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    #[tracing::instrument(skip(self, entry), fields(index = %self.index, media_id = %entry.id))]
    async fn upsert_media_entry(
        &self,
        property_id: &str,
        entry: &SearchMediaEntry,
    ) -> MediaResult<()> {
        let mut url = self.url(&[&self.index, "_update", property_id]);
        url.query_pairs_mut()
            .append_pair("retry_on_conflict", &RETRY_ON_CONFLICT.to_string());

        let response = self
            .request(Method::POST, url)
            .json(&media_update_body(entry))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, property_id = %property_id, "Search index request failed");
                MediaError::MetadataWrite(format!("Search index request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(
                status = %status,
                property_id = %property_id,
                error = %error_text,
                "Search index update rejected"
            );
            return Err(MediaError::MetadataWrite(format!(
                "Search index update failed: {} - {}",
                status, error_text
            )));
        }

        tracing::debug!(property_id = %property_id, "Search index media entry written");
        Ok(())
    }
}
