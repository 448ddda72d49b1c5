//! Homestead Services Layer
//!
//! This crate is the **business service layer**: it hosts the
//! [`MediaPipeline`] orchestrator that runs one media job end to end, and the
//! search index integration the pipeline writes to. Storage, processing and
//! persistence stay in their own crates; coordination lives here.

pub mod pipeline;
pub mod services;

pub use pipeline::{MediaPipeline, PipelineConfig};
pub use services::{
    elasticsearch::{properties_mapping, ElasticsearchIndex, MEDIA_UPSERT_SCRIPT},
    search_index::SearchIndex,
};
