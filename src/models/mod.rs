// src/models/mod.rs

//! Domain models for the corpus builder.

mod article;
mod config;
mod manifest;
mod state;

// Re-export all public types
pub use article::{ArticleRecord, EnrichmentEntry, MIN_ABSTRACT_TOKENS};
pub use config::{ApiConfig, Config, EnrichmentConfig, HarvestConfig, OutputConfig, SourceConfig};
pub use manifest::{RunManifest, SourceStatus, SourceSummary};
pub use state::SourceState;
