//! Application configuration structures.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream metadata API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Fetch/retry/concurrency behavior
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Export settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Journal sources to harvest
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Secondary endpoints for enrichment passes
    #[serde(default)]
    pub enrichment: Vec<EnrichmentConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.api.endpoint.trim().is_empty() {
            return Err(AppError::validation("api.endpoint is empty"));
        }
        if self.api.mailto.trim().is_empty() {
            return Err(AppError::validation(
                "api.mailto is empty; the upstream API requires a contact identifier",
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        if self.api.page_size == 0 || self.api.page_size > 200 {
            return Err(AppError::validation("api.page_size must be in 1..=200"));
        }
        if self.harvest.max_concurrent_sources == 0 {
            return Err(AppError::validation(
                "harvest.max_concurrent_sources must be > 0",
            ));
        }
        if self.harvest.requests_per_second == 0 {
            return Err(AppError::validation(
                "harvest.requests_per_second must be > 0",
            ));
        }
        if self.harvest.initial_backoff_ms == 0 {
            return Err(AppError::validation("harvest.initial_backoff_ms must be > 0"));
        }
        if self.harvest.max_backoff_ms < self.harvest.initial_backoff_ms {
            return Err(AppError::validation(
                "harvest.max_backoff_ms must be >= harvest.initial_backoff_ms",
            ));
        }
        if self.sources.is_empty() {
            return Err(AppError::validation("no sources defined"));
        }
        let mut seen_codes = BTreeSet::new();
        for source in &self.sources {
            if source.code.trim().is_empty() || source.filter.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "source '{}' needs a non-empty code and filter",
                    source.code
                )));
            }
            // Source codes key state files; duplicates would share one.
            if !seen_codes.insert(source.code.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source code '{}'",
                    source.code
                )));
            }
        }
        for endpoint in &self.enrichment {
            if endpoint.name.trim().is_empty() || endpoint.endpoint.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "enrichment source '{}' needs a non-empty name and endpoint",
                    endpoint.name
                )));
            }
        }
        for format in &self.output.formats {
            if !matches!(format.as_str(), "csv" | "jsonl" | "bibtex") {
                return Err(AppError::validation(format!(
                    "unknown output format '{format}' (expected csv, jsonl, or bibtex)"
                )));
            }
        }
        Ok(())
    }
}

/// Upstream metadata API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the paginated works endpoint
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// Contact identifier sent with every request (API etiquette)
    #[serde(default = "defaults::mailto")]
    pub mailto: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Records requested per page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Field-selection parameter sent to the API
    #[serde(default = "defaults::select_fields")]
    pub select_fields: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            mailto: defaults::mailto(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            page_size: defaults::page_size(),
            select_fields: defaults::select_fields(),
        }
    }
}

/// Fetch, retry, and concurrency behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Maximum sources fetched concurrently
    #[serde(default = "defaults::max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    /// Global outbound request budget shared across all source workers
    #[serde(default = "defaults::requests_per_second")]
    pub requests_per_second: u32,

    /// Retry bound for rate-limit and transient failures on one page
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles per retry
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: defaults::max_concurrent_sources(),
            requests_per_second: defaults::requests_per_second(),
            max_retries: defaults::max_retries(),
            initial_backoff_ms: defaults::initial_backoff_ms(),
            max_backoff_ms: defaults::max_backoff_ms(),
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Formats written by `export` when none are given on the CLI
    #[serde(default = "defaults::formats")]
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            formats: defaults::formats(),
        }
    }
}

/// One journal source to harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Short journal code used in state files, records, and logs
    pub code: String,

    /// API filter expression selecting this journal's works
    pub filter: String,

    /// Human-readable name
    #[serde(default)]
    pub display_name: String,
}

/// One secondary endpoint supplying enrichment payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Provenance name recorded in enrichment log entries
    pub name: String,

    /// Works endpoint queried by DOI
    pub endpoint: String,
}

mod defaults {
    pub fn endpoint() -> String {
        "https://api.openalex.org/works".into()
    }
    pub fn mailto() -> String {
        "corpus@example.org".into()
    }
    pub fn user_agent() -> String {
        "bibstack/0.1 (mailto:corpus@example.org)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn page_size() -> usize {
        200
    }
    pub fn select_fields() -> Vec<String> {
        vec![
            "id".into(),
            "doi".into(),
            "title".into(),
            "abstract".into(),
            "publication_year".into(),
            "authorships".into(),
            "concepts".into(),
            "cited_by_count".into(),
            "referenced_works".into(),
        ]
    }

    pub fn max_concurrent_sources() -> usize {
        4
    }
    pub fn requests_per_second() -> u32 {
        8
    }
    pub fn max_retries() -> u32 {
        5
    }
    pub fn initial_backoff_ms() -> u64 {
        500
    }
    pub fn max_backoff_ms() -> u64 {
        16_000
    }

    pub fn formats() -> Vec<String> {
        vec!["csv".into(), "jsonl".into()]
    }
}
