//! Per-run manifest.
//!
//! Every harvest or enrichment run produces a manifest summarizing
//! successes, skipped records, and failed sources. Failures surface
//! here rather than as a silent partial success.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final status of one source within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceStatus {
    /// All pages fetched and committed
    Completed,
    /// Abandoned after the rate-limit retry bound; state untouched
    RateLimited,
    /// Abandoned on a non-retryable or retry-exhausted failure; state untouched
    Unavailable,
    /// Persisted state failed integrity checks; operator reset required
    StateCorrupt,
    /// Run was interrupted between pages; committed progress preserved
    Interrupted,
}

/// Per-source outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Journal code of the source
    pub source: String,

    /// Final status
    pub status: SourceStatus,

    /// Pages fetched this run
    pub pages: usize,

    /// Raw records returned by the API
    pub fetched: usize,

    /// Records skipped because their raw id was already known
    pub skipped_known: usize,

    /// Records skipped for failing required-field validation
    pub skipped_malformed: usize,

    /// Canonical records newly added to the corpus
    pub new_records: usize,

    /// Records merged into an existing canonical record
    pub merged_records: usize,

    /// Failure detail, when status is not `Completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SourceSummary {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Completed,
            pages: 0,
            fetched: 0,
            skipped_known: 0,
            skipped_malformed: 0,
            new_records: 0,
            merged_records: 0,
            message: None,
        }
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Kind of run ("harvest" or "enrich")
    pub kind: String,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Corpus size after the run
    pub corpus_size: usize,

    /// Per-source outcomes
    pub sources: Vec<SourceSummary>,
}

impl RunManifest {
    /// Whether any source failed or was interrupted.
    pub fn has_failures(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.status != SourceStatus::Completed)
    }

    /// Total records skipped as malformed across all sources.
    pub fn total_malformed(&self) -> usize {
        self.sources.iter().map(|s| s.skipped_malformed).sum()
    }

    /// Total canonical records added across all sources.
    pub fn total_new(&self) -> usize {
        self.sources.iter().map(|s| s.new_records).sum()
    }
}
