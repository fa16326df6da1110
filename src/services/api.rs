//! Raw API record types and the page-fetch seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::SourceConfig;

/// One work as returned by the upstream API, before validation.
///
/// Every field is optional or defaulted; required-field validation
/// happens in `ArticleRecord::from_raw`, not during deserialization,
/// so one malformed work cannot fail a whole page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawWork {
    /// Upstream record identifier (tracked in `SourceState::known_ids`)
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub doi: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub publication_year: Option<i32>,

    #[serde(default)]
    pub authorships: Vec<RawAuthorship>,

    #[serde(default)]
    pub concepts: Vec<RawConcept>,

    #[serde(default)]
    pub cited_by_count: Option<u64>,

    #[serde(default)]
    pub referenced_works: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawAuthorship {
    #[serde(default)]
    pub author: RawAuthor,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawAuthor {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawConcept {
    #[serde(default)]
    pub display_name: String,
}

/// One page of raw works plus the cursor for the next page.
///
/// `next_cursor == None` is the end sentinel.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub records: Vec<RawWork>,
    pub next_cursor: Option<String>,
}

/// Wire shape of a paginated API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub results: Vec<RawWork>,

    #[serde(default)]
    pub meta: ApiMeta,
}

/// Pagination metadata.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiMeta {
    #[serde(default)]
    pub next_cursor: Option<String>,

    #[serde(default)]
    pub count: Option<u64>,
}

/// Paginated read access to the upstream works API.
///
/// The implementation never advances the cursor itself: the orchestrator
/// persists the returned `next_cursor` only after the page's records have
/// been durably processed (at-least-once delivery; duplicates are removed
/// by the deduplicator).
#[async_trait]
pub trait WorkApi: Send + Sync {
    /// Fetch one page for a source, starting at `cursor`
    /// (`None` for the beginning).
    async fn fetch_page(&self, source: &SourceConfig, cursor: Option<&str>) -> Result<RawPage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_with_missing_fields() {
        let body = r#"{
            "results": [
                {"id": "W1", "title": "A", "publication_year": 2021},
                {"id": "W2"}
            ],
            "meta": {"next_cursor": "abc", "count": 2}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.meta.next_cursor.as_deref(), Some("abc"));
        assert!(parsed.results[1].title.is_none());
    }

    #[test]
    fn response_parses_end_sentinel() {
        let body = r#"{"results": [], "meta": {"next_cursor": null}}"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.meta.next_cursor.is_none());
    }
}
