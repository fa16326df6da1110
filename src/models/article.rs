//! Article record data structures.
//!
//! `ArticleRecord` is the unit of the corpus. Missing and empty are
//! distinct states: an absent abstract is `None`, never `""`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::RawWork;

/// Minimum whitespace-delimited token count for an abstract to be
/// considered usable by downstream consumers. Published contract.
pub const MIN_ABSTRACT_TOKENS: usize = 20;

/// One provenance entry: which source changed which fields, and when.
///
/// Entries are append-only; they are never mutated or removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct EnrichmentEntry {
    /// Timestamp of the enrichment pass
    pub timestamp: DateTime<Utc>,

    /// Name of the enrichment source
    pub source: String,

    /// Names of the fields whose value actually changed in this pass
    pub enriched_fields: BTreeSet<String>,
}

/// A canonical journal article record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleRecord {
    /// Digital Object Identifier, when the upstream source supplied one.
    /// Preferred canonical identity.
    pub doi: Option<String>,

    /// Article title
    pub title: String,

    /// Abstract text; `None` when no source has supplied one yet
    #[serde(default)]
    pub abstract_text: Option<String>,

    /// Author display names, in publication order
    #[serde(default)]
    pub authors: Vec<String>,

    /// Code of the journal this article was harvested from
    pub journal_code: String,

    /// Publication year
    pub year: i32,

    /// Subject/keyword terms
    #[serde(default)]
    pub subjects: BTreeSet<String>,

    /// Citation count reported upstream; monotonically non-decreasing
    #[serde(default)]
    pub cited_by_count: u64,

    /// External identifiers of works this article references.
    /// Deduplicated; first-seen order is preserved for display only.
    #[serde(default)]
    pub referenced_works: Vec<String>,

    /// Append-only provenance log of enrichment passes
    #[serde(default)]
    pub enrichment_log: Vec<EnrichmentEntry>,
}

impl ArticleRecord {
    /// Build a record from a raw API work, validating required fields.
    ///
    /// A work without a non-empty title or a publication year is
    /// malformed: there is no way to form a fallback identity for it.
    pub fn from_raw(raw: &RawWork, journal_code: &str) -> Result<Self> {
        let title = raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::malformed(journal_code, format!("work {}: no title", raw.id)))?
            .to_string();

        let year = raw
            .publication_year
            .ok_or_else(|| AppError::malformed(journal_code, format!("work {}: no year", raw.id)))?;

        let authors: Vec<String> = raw
            .authorships
            .iter()
            .map(|a| a.author.display_name.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        let subjects: BTreeSet<String> = raw
            .concepts
            .iter()
            .map(|c| c.display_name.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut referenced_works = Vec::new();
        let mut seen = BTreeSet::new();
        for work in &raw.referenced_works {
            if seen.insert(work.clone()) {
                referenced_works.push(work.clone());
            }
        }

        Ok(Self {
            doi: raw
                .doi
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            title,
            abstract_text: raw
                .abstract_text
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            authors,
            journal_code: journal_code.to_string(),
            year,
            subjects,
            cited_by_count: raw.cited_by_count.unwrap_or(0),
            referenced_works,
            enrichment_log: Vec::new(),
        })
    }

    /// Whether the abstract meets the minimum-length contract for
    /// downstream consumption.
    pub fn has_usable_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .map(|a| a.split_whitespace().count() >= MIN_ABSTRACT_TOKENS)
            .unwrap_or(false)
    }

    /// Whether an enrichment pass could still add anything to this record.
    pub fn needs_enrichment(&self) -> bool {
        !self.has_usable_abstract() || self.subjects.is_empty() || self.referenced_works.is_empty()
    }
}
