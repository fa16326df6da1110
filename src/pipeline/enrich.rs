//! Enrichment pass: secondary-source field updates with provenance.
//!
//! Field updates follow the same more-information-wins policy as
//! deduplication merging. Each call records exactly which fields
//! changed; applying the same payload twice is a no-op the second time,
//! so repeated enrichment runs cannot duplicate provenance entries or
//! referenced-work lists.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{
    ArticleRecord, EnrichmentConfig, EnrichmentEntry, RunManifest, SourceStatus, SourceSummary,
};
use crate::pipeline::dedup;
use crate::services::EnrichmentApi;
use crate::storage::LocalStore;

/// Field updates supplied by a secondary source. Absent fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentPayload {
    pub abstract_text: Option<String>,
    pub subjects: Option<BTreeSet<String>>,
    pub referenced_works: Option<Vec<String>>,
    pub cited_by_count: Option<u64>,
    pub authors: Option<Vec<String>>,
}

/// Apply a payload to an article, appending one provenance entry iff
/// any field actually changed value.
pub fn apply(
    article: &ArticleRecord,
    payload: &EnrichmentPayload,
    source_name: &str,
    timestamp: DateTime<Utc>,
) -> ArticleRecord {
    let mut updated = article.clone();
    let mut changed: BTreeSet<String> = BTreeSet::new();

    if payload.abstract_text.is_some() {
        let merged = dedup::pick_option(updated.abstract_text.clone(), payload.abstract_text.clone());
        if merged != updated.abstract_text {
            updated.abstract_text = merged;
            changed.insert("abstract".to_string());
        }
    }

    if let Some(subjects) = &payload.subjects {
        let merged: BTreeSet<String> = updated.subjects.union(subjects).cloned().collect();
        if merged != updated.subjects {
            updated.subjects = merged;
            changed.insert("subjects".to_string());
        }
    }

    if let Some(referenced) = &payload.referenced_works {
        let merged = dedup::union_ordered(updated.referenced_works.clone(), referenced.clone());
        if merged != updated.referenced_works {
            updated.referenced_works = merged;
            changed.insert("referenced_works".to_string());
        }
    }

    if let Some(count) = payload.cited_by_count {
        if count > updated.cited_by_count {
            updated.cited_by_count = count;
            changed.insert("cited_by_count".to_string());
        }
    }

    if let Some(authors) = &payload.authors {
        let merged = dedup::pick_authors(updated.authors.clone(), authors.clone());
        if merged != updated.authors {
            updated.authors = merged;
            changed.insert("authors".to_string());
        }
    }

    if !changed.is_empty() {
        updated.enrichment_log.push(EnrichmentEntry {
            timestamp,
            source: source_name.to_string(),
            enriched_fields: changed,
        });
    }

    updated
}

/// Run one enrichment pass from a secondary endpoint over every corpus
/// article that could still gain a field.
pub async fn run_enrich(
    endpoint: &EnrichmentConfig,
    api: Arc<dyn EnrichmentApi>,
    store: &LocalStore,
    shutdown: Arc<AtomicBool>,
) -> Result<RunManifest> {
    let started_at = Utc::now();
    let mut corpus = store.load_corpus().await?;
    let mut summary = SourceSummary::new(&endpoint.name);

    let candidates: Vec<String> = corpus
        .iter()
        .filter(|(_, article)| article.needs_enrichment())
        .map(|(key, _)| key.clone())
        .collect();

    log::info!(
        "[{}] enrich: {} of {} articles are candidates",
        endpoint.name,
        candidates.len(),
        corpus.len()
    );

    for key in candidates {
        if shutdown.load(Ordering::SeqCst) {
            log::warn!("[{}] enrich interrupted; committing progress", endpoint.name);
            summary.status = SourceStatus::Interrupted;
            break;
        }

        let article = corpus
            .get(&key)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("corpus key vanished: {key}")))?;

        let payload = match api.lookup(&article).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                summary.fetched += 1;
                continue;
            }
            Err(AppError::RateLimited { source_name, attempts }) => {
                log::error!("[{source_name}] enrich abandoned after {attempts} rate-limit retries");
                summary.status = SourceStatus::RateLimited;
                summary.message = Some(format!("rate limited after {attempts} attempts"));
                break;
            }
            Err(e) => {
                log::error!("[{}] enrich abandoned: {e}", endpoint.name);
                summary.status = SourceStatus::Unavailable;
                summary.message = Some(e.to_string());
                break;
            }
        };

        summary.fetched += 1;
        let updated = apply(&article, &payload, &endpoint.name, Utc::now());
        if updated != article {
            summary.merged_records += 1;
            corpus.insert(key, updated);
        }
    }

    store.save_corpus(&corpus).await?;

    let manifest = RunManifest {
        kind: "enrich".to_string(),
        started_at,
        finished_at: Utc::now(),
        corpus_size: corpus.len(),
        sources: vec![summary],
    };
    store.write_manifest(&manifest).await?;

    Ok(manifest)
}
