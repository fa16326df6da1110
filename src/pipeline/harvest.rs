//! Harvest orchestration.
//!
//! Bounded concurrent source workers feed a single shared corpus map.
//! Per page, the ordering is fixed: fetch, merge under the corpus lock,
//! persist the corpus, then commit the source's cursor state. A crash
//! at any point therefore re-fetches at most the in-flight page and
//! never loses a committed one; re-fetched records are absorbed by the
//! deduplicating merge and the `known_ids` skip.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    ArticleRecord, Config, RunManifest, SourceConfig, SourceState, SourceStatus, SourceSummary,
};
use crate::pipeline::dedup;
use crate::services::WorkApi;
use crate::storage::{Corpus, LocalStore};

/// Run an incremental harvest across all configured sources.
pub async fn run_harvest(
    config: &Config,
    api: Arc<dyn WorkApi>,
    store: &LocalStore,
    shutdown: Arc<AtomicBool>,
) -> Result<RunManifest> {
    let started_at = Utc::now();
    let corpus = Arc::new(Mutex::new(store.load_corpus().await?));

    log::info!(
        "harvest: {} sources, corpus holds {} records",
        config.sources.len(),
        corpus.lock().await.len()
    );

    let concurrency = config.harvest.max_concurrent_sources.max(1);
    let mut summaries: Vec<SourceSummary> = stream::iter(config.sources.clone())
        .map(|source| {
            let api = Arc::clone(&api);
            let corpus = Arc::clone(&corpus);
            let shutdown = Arc::clone(&shutdown);
            let store = store.clone();
            async move { harvest_source(&source, api.as_ref(), &store, &corpus, &shutdown).await }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    // Workers finish in arbitrary order; the manifest is deterministic.
    summaries.sort_by(|a, b| a.source.cmp(&b.source));

    for summary in &summaries {
        log::info!(
            "[{}] {:?}: {} pages, {} fetched, {} new, {} merged, {} known, {} malformed",
            summary.source,
            summary.status,
            summary.pages,
            summary.fetched,
            summary.new_records,
            summary.merged_records,
            summary.skipped_known,
            summary.skipped_malformed,
        );
    }

    let corpus_size = corpus.lock().await.len();
    let manifest = RunManifest {
        kind: "harvest".to_string(),
        started_at,
        finished_at: Utc::now(),
        corpus_size,
        sources: summaries,
    };
    store.write_manifest(&manifest).await?;
    Ok(manifest)
}

/// Harvest one source page by page. Failures are folded into the
/// returned summary; they never propagate to sibling sources.
async fn harvest_source(
    source: &SourceConfig,
    api: &dyn WorkApi,
    store: &LocalStore,
    corpus: &Mutex<Corpus>,
    shutdown: &AtomicBool,
) -> SourceSummary {
    let mut summary = SourceSummary::new(&source.code);

    let mut state = match store.load_state(&source.code).await {
        Ok(Some(state)) => state,
        Ok(None) => SourceState::new(),
        Err(e) => {
            log::error!("[{}] refusing to run: {e}", source.code);
            summary.status = SourceStatus::StateCorrupt;
            summary.message = Some(e.to_string());
            return summary;
        }
    };

    loop {
        // Interrupts are honored between pages, never mid-page.
        if shutdown.load(Ordering::SeqCst) {
            log::warn!("[{}] interrupted; committed progress preserved", source.code);
            summary.status = SourceStatus::Interrupted;
            break;
        }

        let page = match api.fetch_page(source, state.last_cursor.as_deref()).await {
            Ok(page) => page,
            Err(AppError::RateLimited { attempts, .. }) => {
                log::error!(
                    "[{}] suspended after {attempts} rate-limit retries",
                    source.code
                );
                summary.status = SourceStatus::RateLimited;
                summary.message = Some(format!("rate limited after {attempts} attempts"));
                break;
            }
            Err(e) => {
                log::error!("[{}] abandoned for this run: {e}", source.code);
                summary.status = SourceStatus::Unavailable;
                summary.message = Some(e.to_string());
                break;
            }
        };

        summary.pages += 1;
        summary.fetched += page.records.len();

        // Merge the page and persist the corpus before touching state.
        let persisted = {
            let mut corpus = corpus.lock().await;
            merge_page(&page.records, source, &mut corpus, &mut state, &mut summary);
            store.save_corpus(&corpus).await
        };

        if let Err(e) = persisted {
            log::error!("[{}] corpus persist failed: {e}", source.code);
            summary.status = SourceStatus::Unavailable;
            summary.message = Some(format!("corpus persist failed: {e}"));
            break;
        }

        state.last_cursor = page.next_cursor.clone();
        state.last_run_at = Utc::now();
        if let Err(e) = store.commit_state(&source.code, &state).await {
            log::error!("[{}] state commit failed: {e}", source.code);
            summary.status = SourceStatus::Unavailable;
            summary.message = Some(format!("state commit failed: {e}"));
            break;
        }

        if page.next_cursor.is_none() {
            break;
        }
    }

    summary
}

/// Fold one page of raw records into the corpus.
fn merge_page(
    records: &[crate::services::RawWork],
    source: &SourceConfig,
    corpus: &mut Corpus,
    state: &mut SourceState,
    summary: &mut SourceSummary,
) {
    for raw in records {
        if raw.id.is_empty() {
            log::warn!("[{}] record without id skipped", source.code);
            summary.skipped_malformed += 1;
            continue;
        }
        if state.known_ids.contains(&raw.id) {
            summary.skipped_known += 1;
            continue;
        }

        let article = match ArticleRecord::from_raw(raw, &source.code) {
            Ok(article) => article,
            Err(e) => {
                log::warn!("[{}] {e}", source.code);
                summary.skipped_malformed += 1;
                continue;
            }
        };

        let key = dedup::resolve(&article);
        let existing = corpus.remove(&key);
        if existing.is_some() {
            summary.merged_records += 1;
        } else {
            summary.new_records += 1;
        }
        corpus.insert(key, dedup::merge(existing, article));
        state.known_ids.insert(raw.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{RawPage, RawWork};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn work(id: &str, doi: &str, title: &str) -> RawWork {
        RawWork {
            id: id.to_string(),
            doi: Some(doi.to_string()),
            title: Some(title.to_string()),
            publication_year: Some(2023),
            ..RawWork::default()
        }
    }

    /// Serves a fixed page sequence; cursors are "p1", "p2", ...
    struct MockApi {
        pages: Vec<Vec<RawWork>>,
        fail_source: Option<String>,
        drop_connection_for: Option<String>,
        shutdown_after_page: Option<Arc<AtomicBool>>,
    }

    impl MockApi {
        fn serving(pages: Vec<Vec<RawWork>>) -> Self {
            Self {
                pages,
                fail_source: None,
                drop_connection_for: None,
                shutdown_after_page: None,
            }
        }
    }

    #[async_trait]
    impl WorkApi for MockApi {
        async fn fetch_page(
            &self,
            source: &SourceConfig,
            cursor: Option<&str>,
        ) -> crate::error::Result<RawPage> {
            if self.fail_source.as_deref() == Some(source.code.as_str()) {
                return Err(AppError::unavailable(&source.code, "HTTP 400 Bad Request"));
            }

            if self.drop_connection_for.as_deref() == Some(source.code.as_str()) {
                return Err(AppError::transient(&source.code, "connection reset by peer"));
            }

            let index = match cursor {
                None => 0,
                Some(c) => c.trim_start_matches('p').parse::<usize>().unwrap(),
            };
            let next = (index + 1 < self.pages.len()).then(|| format!("p{}", index + 1));

            if let Some(flag) = &self.shutdown_after_page {
                flag.store(true, Ordering::SeqCst);
            }

            Ok(RawPage {
                records: self.pages[index].clone(),
                next_cursor: next,
            })
        }
    }

    fn config(codes: &[&str]) -> Config {
        Config {
            sources: codes
                .iter()
                .map(|code| SourceConfig {
                    code: code.to_string(),
                    filter: format!("primary_location.source.id:{code}"),
                    display_name: String::new(),
                })
                .collect(),
            ..Config::default()
        }
    }

    /// 200 + 50 records with 10 resubmitted across the page boundary
    /// under fresh raw ids.
    fn two_pages_with_duplicates() -> Vec<Vec<RawWork>> {
        let page1: Vec<RawWork> = (0..200)
            .map(|i| work(&format!("W{i}"), &format!("10.1/{i}"), &format!("Article {i}")))
            .collect();

        let mut page2: Vec<RawWork> = (200..240)
            .map(|i| work(&format!("W{i}"), &format!("10.1/{i}"), &format!("Article {i}")))
            .collect();
        for i in 0..10 {
            page2.push(work(
                &format!("W9{i:02}"),
                &format!("10.1/{i}"),
                &format!("Article {i} (resubmitted)"),
            ));
        }
        vec![page1, page2]
    }

    #[tokio::test]
    async fn cross_page_duplicates_collapse_to_240() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let api = Arc::new(MockApi::serving(two_pages_with_duplicates()));

        let manifest = run_harvest(
            &config(&["jacs"]),
            api,
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        assert_eq!(manifest.corpus_size, 240);
        let summary = &manifest.sources[0];
        assert_eq!(summary.status, SourceStatus::Completed);
        assert_eq!(summary.fetched, 250);
        assert_eq!(summary.new_records, 240);
        assert_eq!(summary.merged_records, 10);

        let corpus = store.load_corpus().await.unwrap();
        assert_eq!(corpus.len(), 240);
    }

    #[tokio::test]
    async fn rerun_with_unchanged_upstream_adds_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let config = config(&["jacs"]);
        let shutdown = Arc::new(AtomicBool::new(false));

        let api = Arc::new(MockApi::serving(two_pages_with_duplicates()));
        run_harvest(&config, Arc::clone(&api) as Arc<dyn WorkApi>, &store, Arc::clone(&shutdown))
            .await
            .unwrap();

        let second = run_harvest(&config, api, &store, shutdown).await.unwrap();
        assert_eq!(second.total_new(), 0);
        assert_eq!(second.sources[0].merged_records, 0);
        assert_eq!(second.sources[0].skipped_known, 250);
        assert_eq!(second.corpus_size, 240);
    }

    #[tokio::test]
    async fn crash_before_state_commit_loses_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let pages = two_pages_with_duplicates();

        // Simulate a crash that merged and persisted page 1 but died
        // before committing state: corpus has the records, no state file.
        let mut corpus = Corpus::new();
        for raw in &pages[0] {
            let article = ArticleRecord::from_raw(raw, "jacs").unwrap();
            corpus.insert(dedup::resolve(&article), article);
        }
        store.save_corpus(&corpus).await.unwrap();

        let api = Arc::new(MockApi::serving(pages));
        let manifest = run_harvest(
            &config(&["jacs"]),
            api,
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        // Page 1 is re-fetched and re-merged; nothing lost, nothing doubled.
        assert_eq!(manifest.corpus_size, 240);
        assert_eq!(manifest.sources[0].pages, 2);
        assert_eq!(manifest.sources[0].new_records, 40);
    }

    #[tokio::test]
    async fn crash_after_state_commit_skips_the_page() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let pages = two_pages_with_duplicates();

        // Simulate a crash right after page 1's commit: corpus and state
        // both reflect page 1.
        let mut corpus = Corpus::new();
        let mut state = SourceState::new();
        for raw in &pages[0] {
            let article = ArticleRecord::from_raw(raw, "jacs").unwrap();
            corpus.insert(dedup::resolve(&article), article);
            state.known_ids.insert(raw.id.clone());
        }
        state.last_cursor = Some("p1".to_string());
        store.save_corpus(&corpus).await.unwrap();
        store.commit_state("jacs", &state).await.unwrap();

        let api = Arc::new(MockApi::serving(pages));
        let manifest = run_harvest(
            &config(&["jacs"]),
            api,
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        // Only page 2 is processed; no duplicate reprocessing.
        let summary = &manifest.sources[0];
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.fetched, 50);
        assert_eq!(summary.new_records, 40);
        assert_eq!(summary.merged_records, 10);
        assert_eq!(manifest.corpus_size, 240);
    }

    #[tokio::test]
    async fn failed_source_does_not_abort_siblings() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        // Pre-existing state for the failing source must survive untouched.
        let mut prior = SourceState::new();
        prior.last_cursor = Some("p7".to_string());
        store.commit_state("angew", &prior).await.unwrap();

        let mut api = MockApi::serving(vec![vec![
            work("W1", "10.1/1", "One"),
            work("W2", "10.1/2", "Two"),
        ]]);
        api.fail_source = Some("angew".to_string());

        let manifest = run_harvest(
            &config(&["angew", "jacs"]),
            Arc::new(api),
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        let angew = &manifest.sources[0];
        let jacs = &manifest.sources[1];
        assert_eq!(angew.status, SourceStatus::Unavailable);
        assert_eq!(jacs.status, SourceStatus::Completed);
        assert_eq!(jacs.new_records, 2);

        let kept = store.load_state("angew").await.unwrap().unwrap();
        assert_eq!(kept, prior);
    }

    #[tokio::test]
    async fn exhausted_network_retries_suspend_source_with_typed_error() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut prior = SourceState::new();
        prior.last_cursor = Some("p3".to_string());
        store.commit_state("angew", &prior).await.unwrap();

        let mut api = MockApi::serving(vec![vec![work("W1", "10.1/1", "One")]]);
        api.drop_connection_for = Some("angew".to_string());

        let manifest = run_harvest(
            &config(&["angew", "jacs"]),
            Arc::new(api),
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        let angew = &manifest.sources[0];
        assert_eq!(angew.status, SourceStatus::Unavailable);
        let message = angew.message.as_deref().unwrap();
        assert!(message.contains("Transient network error"), "{message}");
        assert_eq!(manifest.sources[1].status, SourceStatus::Completed);

        // The suspended source resumes from its committed cursor next run.
        let kept = store.load_state("angew").await.unwrap().unwrap();
        assert_eq!(kept, prior);
    }

    #[tokio::test]
    async fn corrupt_state_suspends_source_without_silent_reset() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("state")).unwrap();
        std::fs::write(tmp.path().join("state/jacs.json"), b"garbage").unwrap();

        let api = Arc::new(MockApi::serving(vec![vec![work("W1", "10.1/1", "One")]]));
        let manifest = run_harvest(
            &config(&["jacs"]),
            api,
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        assert_eq!(manifest.sources[0].status, SourceStatus::StateCorrupt);
        assert_eq!(manifest.sources[0].pages, 0);
        // The corrupt file is left for the operator; no silent reset.
        assert!(tmp.path().join("state/jacs.json").exists());
    }

    #[tokio::test]
    async fn malformed_records_skip_without_aborting_page() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut nameless = work("W2", "10.1/2", "ignored");
        nameless.title = None;
        let mut idless = work("", "10.1/3", "Three");
        idless.id = String::new();

        let api = Arc::new(MockApi::serving(vec![vec![
            work("W1", "10.1/1", "One"),
            nameless,
            idless,
            work("W4", "10.1/4", "Four"),
        ]]));

        let manifest = run_harvest(
            &config(&["jacs"]),
            api,
            &store,
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

        let summary = &manifest.sources[0];
        assert_eq!(summary.status, SourceStatus::Completed);
        assert_eq!(summary.skipped_malformed, 2);
        assert_eq!(summary.new_records, 2);
    }

    #[tokio::test]
    async fn interrupt_between_pages_preserves_committed_progress() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut api = MockApi::serving(two_pages_with_duplicates());
        api.shutdown_after_page = Some(Arc::clone(&shutdown));

        let manifest = run_harvest(&config(&["jacs"]), Arc::new(api), &store, shutdown)
            .await
            .unwrap();

        // The in-flight page finished and committed before exit.
        let summary = &manifest.sources[0];
        assert_eq!(summary.status, SourceStatus::Interrupted);
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.new_records, 200);

        let state = store.load_state("jacs").await.unwrap().unwrap();
        assert_eq!(state.last_cursor.as_deref(), Some("p1"));
        assert_eq!(state.known_ids.len(), 200);
    }
}
