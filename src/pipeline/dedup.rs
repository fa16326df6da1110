//! Canonical identity resolution and record merging.
//!
//! `merge` is a pure function over the field set and is safe to apply
//! across any number of duplicate submissions in any order: scalar
//! fields prefer the value carrying more information, set fields union,
//! and `cited_by_count` takes the maximum.

use std::collections::BTreeSet;

use crate::models::{ArticleRecord, EnrichmentEntry};

/// Canonical deduplication key for an article.
///
/// Normalized DOI when present, otherwise normalized title + year.
pub fn resolve(article: &ArticleRecord) -> String {
    canonical_key(article.doi.as_deref(), &article.title, article.year)
}

/// Canonical key from identity parts.
pub fn canonical_key(doi: Option<&str>, title: &str, year: i32) -> String {
    match doi.map(normalize_doi).filter(|d| !d.is_empty()) {
        Some(doi) => format!("doi:{doi}"),
        None => format!("title:{}:{year}", normalize_title(title)),
    }
}

/// Lower-case, strip whitespace, and drop resolver URL prefixes.
pub fn normalize_doi(doi: &str) -> String {
    let lowered: String = doi
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    lowered
        .strip_prefix("https://doi.org/")
        .or_else(|| lowered.strip_prefix("http://doi.org/"))
        .or_else(|| lowered.strip_prefix("doi:"))
        .unwrap_or(&lowered)
        .to_string()
}

/// Lower-case alphanumeric form of a title with single-space separators.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Merge an incoming record into an existing canonical record (if any).
pub fn merge(existing: Option<ArticleRecord>, incoming: ArticleRecord) -> ArticleRecord {
    let Some(existing) = existing else {
        return incoming;
    };

    let subjects: BTreeSet<String> = existing
        .subjects
        .iter()
        .chain(incoming.subjects.iter())
        .cloned()
        .collect();

    ArticleRecord {
        doi: pick_option(existing.doi, incoming.doi),
        title: pick_scalar(existing.title, incoming.title),
        abstract_text: pick_option(existing.abstract_text, incoming.abstract_text),
        authors: pick_authors(existing.authors, incoming.authors),
        journal_code: pick_scalar(existing.journal_code, incoming.journal_code),
        year: pick_year(existing.year, incoming.year),
        subjects,
        cited_by_count: existing.cited_by_count.max(incoming.cited_by_count),
        referenced_works: union_ordered(existing.referenced_works, incoming.referenced_works),
        enrichment_log: merge_logs(existing.enrichment_log, incoming.enrichment_log),
    }
}

/// Longer non-empty string wins; ties keep the existing value.
fn pick_scalar(existing: String, incoming: String) -> String {
    if incoming.len() > existing.len() {
        incoming
    } else {
        existing
    }
}

pub(crate) fn pick_option(existing: Option<String>, incoming: Option<String>) -> Option<String> {
    match (existing, incoming) {
        (Some(a), Some(b)) => Some(pick_scalar(a, b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Partial author lists are not safely composable; prefer the more
/// complete list rather than unioning.
pub(crate) fn pick_authors(existing: Vec<String>, incoming: Vec<String>) -> Vec<String> {
    if incoming.len() > existing.len() {
        incoming
    } else {
        existing
    }
}

/// 0 is "unknown"; a known year beats unknown, ties keep existing.
fn pick_year(existing: i32, incoming: i32) -> i32 {
    if existing == 0 { incoming } else { existing }
}

/// Union preserving first-seen order.
pub(crate) fn union_ordered(existing: Vec<String>, incoming: Vec<String>) -> Vec<String> {
    let mut seen: BTreeSet<String> = existing.iter().cloned().collect();
    let mut merged = existing;
    for item in incoming {
        if seen.insert(item.clone()) {
            merged.push(item);
        }
    }
    merged
}

/// Union of provenance entries, ordered by timestamp then source so the
/// result is independent of merge order. Entries are never dropped.
fn merge_logs(existing: Vec<EnrichmentEntry>, incoming: Vec<EnrichmentEntry>) -> Vec<EnrichmentEntry> {
    let mut merged: Vec<EnrichmentEntry> = existing;
    for entry in incoming {
        if !merged.contains(&entry) {
            merged.push(entry);
        }
    }
    merged.sort();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(doi: Option<&str>, title: &str, year: i32) -> ArticleRecord {
        ArticleRecord {
            doi: doi.map(str::to_string),
            title: title.to_string(),
            abstract_text: None,
            authors: Vec::new(),
            journal_code: "jacs".to_string(),
            year,
            subjects: BTreeSet::new(),
            cited_by_count: 0,
            referenced_works: Vec::new(),
            enrichment_log: Vec::new(),
        }
    }

    #[test]
    fn doi_normalization() {
        assert_eq!(normalize_doi("10.1000/ABC"), "10.1000/abc");
        assert_eq!(normalize_doi(" https://doi.org/10.1000/Abc "), "10.1000/abc");
        assert_eq!(normalize_doi("doi:10.1000/abc"), "10.1000/abc");
    }

    #[test]
    fn canonical_key_prefers_doi() {
        let with_doi = article(Some("https://doi.org/10.1/X"), "Some Title", 2020);
        assert_eq!(resolve(&with_doi), "doi:10.1/x");

        let without = article(None, "Some: Title!", 2020);
        assert_eq!(resolve(&without), "title:some title:2020");
    }

    #[test]
    fn same_doi_different_title_casing_collides() {
        let a = article(Some("10.1/x"), "A Title", 2020);
        let b = article(Some("DOI:10.1/X"), "a title (preprint)", 2020);
        assert_eq!(resolve(&a), resolve(&b));
    }

    #[test]
    fn merge_prefers_more_information() {
        let mut a = article(Some("10.1/x"), "Short", 2020);
        a.cited_by_count = 5;
        a.authors = vec!["A. One".into()];

        let mut b = article(None, "Short title with subtitle", 2020);
        b.cited_by_count = 3;
        b.authors = vec!["A. One".into(), "B. Two".into()];
        b.abstract_text = Some("an abstract".into());

        let merged = merge(Some(a), b);
        assert_eq!(merged.doi.as_deref(), Some("10.1/x"));
        assert_eq!(merged.title, "Short title with subtitle");
        assert_eq!(merged.cited_by_count, 5);
        assert_eq!(merged.authors.len(), 2);
        assert_eq!(merged.abstract_text.as_deref(), Some("an abstract"));
    }

    #[test]
    fn merge_never_regresses_populated_to_empty() {
        let mut a = article(Some("10.1/x"), "Title", 2020);
        a.abstract_text = Some("kept".into());
        let b = article(Some("10.1/x"), "Title", 2020);

        let merged = merge(Some(a), b);
        assert_eq!(merged.abstract_text.as_deref(), Some("kept"));
    }

    #[test]
    fn referenced_works_union_keeps_first_seen_order() {
        let mut a = article(Some("10.1/x"), "Title", 2020);
        a.referenced_works = vec!["W1".into(), "W2".into()];
        let mut b = a.clone();
        b.referenced_works = vec!["W2".into(), "W3".into(), "W1".into()];

        let merged = merge(Some(a), b);
        assert_eq!(merged.referenced_works, vec!["W1", "W2", "W3"]);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = article(Some("10.1/x"), "Title", 2020);
        a.cited_by_count = 2;
        a.subjects.insert("Chemistry".into());
        a.referenced_works = vec!["W1".into()];

        let mut b = article(Some("10.1/x"), "Title with longer subtitle", 2020);
        b.cited_by_count = 7;
        b.subjects.insert("Catalysis".into());
        b.abstract_text = Some("one two three".into());

        let mut c = article(Some("10.1/x"), "Title", 2020);
        c.authors = vec!["X".into(), "Y".into()];
        c.referenced_works = vec!["W2".into()];

        let fold = |records: Vec<ArticleRecord>| {
            let mut acc: Option<ArticleRecord> = None;
            for record in records {
                acc = Some(merge(acc, record));
            }
            acc.unwrap()
        };

        let abc = fold(vec![a.clone(), b.clone(), c.clone()]);
        let cba = fold(vec![c.clone(), b.clone(), a.clone()]);
        let bac = fold(vec![b, a, c]);

        for other in [&cba, &bac] {
            assert_eq!(abc.title, other.title);
            assert_eq!(abc.abstract_text, other.abstract_text);
            assert_eq!(abc.cited_by_count, other.cited_by_count);
            assert_eq!(abc.subjects, other.subjects);
            assert_eq!(abc.authors, other.authors);
            // referenced-works order is display-only; compare as sets
            let lhs: BTreeSet<_> = abc.referenced_works.iter().collect();
            let rhs: BTreeSet<_> = other.referenced_works.iter().collect();
            assert_eq!(lhs, rhs);
        }
    }

    #[test]
    fn merge_is_associative() {
        let mut a = article(Some("10.1/x"), "Title", 2020);
        a.subjects.insert("One".into());
        let mut b = a.clone();
        b.subjects.insert("Two".into());
        b.cited_by_count = 9;
        let mut c = a.clone();
        c.abstract_text = Some("abstract body".into());

        let left = merge(Some(merge(Some(a.clone()), b.clone())), c.clone());
        let right = merge(Some(a), merge(Some(b), c));
        assert_eq!(left, right);
    }
}
