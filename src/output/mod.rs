//! Corpus export targets.
//!
//! Every format is derived solely from the canonical in-memory corpus
//! map, never from a previously written file, so the representations
//! cannot drift apart. Iteration is in canonical-key order and writes
//! are temp + rename: exporting the same corpus twice produces
//! byte-identical files, and one format's failure cannot corrupt an
//! already-completed one.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::ArticleRecord;
use crate::storage::Corpus;

/// An export target format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Columnar table for analysis scripts
    Csv,
    /// Line-oriented structured records for the presentation layer
    Jsonl,
    /// Bibliography entries
    Bibtex,
}

impl Format {
    /// Output file name for this format.
    pub fn file_name(&self) -> &'static str {
        match self {
            Format::Csv => "articles.csv",
            Format::Jsonl => "articles.jsonl",
            Format::Bibtex => "articles.bib",
        }
    }
}

impl FromStr for Format {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "jsonl" => Ok(Format::Jsonl),
            "bibtex" | "bib" => Ok(Format::Bibtex),
            other => Err(AppError::validation(format!("unknown output format '{other}'"))),
        }
    }
}

/// Writes export targets under one output directory.
pub struct OutputWriter {
    out_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// Write the requested formats. Returns the paths written.
    pub async fn write(&self, corpus: &Corpus, formats: &[Format]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for format in formats {
            let bytes = match format {
                Format::Csv => render_csv(corpus)?,
                Format::Jsonl => render_jsonl(corpus)?,
                Format::Bibtex => render_bibtex(corpus).into_bytes(),
            };
            let path = self.out_dir.join(format.file_name());
            write_atomic(&path, &bytes).await?;
            log::info!(
                "export: {} records to {}",
                corpus.len(),
                path.display()
            );
            written.push(path);
        }
        Ok(written)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn render_csv(corpus: &Corpus) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "canonical_key",
        "doi",
        "title",
        "journal_code",
        "year",
        "authors",
        "subjects",
        "cited_by_count",
        "referenced_count",
        "usable_abstract",
    ])?;

    for (key, article) in corpus {
        let row = vec![
            key.clone(),
            article.doi.clone().unwrap_or_default(),
            article.title.clone(),
            article.journal_code.clone(),
            article.year.to_string(),
            article.authors.join("; "),
            article
                .subjects
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("; "),
            article.cited_by_count.to_string(),
            article.referenced_works.len().to_string(),
            article.has_usable_abstract().to_string(),
        ];
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::validation(format!("csv flush failed: {e}")))
}

fn render_jsonl(corpus: &Corpus) -> Result<Vec<u8>> {
    let mut out = String::new();
    for article in corpus.values() {
        out.push_str(&serde_json::to_string(article)?);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

fn render_bibtex(corpus: &Corpus) -> String {
    let mut out = String::new();
    for (key, article) in corpus {
        out.push_str(&bibtex_entry(key, article));
        out.push('\n');
    }
    out
}

fn bibtex_entry(key: &str, article: &ArticleRecord) -> String {
    let mut entry = format!("@article{{{},\n", cite_key(key));
    entry.push_str(&format!("  title = {{{}}},\n", escape_braces(&article.title)));
    if !article.authors.is_empty() {
        entry.push_str(&format!("  author = {{{}}},\n", article.authors.join(" and ")));
    }
    entry.push_str(&format!("  journal = {{{}}},\n", article.journal_code));
    entry.push_str(&format!("  year = {{{}}},\n", article.year));
    if let Some(doi) = &article.doi {
        entry.push_str(&format!("  doi = {{{doi}}},\n"));
    }
    entry.push_str("}\n");
    entry
}

/// Cite keys must avoid commas, braces, and whitespace.
fn cite_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '/' | ':' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn escape_braces(s: &str) -> String {
    s.replace('{', "\\{").replace('}', "\\}")
}
