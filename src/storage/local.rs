//! Local filesystem persistence.
//!
//! ## Layout
//!
//! ```text
//! {data_dir}/
//! ├── config.toml           # Configuration
//! ├── corpus.jsonl          # Canonical corpus, one record per line
//! ├── manifest.json         # Summary of the last run
//! └── state/
//!     └── {source}.json     # Checksummed per-source resume state
//! ```
//!
//! Every write goes to a temporary sibling and is renamed into place,
//! so an interrupted write never replaces a valid file with a
//! half-written one.

use std::collections::BTreeMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ArticleRecord, RunManifest, SourceState};
use crate::pipeline::dedup;

/// The canonical in-memory corpus: canonical key → record, ordered by
/// key so every serialization of it is deterministic.
pub type Corpus = BTreeMap<String, ArticleRecord>;

/// Persisted state file wrapper: payload plus integrity checksum.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    /// Hex sha256 of the JSON-serialized state
    checksum: String,
    state: SourceState,
}

/// Filesystem-backed store for state, corpus, and manifests.
#[derive(Clone)]
pub struct LocalStore {
    data_dir: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.data_dir.join(key)
    }

    fn state_key(source: &str) -> String {
        format!("state/{source}.json")
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn checksum(state: &SourceState) -> Result<String> {
        let payload = serde_json::to_vec(state)?;
        Ok(hex::encode(Sha256::digest(&payload)))
    }

    /// Load the resume state for a source. `Ok(None)` means the source
    /// has never been fetched.
    pub async fn load_state(&self, source: &str) -> Result<Option<SourceState>> {
        let Some(bytes) = self.read_bytes(&Self::state_key(source)).await? else {
            return Ok(None);
        };

        let file: StateFile = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::state_corruption(source, format!("undecodable state: {e}")))?;

        let expected = Self::checksum(&file.state)?;
        if expected != file.checksum {
            return Err(AppError::state_corruption(
                source,
                format!("checksum mismatch: stored {}, computed {expected}", file.checksum),
            ));
        }

        Ok(Some(file.state))
    }

    /// Durably commit the resume state for a source.
    pub async fn commit_state(&self, source: &str, state: &SourceState) -> Result<()> {
        let file = StateFile {
            checksum: Self::checksum(state)?,
            state: state.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        self.write_bytes(&Self::state_key(source), &bytes).await
    }

    /// Explicit operator reset: delete a source's state. Returns whether
    /// a state file existed.
    pub async fn reset_state(&self, source: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path(&Self::state_key(source))).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Source names that have persisted state.
    pub async fn list_state_sources(&self) -> Result<Vec<String>> {
        let dir = self.path("state");
        let mut sources = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sources),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                sources.push(stem.to_string());
            }
        }
        sources.sort();
        Ok(sources)
    }

    /// Load the persisted corpus, keyed by recomputed canonical key.
    pub async fn load_corpus(&self) -> Result<Corpus> {
        let Some(bytes) = self.read_bytes("corpus.jsonl").await? else {
            return Ok(Corpus::new());
        };

        let text = String::from_utf8(bytes)
            .map_err(|e| AppError::state_corruption("corpus", format!("invalid utf-8: {e}")))?;

        let mut corpus = Corpus::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let article: ArticleRecord = serde_json::from_str(line).map_err(|e| {
                AppError::state_corruption("corpus", format!("line {}: {e}", lineno + 1))
            })?;
            corpus.insert(dedup::resolve(&article), article);
        }
        Ok(corpus)
    }

    /// Persist the corpus as one JSON record per line, key order.
    pub async fn save_corpus(&self, corpus: &Corpus) -> Result<()> {
        let mut out = String::new();
        for article in corpus.values() {
            out.push_str(&serde_json::to_string(article)?);
            out.push('\n');
        }
        self.write_bytes("corpus.jsonl", out.as_bytes()).await
    }

    /// Persist the run manifest.
    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        self.write_bytes("manifest.json", &bytes).await
    }

    /// Load the manifest of the last run, if any.
    pub async fn load_manifest(&self) -> Result<Option<RunManifest>> {
        match self.read_bytes("manifest.json").await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
