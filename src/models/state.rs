//! Per-source fetch state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resume state for one logical source (journal).
///
/// Created on first fetch, read and updated on every run, and deleted
/// only by an explicit operator reset. Committed strictly after a page's
/// records have been merged into the corpus, so a resumed run re-fetches
/// at most one already-processed page and never skips one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceState {
    /// Opaque pagination token; `None` means "start from the beginning"
    pub last_cursor: Option<String>,

    /// Timestamp of the last committed page
    pub last_run_at: DateTime<Utc>,

    /// Raw record identifiers already folded into the corpus
    pub known_ids: BTreeSet<String>,
}

impl SourceState {
    /// Fresh state for a source that has never been fetched.
    pub fn new() -> Self {
        Self {
            last_cursor: None,
            last_run_at: Utc::now(),
            known_ids: BTreeSet::new(),
        }
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self::new()
    }
}
