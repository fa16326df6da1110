//! Persistence for per-source state, the canonical corpus, and run
//! manifests.
//!
//! State commits are the crash-safety hinge of the pipeline: they are
//! atomic (temp + rename), checksummed on disk, and ordered strictly
//! after the corresponding page's records have been merged into the
//! durable corpus.

pub mod local;

pub use local::{Corpus, LocalStore};
