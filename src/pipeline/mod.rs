//! Pipeline core: deduplication, enrichment merging, and harvest
//! orchestration.

pub mod dedup;
pub mod enrich;
pub mod harvest;

pub use enrich::{EnrichmentPayload, run_enrich};
pub use harvest::run_harvest;
