// src/services/mod.rs

//! Outward-facing API clients.

pub mod api;
pub mod enrich;
pub mod fetch;

pub use api::{ApiMeta, ApiResponse, RawAuthor, RawAuthorship, RawConcept, RawPage, RawWork, WorkApi};
pub use enrich::{EnrichmentApi, HttpEnrichmentApi, payload_from_raw};
pub use fetch::{HttpWorkApi, RetryPolicy, SharedLimiter, shared_limiter};
