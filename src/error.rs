// src/error.rs

//! Unified error handling for the corpus builder.

use std::fmt;

use thiserror::Error;

/// Result type alias for corpus operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// Record-level and source-level variants (`MalformedRecord`,
/// `RateLimited`, `JournalUnavailable`, `StateCorruption`) are contained
/// by the pipeline: they mark one record or one source as failed in the
/// run manifest without aborting sibling sources.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// CSV writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A retryable network failure; only seen inside the retry loop,
    /// escalated to `JournalUnavailable` once retries are exhausted.
    ///
    /// The field is `source_name`, not `source`: thiserror reserves the
    /// name `source` for a wrapped `std::error::Error`.
    #[error("Transient network error for {source_name}: {message}")]
    TransientNetwork { source_name: String, message: String },

    /// The upstream API kept rate-limiting this source past the retry bound.
    #[error("Rate limit exceeded for {source_name} after {attempts} attempts")]
    RateLimited { source_name: String, attempts: u32 },

    /// A single raw record failed required-field validation.
    #[error("Malformed record from {source_name}: {reason}")]
    MalformedRecord { source_name: String, reason: String },

    /// A source is abandoned for this run; its state is left untouched.
    #[error("Journal source {source_name} unavailable: {reason}")]
    JournalUnavailable { source_name: String, reason: String },

    /// Persisted state failed its integrity check. Fatal for the source;
    /// requires an explicit operator reset, never a silent one.
    #[error("State for {source_name} failed integrity check: {reason}")]
    StateCorruption { source_name: String, reason: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a transient network error for a source.
    pub fn transient(source_name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientNetwork {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Create a malformed-record error.
    pub fn malformed(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::MalformedRecord {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a journal-unavailable error.
    pub fn unavailable(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::JournalUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a state-corruption error.
    pub fn state_corruption(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::StateCorruption {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}
