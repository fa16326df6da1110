// src/lib.rs

//! bibstack: incremental, deduplicated journal-article corpus builder.

pub mod error;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod services;
pub mod storage;
