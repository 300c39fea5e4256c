//! Crate-level error surface.
//!
//! Per-subsystem error enums (`fingerprint::FingerprintError`, `embedding::EmbedError`,
//! `vectordb::VectorStoreError`, `cache::CacheError`, `trace::ExportError`) are all
//! absorbed internally and never escape a hook boundary. [`ConfigError`] is the single
//! exception: it is fatal at `Plugin::new`/`Config::validate` time, so it is re-exported
//! here as the crate's top-level error type.

pub use crate::config::ConfigError;
