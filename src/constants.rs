//! Cross-cutting, shared constants.
//!
//! Prefer deriving secondary constants from primary ones to avoid drift.

/// Default embedding vector dimensionality when a deployment does not override it.
///
/// The actual dimension is a deployment-time configuration value (spec.md §3: "float32
/// vector of fixed dimensionality D (config)"); this is only the default used when
/// [`crate::config::Config`] does not set one explicitly.
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Default semantic-tier cosine similarity threshold.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Default cache-entry TTL, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 5 * 60;

/// Default background write-back / export timeout.
pub const DEFAULT_BACKGROUND_TIMEOUT_SECS: u64 = 30;

/// Stream accumulator janitor sweep cadence.
pub const JANITOR_SWEEP_INTERVAL_SECS: u64 = 60;

/// Maximum age of a stream accumulator's first chunk before the janitor discards it.
pub const ACCUMULATOR_MAX_AGE_SECS: u64 = 5 * 60;

/// TTL for the in-memory span registry.
pub const SPAN_REGISTRY_TTL_SECS: u64 = 20 * 60;

/// Default metrics push interval.
pub const DEFAULT_METRICS_PUSH_INTERVAL_SECS: u64 = 15;

/// Bounds on the configurable metrics push interval (spec.md §4.F).
pub const MIN_METRICS_PUSH_INTERVAL_SECS: u64 = 1;
pub const MAX_METRICS_PUSH_INTERVAL_SECS: u64 = 300;

/// Validates that a runtime embedding dimension matches the expected dimension.
///
/// Used at module boundaries (embedder output vs. configured `D`) to catch mismatches
/// early rather than failing deep inside a vector store call.
pub fn validate_embedding_dim(actual: usize, expected: usize) -> Result<(), DimMismatch> {
    if actual != expected {
        return Err(DimMismatch { expected, actual });
    }
    Ok(())
}

/// Embedding dimension did not match the configured dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl std::fmt::Display for DimMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "embedding dimension mismatch: expected {}, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for DimMismatch {}
