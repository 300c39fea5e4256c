//! Embedder error types.

use thiserror::Error;

/// Errors from the embedding capability (spec.md §4.B, §7).
///
/// Neither variant is fatal: both mean "skip the semantic tier, direct tier still
/// runs," which the cache engine enforces at the call site.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The request carries no extractable natural-language content (pure embedding or
    /// transcription inputs, or an empty chat message list).
    #[error("request has no extractable text to embed")]
    UnsupportedInput,

    /// The embedding provider call itself failed.
    #[error("embedding provider call failed: {0}")]
    Provider(String),

    /// The embedding dimensionality did not match configuration.
    #[error("embedding dimension mismatch: {0}")]
    DimMismatch(#[from] crate::constants::DimMismatch),
}
