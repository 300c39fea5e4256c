//! Cache engine error types.

use crate::embedding::EmbedError;
use crate::fingerprint::FingerprintError;
use crate::vectordb::VectorStoreError;
use thiserror::Error;

/// Internal error surface for the cache engine. None of these ever escape
/// [`super::CacheEngine::pre_llm_lookup`]/[`super::CacheEngine::write_back_response`] —
/// every variant is caught and converted to a soft miss or a skipped write-back, logged
/// at the policy-appropriate level (spec.md §7).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("failed to serialize cache payload: {0}")]
    Marshal(#[from] serde_json::Error),
}
