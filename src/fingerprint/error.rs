//! Fingerprint error types.

use thiserror::Error;

/// Returned only when projection serialization itself fails (spec.md §4.A). The cache
/// engine treats this as an unconditional miss and continues — never a fatal error.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to serialize request projection: {0}")]
    Serialize(#[from] serde_json::Error),
}
