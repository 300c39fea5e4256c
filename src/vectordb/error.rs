//! Vector store adapter error types.

use thiserror::Error;

/// Errors the vector store capability distinguishes (spec.md §4.C, §7).
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// No entry matched the given id/filters.
    #[error("no entry found in namespace '{namespace}'")]
    NotFound { namespace: String },

    /// The backing store does not support the requested operation. Treated as a soft
    /// cache miss, never surfaced as a failure to the caller.
    #[error("operation not supported by backing store: {operation}")]
    NotSupported { operation: &'static str },

    /// Connection, timeout, or wire-protocol failure.
    #[error("vector store transport error: {0}")]
    Transport(String),

    /// A point's vector did not match the collection's configured dimensionality.
    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

pub type VectorStoreResult<T> = Result<T, VectorStoreError>;
