//! Stream accumulator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// A chunk arrived for a request-id with no open accumulator (the accumulator was
    /// never created, already finalized, or swept by the janitor). Logged and dropped —
    /// the provider chunk still passes through unchanged (spec.md §4.D).
    #[error("no open accumulator for request '{request_id}'")]
    MissingAccumulator { request_id: String },
}
