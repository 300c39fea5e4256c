//! Trace/metric emitter error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to build OTLP exporter: {0}")]
    Build(String),

    #[error("span export failed: {0}")]
    Transport(String),

    #[error("metrics push failed: {0}")]
    MetricsPush(String),
}
