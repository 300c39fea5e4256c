//! Trace/metric emitter (spec.md §4.F).

pub mod error;
pub mod exporter;
pub mod metrics;
pub mod span;

pub use error::ExportError;
pub use exporter::Exporter;
pub use metrics::{MetricDimensions, Metrics};
pub use span::{NullPriceOracle, PriceOracle, SpanBuilder, SpanRecord, SpanStatus};
