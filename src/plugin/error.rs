//! Plugin harness error types.

use crate::config::ConfigError;
use crate::trace::ExportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialize trace/metric exporter: {0}")]
    Export(#[from] ExportError),
}
