//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
///
/// This is the one error kind in the whole crate that is allowed to be fatal: it is
/// returned from [`super::Config::from_env`] and [`super::Config::validate`], and a
/// host process should refuse to start the plugin if either returns `Err`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Similarity threshold is outside `[0.0, 1.0]`.
    #[error("invalid cache threshold '{value}': must be between 0.0 and 1.0")]
    InvalidThreshold { value: f32 },

    /// Threshold string could not be parsed as a float.
    #[error("failed to parse cache threshold '{value}': {source}")]
    ThresholdParseError {
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    /// Embedding dimensionality must be nonzero.
    #[error("invalid embedding dimension '{value}': must be greater than 0")]
    InvalidEmbeddingDim { value: String },

    /// Metrics push interval is outside the allowed bound.
    #[error(
        "invalid metrics push interval {value}s: must be between {min}s and {max}s"
    )]
    InvalidMetricsPushInterval { value: u64, min: u64, max: u64 },

    /// An integer-valued environment variable could not be parsed.
    #[error("failed to parse '{name}' value '{value}': {source}")]
    IntParseError {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// OTLP export protocol was set to something other than `http` or `grpc`.
    #[error("invalid OTLP protocol '{value}': expected 'http' or 'grpc'")]
    InvalidOtlpProtocol { value: String },

    /// A header value of the form `env.NAME` referenced an environment variable that is
    /// not set. Per the header-resolution policy, this is a fatal init error rather than
    /// a silently-dropped header.
    #[error("OTLP header '{header}' references missing environment variable '{var}'")]
    MissingHeaderEnvVar { header: String, var: String },

    /// A required environment variable was not set.
    #[error("missing required environment variable: {name}")]
    MissingEnvVar { name: &'static str },

    /// The configured CA file does not exist.
    #[error("CA file does not exist: {path}")]
    PathNotFound { path: PathBuf },

    /// The configured CA file is not a regular file.
    #[error("CA file is not a regular file: {path}")]
    NotAFile { path: PathBuf },

    /// The configured CA file path is not absolute.
    #[error("CA file path must be absolute: {path}")]
    NotAbsolute { path: PathBuf },

    /// The configured CA file path is not canonical (contains `.`/`..`/redundant separators).
    #[error("CA file path is not canonical: {path}")]
    NotCanonical { path: PathBuf },

    /// The configured CA file path is a symlink.
    #[error("CA file path must not be a symlink: {path}")]
    IsSymlink { path: PathBuf },

    /// A resource-attribute or header pair in `key=value` form was malformed.
    #[error("malformed key=value pair in '{source_var}': '{pair}'")]
    MalformedKeyValue { source_var: &'static str, pair: String },
}

/// Convenience result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
