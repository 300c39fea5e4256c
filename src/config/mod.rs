//! Environment configuration.
//!
//! Follows the same shape as a typical service config: an explicit `ENV_*` const per
//! field, a `from_env()` constructor that falls back to sane defaults, and a `validate()`
//! pass that is the only place allowed to return a fatal [`ConfigError`].

pub mod error;

#[cfg(test)]
mod tests;

pub use error::{ConfigError, ConfigResult};

use crate::constants::{
    DEFAULT_BACKGROUND_TIMEOUT_SECS, DEFAULT_CACHE_TTL_SECS, DEFAULT_EMBEDDING_DIM,
    DEFAULT_METRICS_PUSH_INTERVAL_SECS, DEFAULT_SIMILARITY_THRESHOLD,
    MAX_METRICS_PUSH_INTERVAL_SECS, MIN_METRICS_PUSH_INTERVAL_SECS,
};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// OTLP wire protocol used by the trace/metric exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    Http,
    Grpc,
}

/// TLS policy for the OTLP transport, resolved in priority order at config-load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// An explicit CA file was configured; load its cert pool with TLS 1.2 minimum.
    CaFile(PathBuf),
    /// `insecure=true` was configured; no TLS.
    Insecure,
    /// Neither of the above; use system roots with TLS 1.2 minimum.
    SystemRoots,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Default cache namespace used when a request carries no `cache-namespace` context
    /// value and no override. Empty means "no default" (caching disabled unless the
    /// caller supplies a namespace).
    pub default_cache_namespace: String,
    /// Default cache-entry TTL, in seconds.
    pub cache_ttl_secs: i64,
    /// Default semantic-tier cosine similarity threshold.
    pub cache_similarity_threshold: f32,
    /// Whether direct/semantic tier matches must additionally agree on `provider`.
    pub cache_by_provider: bool,
    /// Whether direct/semantic tier matches must additionally agree on `model`.
    pub cache_by_model: bool,
    /// Exclude system/instruction prompts from both the fingerprint projection and the
    /// embedding input. Must be applied symmetrically in both places.
    pub exclude_system_prompt: bool,
    /// Bulk-delete plugin-owned cache entries on `Cleanup()`.
    pub cleanup_on_shutdown: bool,
    /// Expected embedding vector dimensionality.
    pub embedding_dim: usize,
    /// Timeout for background cache writes and span exports.
    pub background_timeout_secs: u64,

    /// Qdrant endpoint used by the default vector store adapter.
    pub qdrant_url: String,
    /// Qdrant collection name.
    pub qdrant_collection: String,

    /// Base URL for the embedding provider's HTTP API.
    pub embedding_api_base: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// API key for the embedding provider, if required.
    pub embedding_api_key: Option<String>,

    /// OTLP collector endpoint.
    pub otlp_endpoint: String,
    /// OTLP wire protocol.
    pub otlp_protocol: OtlpProtocol,
    /// Extra headers applied to every OTLP export, after `env.NAME` placeholder
    /// resolution.
    pub otlp_headers: BTreeMap<String, String>,
    /// Resolved TLS policy for the OTLP transport.
    pub otlp_tls: TlsPolicy,
    /// Metrics push interval, clamped to `[1, 300]` seconds.
    pub metrics_push_interval_secs: u64,

    /// `service.name` resource attribute.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,
    /// `deployment.environment` resource attribute.
    pub environment: String,
    /// Additional resource attributes parsed from `OTEL_RESOURCE_ATTRIBUTES`.
    pub resource_attributes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cache_namespace: String::new(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            cache_by_provider: false,
            cache_by_model: true,
            exclude_system_prompt: false,
            cleanup_on_shutdown: false,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            background_timeout_secs: DEFAULT_BACKGROUND_TIMEOUT_SECS,

            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_collection: "gatewatch_cache".to_string(),

            embedding_api_base: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,

            otlp_endpoint: "http://localhost:4318".to_string(),
            otlp_protocol: OtlpProtocol::Http,
            otlp_headers: BTreeMap::new(),
            otlp_tls: TlsPolicy::SystemRoots,
            metrics_push_interval_secs: DEFAULT_METRICS_PUSH_INTERVAL_SECS,

            service_name: "gatewatch".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            resource_attributes: BTreeMap::new(),
        }
    }
}

impl Config {
    const ENV_CACHE_NAMESPACE: &'static str = "GATEWATCH_CACHE_NAMESPACE";
    const ENV_CACHE_TTL_SECS: &'static str = "GATEWATCH_CACHE_TTL_SECS";
    const ENV_CACHE_THRESHOLD: &'static str = "GATEWATCH_CACHE_THRESHOLD";
    const ENV_CACHE_BY_PROVIDER: &'static str = "GATEWATCH_CACHE_BY_PROVIDER";
    const ENV_CACHE_BY_MODEL: &'static str = "GATEWATCH_CACHE_BY_MODEL";
    const ENV_EXCLUDE_SYSTEM_PROMPT: &'static str = "GATEWATCH_EXCLUDE_SYSTEM_PROMPT";
    const ENV_CLEANUP_ON_SHUTDOWN: &'static str = "GATEWATCH_CLEANUP_ON_SHUTDOWN";
    const ENV_EMBEDDING_DIM: &'static str = "GATEWATCH_EMBEDDING_DIM";
    const ENV_BACKGROUND_TIMEOUT_SECS: &'static str = "GATEWATCH_BACKGROUND_TIMEOUT_SECS";

    const ENV_QDRANT_URL: &'static str = "GATEWATCH_QDRANT_URL";
    const ENV_QDRANT_COLLECTION: &'static str = "GATEWATCH_QDRANT_COLLECTION";

    const ENV_EMBEDDING_API_BASE: &'static str = "GATEWATCH_EMBEDDING_API_BASE";
    const ENV_EMBEDDING_MODEL: &'static str = "GATEWATCH_EMBEDDING_MODEL";
    const ENV_EMBEDDING_API_KEY: &'static str = "GATEWATCH_EMBEDDING_API_KEY";

    const ENV_OTLP_ENDPOINT: &'static str = "GATEWATCH_OTLP_ENDPOINT";
    const ENV_OTLP_PROTOCOL: &'static str = "GATEWATCH_OTLP_PROTOCOL";
    const ENV_OTLP_HEADERS: &'static str = "GATEWATCH_OTLP_HEADERS";
    const ENV_OTLP_CA_FILE: &'static str = "GATEWATCH_OTLP_CA_FILE";
    const ENV_OTLP_INSECURE: &'static str = "GATEWATCH_OTLP_INSECURE";
    const ENV_METRICS_PUSH_INTERVAL_SECS: &'static str = "GATEWATCH_METRICS_PUSH_INTERVAL_SECS";

    const ENV_SERVICE_NAME: &'static str = "GATEWATCH_SERVICE_NAME";
    const ENV_SERVICE_VERSION: &'static str = "GATEWATCH_SERVICE_VERSION";
    const ENV_ENVIRONMENT: &'static str = "GATEWATCH_ENVIRONMENT";
    const ENV_OTEL_RESOURCE_ATTRIBUTES: &'static str = "OTEL_RESOURCE_ATTRIBUTES";

    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();

        let cache_ttl_secs = Self::parse_i64_from_env(Self::ENV_CACHE_TTL_SECS, defaults.cache_ttl_secs)?;
        let cache_similarity_threshold = Self::parse_threshold_from_env(defaults.cache_similarity_threshold)?;
        let embedding_dim = Self::parse_embedding_dim_from_env(defaults.embedding_dim)?;
        let metrics_push_interval_secs =
            Self::parse_metrics_interval_from_env(defaults.metrics_push_interval_secs)?;
        let otlp_protocol = Self::parse_otlp_protocol_from_env(defaults.otlp_protocol)?;
        let otlp_headers = Self::parse_headers_from_env()?;
        let otlp_tls = Self::parse_tls_policy_from_env()?;
        let resource_attributes = Self::parse_resource_attributes_from_env()?;

        Ok(Self {
            default_cache_namespace: Self::parse_string_from_env(
                Self::ENV_CACHE_NAMESPACE,
                defaults.default_cache_namespace,
            ),
            cache_ttl_secs,
            cache_similarity_threshold,
            cache_by_provider: Self::parse_bool_from_env(
                Self::ENV_CACHE_BY_PROVIDER,
                defaults.cache_by_provider,
            ),
            cache_by_model: Self::parse_bool_from_env(Self::ENV_CACHE_BY_MODEL, defaults.cache_by_model),
            exclude_system_prompt: Self::parse_bool_from_env(
                Self::ENV_EXCLUDE_SYSTEM_PROMPT,
                defaults.exclude_system_prompt,
            ),
            cleanup_on_shutdown: Self::parse_bool_from_env(
                Self::ENV_CLEANUP_ON_SHUTDOWN,
                defaults.cleanup_on_shutdown,
            ),
            embedding_dim,
            background_timeout_secs: Self::parse_u64_from_env(
                Self::ENV_BACKGROUND_TIMEOUT_SECS,
                defaults.background_timeout_secs,
            ),

            qdrant_url: Self::parse_string_from_env(Self::ENV_QDRANT_URL, defaults.qdrant_url),
            qdrant_collection: Self::parse_string_from_env(
                Self::ENV_QDRANT_COLLECTION,
                defaults.qdrant_collection,
            ),

            embedding_api_base: Self::parse_string_from_env(
                Self::ENV_EMBEDDING_API_BASE,
                defaults.embedding_api_base,
            ),
            embedding_model: Self::parse_string_from_env(
                Self::ENV_EMBEDDING_MODEL,
                defaults.embedding_model,
            ),
            embedding_api_key: env::var(Self::ENV_EMBEDDING_API_KEY).ok(),

            otlp_endpoint: Self::parse_string_from_env(Self::ENV_OTLP_ENDPOINT, defaults.otlp_endpoint),
            otlp_protocol,
            otlp_headers,
            otlp_tls,
            metrics_push_interval_secs,

            service_name: Self::parse_string_from_env(Self::ENV_SERVICE_NAME, defaults.service_name),
            service_version: Self::parse_string_from_env(
                Self::ENV_SERVICE_VERSION,
                defaults.service_version,
            ),
            environment: Self::parse_string_from_env(Self::ENV_ENVIRONMENT, defaults.environment),
            resource_attributes,
        })
    }

    /// Validates cross-field invariants and filesystem-backed policy that cannot be
    /// checked while parsing a single field in isolation.
    pub fn validate(&self) -> ConfigResult<()> {
        if let TlsPolicy::CaFile(ref path) = self.otlp_tls {
            Self::validate_ca_file(path)?;
        }
        Ok(())
    }

    fn validate_ca_file(path: &PathBuf) -> ConfigResult<()> {
        if !path.is_absolute() {
            return Err(ConfigError::NotAbsolute { path: path.clone() });
        }
        if !path.exists() {
            return Err(ConfigError::PathNotFound { path: path.clone() });
        }
        let symlink_meta = std::fs::symlink_metadata(path).map_err(|_| ConfigError::PathNotFound {
            path: path.clone(),
        })?;
        if symlink_meta.file_type().is_symlink() {
            return Err(ConfigError::IsSymlink { path: path.clone() });
        }
        if !path.is_file() {
            return Err(ConfigError::NotAFile { path: path.clone() });
        }
        // Canonical means path-cleaning round-trips to the same value: no `.`, `..`, or
        // redundant separators. `Path::components()` normalizes those away, so comparing
        // the collected components' reconstruction against the original catches them.
        let cleaned: PathBuf = path.components().collect();
        if &cleaned != path {
            return Err(ConfigError::NotCanonical { path: path.clone() });
        }
        Ok(())
    }

    fn parse_threshold_from_env(default: f32) -> ConfigResult<f32> {
        match env::var(Self::ENV_CACHE_THRESHOLD) {
            Ok(value) => {
                let parsed: f32 = value
                    .parse()
                    .map_err(|source| ConfigError::ThresholdParseError {
                        value: value.clone(),
                        source,
                    })?;
                if !(0.0..=1.0).contains(&parsed) {
                    return Err(ConfigError::InvalidThreshold { value: parsed });
                }
                Ok(parsed)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_embedding_dim_from_env(default: usize) -> ConfigResult<usize> {
        match env::var(Self::ENV_EMBEDDING_DIM) {
            Ok(value) => {
                let parsed: usize = value.parse().map_err(|_| ConfigError::InvalidEmbeddingDim {
                    value: value.clone(),
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidEmbeddingDim { value });
                }
                Ok(parsed)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_metrics_interval_from_env(default: u64) -> ConfigResult<u64> {
        match env::var(Self::ENV_METRICS_PUSH_INTERVAL_SECS) {
            Ok(value) => {
                let parsed: u64 = value.parse().map_err(|source| ConfigError::IntParseError {
                    name: Self::ENV_METRICS_PUSH_INTERVAL_SECS,
                    value: value.clone(),
                    source,
                })?;
                if !(MIN_METRICS_PUSH_INTERVAL_SECS..=MAX_METRICS_PUSH_INTERVAL_SECS).contains(&parsed) {
                    return Err(ConfigError::InvalidMetricsPushInterval {
                        value: parsed,
                        min: MIN_METRICS_PUSH_INTERVAL_SECS,
                        max: MAX_METRICS_PUSH_INTERVAL_SECS,
                    });
                }
                Ok(parsed)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_otlp_protocol_from_env(default: OtlpProtocol) -> ConfigResult<OtlpProtocol> {
        match env::var(Self::ENV_OTLP_PROTOCOL) {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "http" => Ok(OtlpProtocol::Http),
                "grpc" => Ok(OtlpProtocol::Grpc),
                _ => Err(ConfigError::InvalidOtlpProtocol { value }),
            },
            Err(_) => Ok(default),
        }
    }

    /// Parses `GATEWATCH_OTLP_HEADERS` as comma-separated `key=value` pairs, resolving
    /// `env.NAME`-prefixed values against the process environment. A missing referenced
    /// variable is a fatal init error, not a silently-dropped header.
    fn parse_headers_from_env() -> ConfigResult<BTreeMap<String, String>> {
        let raw = match env::var(Self::ENV_OTLP_HEADERS) {
            Ok(v) => v,
            Err(_) => return Ok(BTreeMap::new()),
        };
        Self::parse_key_value_pairs(&raw, Self::ENV_OTLP_HEADERS, true)
    }

    fn parse_resource_attributes_from_env() -> ConfigResult<BTreeMap<String, String>> {
        let raw = match env::var(Self::ENV_OTEL_RESOURCE_ATTRIBUTES) {
            Ok(v) => v,
            Err(_) => return Ok(BTreeMap::new()),
        };
        Self::parse_key_value_pairs(&raw, Self::ENV_OTEL_RESOURCE_ATTRIBUTES, false)
    }

    fn parse_key_value_pairs(
        raw: &str,
        source_var: &'static str,
        resolve_env_placeholders: bool,
    ) -> ConfigResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for pair in raw.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::MalformedKeyValue {
                source_var,
                pair: pair.to_string(),
            })?;
            let key = key.trim().to_string();
            let mut value = value.trim().to_string();

            if resolve_env_placeholders {
                if let Some(var_name) = value.strip_prefix("env.") {
                    value = env::var(var_name).map_err(|_| ConfigError::MissingHeaderEnvVar {
                        header: key.clone(),
                        var: var_name.to_string(),
                    })?;
                }
            }
            out.insert(key, value);
        }
        Ok(out)
    }

    fn parse_tls_policy_from_env() -> ConfigResult<TlsPolicy> {
        if Self::parse_bool_from_env(Self::ENV_OTLP_INSECURE, false) {
            return Ok(TlsPolicy::Insecure);
        }
        match env::var(Self::ENV_OTLP_CA_FILE) {
            Ok(value) if !value.trim().is_empty() => Ok(TlsPolicy::CaFile(PathBuf::from(value))),
            _ => Ok(TlsPolicy::SystemRoots),
        }
    }

    fn parse_string_from_env(var_name: &str, default: String) -> String {
        env::var(var_name).unwrap_or(default)
    }

    fn parse_bool_from_env(var_name: &str, default: bool) -> bool {
        env::var(var_name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn parse_u64_from_env(var_name: &str, default: u64) -> u64 {
        env::var(var_name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn parse_i64_from_env(var_name: &'static str, default: i64) -> ConfigResult<i64> {
        match env::var(var_name) {
            Ok(value) => value.parse().map_err(|source| ConfigError::IntParseError {
                name: var_name,
                value,
                source,
            }),
            Err(_) => Ok(default),
        }
    }
}
