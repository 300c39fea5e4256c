//! # gatewatch
//!
//! Semantic response cache + OpenTelemetry emitter core for an LLM gateway plugin.
//!
//! gatewatch sits at a gateway's pre-LLM/post-LLM/stream-chunk/cleanup hook boundary.
//!
//! ```text
//! PreLLMHook → [direct-tier exact match] → [semantic-tier nearest-neighbor] → provider
//! PostLLMHook → cache write-back (background) + span/metric export (background)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gatewatch::Config;
//!
//! # fn run() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! println!("OTLP endpoint: {}", config.otlp_endpoint);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Purpose |
//! |---------|---------|
//! | `mock` | In-memory vector store / embedder backends for tests and downstream integration tests |
//!
//! ## Modules
//!
//! - [`cache`] - Two-tier semantic cache engine (direct + semantic)
//! - [`config`] - Environment-backed configuration
//! - [`context`] - Per-request scratch context threaded across hooks
//! - [`embedding`] - Request-to-vector embedding capability
//! - [`fingerprint`] - Content/params hashing for the direct tier
//! - [`logging`] - Test/doc-example tracing subscriber helper
//! - [`plugin`] - The four-hook plugin harness tying every component together
//! - [`stream`] - Streaming chunk accumulator
//! - [`trace`] - OTel span/metric construction and OTLP export
//! - [`vectordb`] - Vector store adapter capability (Qdrant + mock)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod config;
pub mod constants;
pub mod context;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod logging;
pub mod plugin;
pub mod request;
pub mod stream;
pub mod trace;
pub mod vectordb;

pub use cache::{CacheEngine, CacheEngineConfig, CacheError, CachedPayload, HitType, LookupOutcome};
pub use config::{Config, ConfigError, OtlpProtocol, TlsPolicy};
pub use constants::validate_embedding_dim;
pub use context::RequestContext;
pub use embedding::{EmbedError, Embedder, OpenAiEmbedder};
#[cfg(any(test, feature = "mock"))]
pub use embedding::MockEmbedder;
pub use fingerprint::{Fingerprint, FingerprintError, fingerprint};
pub use hashing::hash_to_u64;
#[cfg(any(test, feature = "mock"))]
pub use logging::install_default_subscriber;
pub use plugin::{Plugin, PluginError, ShortCircuit};
pub use request::{
    GatewayRequest, GatewayResponse, RequestBody, RequestKind, RequestParams, ResponseError,
    StreamChunk, TenancyInfo, TextMessage, UsageBlock,
};
pub use stream::{FinalizedStream, PendingMetadata, PushOutcome, StreamError, StreamRegistry};
pub use trace::{Exporter, ExportError, MetricDimensions, Metrics, NullPriceOracle, PriceOracle, SpanBuilder, SpanRecord, SpanStatus};
pub use vectordb::{Filter, Metadata, NearestMatch, QdrantVectorStore, StoredPoint, VectorStore, VectorStoreError};
#[cfg(any(test, feature = "mock"))]
pub use vectordb::MockVectorStore;
