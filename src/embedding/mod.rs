//! Request-to-vector embedding (spec.md §4.B).

pub mod error;

pub use error::EmbedError;

use crate::hashing::hash_to_u64;
use crate::request::GatewayRequest;
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use tracing::instrument;

/// Capability interface the cache engine consumes: project a request to text, then to
/// a vector. Callers never see the provider-specific request/response shapes.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `req`, returning the vector and the number of input tokens the provider
    /// reported consuming. Returns [`EmbedError::UnsupportedInput`] when the request has
    /// no extractable text (spec.md §4.B.1) without making a provider call.
    async fn embed(&self, req: &GatewayRequest) -> Result<(Vec<f32>, u32), EmbedError>;

    /// Declared output dimensionality, used to validate against configuration before a
    /// vector ever reaches the store.
    fn dimension(&self) -> usize;
}

/// `async-openai`-backed implementation of [`Embedder`], the one concrete embedding
/// backend this core ships.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
    exclude_system_prompt: bool,
}

impl OpenAiEmbedder {
    pub fn new(api_base: &str, api_key: Option<&str>, model: impl Into<String>, dimension: usize) -> Self {
        let mut cfg = OpenAIConfig::new().with_api_base(api_base);
        if let Some(key) = api_key {
            cfg = cfg.with_api_key(key);
        }
        Self {
            client: Client::with_config(cfg),
            model: model.into(),
            dimension,
            exclude_system_prompt: false,
        }
    }

    pub fn exclude_system_prompt(mut self, exclude: bool) -> Self {
        self.exclude_system_prompt = exclude;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(skip(self, req), fields(request_id = %req.request_id))]
    async fn embed(&self, req: &GatewayRequest) -> Result<(Vec<f32>, u32), EmbedError> {
        let text = req
            .extractable_text(self.exclude_system_prompt)
            .ok_or(EmbedError::UnsupportedInput)?;

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text))
            .build()
            .map_err(|e| EmbedError::Provider(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Provider("provider returned no embedding".to_string()))?;

        let tokens = response.usage.prompt_tokens;
        Ok((embedding.embedding, tokens))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic, hash-derived pseudo-embedding used in tests and behind the `mock`
/// feature. Identical extractable text always yields an identical vector, and distinct
/// text yields a numerically distinct one, which is all the cache engine's tests need
/// from an embedder.
pub struct MockEmbedder {
    dimension: usize,
    exclude_system_prompt: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, exclude_system_prompt: false }
    }

    pub fn exclude_system_prompt(mut self, exclude: bool) -> Self {
        self.exclude_system_prompt = exclude;
        self
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, req: &GatewayRequest) -> Result<(Vec<f32>, u32), EmbedError> {
        let text = req
            .extractable_text(self.exclude_system_prompt)
            .ok_or(EmbedError::UnsupportedInput)?;

        let mut vector = Vec::with_capacity(self.dimension);
        let mut seed = hash_to_u64(text.as_bytes());
        for _ in 0..self.dimension {
            // Simple LCG walk so neighboring words/sentences have visibly different
            // vectors without pulling in a PRNG dependency for a mock.
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let normalized = (seed >> 40) as f32 / (1u64 << 24) as f32;
            vector.push(normalized - 0.5);
        }
        Ok((vector, text.split_whitespace().count() as u32))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
