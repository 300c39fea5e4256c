//! Cache engine: direct-then-semantic lookup and asynchronous write-back
//! (spec.md §4.E).

pub mod error;

pub use error::CacheError;

use crate::constants::DEFAULT_BACKGROUND_TIMEOUT_SECS;
use crate::context::RequestContext;
use crate::embedding::Embedder;
use crate::fingerprint::fingerprint;
use crate::request::{GatewayRequest, GatewayResponse, StreamChunk, UsageBlock};
use crate::stream::{FinalizedStream, PendingMetadata};
use crate::vectordb::{Filter, Metadata, StoredPoint, VectorStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Which tier produced a cache hit, carried into the synthetic response's cache-debug
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitType {
    Direct,
    Semantic,
}

/// Outcome of a pre-LLM lookup.
pub enum LookupOutcome {
    Hit { payload: CachedPayload, hit_type: HitType, similarity: f32 },
    Miss,
    /// No cache namespace resolved for this request; caching is disabled entirely.
    Bypass,
}

/// What a fresh cache hit reconstructs to, depending on which shape the matched point
/// was written with (spec.md §8 S4: replaying a streamed entry must replay all of its
/// chunks, not collapse them into one synthetic response).
pub enum CachedPayload {
    /// A single complete response, reconstructed from the `"response"` metadata blob.
    Response(GatewayResponse),
    /// A stream's full ordered chunk sequence, reconstructed from `"stream_chunks"`.
    Stream(Vec<StreamChunk>),
}

/// The unified cache-entry layout (spec.md §9: "this spec describes ONLY the unified
/// layout; the legacy layout is considered deprecated").
#[derive(Debug, Clone)]
pub struct CacheEntryRecord {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub content_hash: u64,
    pub params_hash: u64,
    pub cache_namespace: String,
    pub provider: String,
    pub model: String,
    pub payload: CachePayload,
    pub expires_at: i64,
    pub plugin_marker: bool,
}

#[derive(Debug, Clone)]
pub enum CachePayload {
    Response(String),
    StreamChunks(Vec<String>),
}

/// Tunables consumed by [`CacheEngine`], snapshotted from [`crate::config::Config`] at
/// construction so per-request overrides can cheaply diff against them.
#[derive(Debug, Clone)]
pub struct CacheEngineConfig {
    pub default_namespace: String,
    pub default_ttl_secs: i64,
    pub default_threshold: f32,
    pub cache_by_provider: bool,
    pub cache_by_model: bool,
    pub exclude_system_prompt: bool,
    pub background_timeout_secs: u64,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            default_namespace: String::new(),
            default_ttl_secs: crate::constants::DEFAULT_CACHE_TTL_SECS,
            default_threshold: crate::constants::DEFAULT_SIMILARITY_THRESHOLD,
            cache_by_provider: false,
            cache_by_model: true,
            exclude_system_prompt: false,
            background_timeout_secs: DEFAULT_BACKGROUND_TIMEOUT_SECS,
        }
    }
}

pub struct CacheEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: CacheEngineConfig,
}

impl CacheEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, config: CacheEngineConfig) -> Self {
        Self { store, embedder, config }
    }

    fn resolve_namespace(&self, ctx: &RequestContext) -> Option<String> {
        let ns = ctx
            .cache_namespace_override
            .clone()
            .unwrap_or_else(|| self.config.default_namespace.clone());
        if ns.is_empty() { None } else { Some(ns) }
    }

    fn threshold(&self, ctx: &RequestContext) -> f32 {
        ctx.cache_threshold_override.unwrap_or(self.config.default_threshold)
    }

    fn ttl_secs(&self, ctx: &RequestContext) -> i64 {
        ctx.cache_ttl_override.unwrap_or(self.config.default_ttl_secs)
    }

    fn base_filters(namespace: &str, req: &GatewayRequest, cfg: &CacheEngineConfig) -> Vec<Filter> {
        let mut filters = vec![
            Filter::eq("cache_namespace", namespace),
            Filter::eq("plugin_marker", true),
        ];
        if cfg.cache_by_provider {
            filters.push(Filter::eq("provider", req.provider.as_str()));
        }
        if cfg.cache_by_model {
            filters.push(Filter::eq("model", req.model.as_str()));
        }
        filters
    }

    /// Implements spec.md §4.E.1 exactly: direct tier first, semantic tier second,
    /// skipping the latter for kinds/bodies with no extractable text.
    #[instrument(skip(self, req, ctx), fields(request_id = %ctx.request_id))]
    pub async fn pre_llm_lookup(&self, req: &GatewayRequest, ctx: &RequestContext) -> LookupOutcome {
        let Some(namespace) = self.resolve_namespace(ctx) else {
            return LookupOutcome::Bypass;
        };
        ctx.store_resolved_namespace(namespace.clone());

        let fp = match fingerprint(req, req.is_stream, self.config.exclude_system_prompt) {
            Ok(fp) => fp,
            Err(e) => {
                debug!(error = %e, "fingerprint failed, treating as unconditional miss");
                return LookupOutcome::Miss;
            }
        };
        ctx.store_fingerprint(fp);

        let mut direct_filters = Self::base_filters(&namespace, req, &self.config);
        direct_filters.push(Filter::eq("content_hash", fp.content_hash.to_string()));
        direct_filters.push(Filter::eq("params_hash", fp.params_hash.to_string()));

        match self.store.get_all(&namespace, &direct_filters, 1).await {
            Ok(hits) => {
                if let Some(point) = hits.into_iter().next() {
                    if let Some(payload) = self.synthesize_if_fresh(&namespace, &point, HitType::Direct, 1.0).await {
                        return LookupOutcome::Hit { payload, hit_type: HitType::Direct, similarity: 1.0 };
                    }
                }
            }
            Err(e) => warn!(error = %e, "direct-tier lookup failed, treating as miss"),
        }

        if !req.kind.text_extractable() {
            return LookupOutcome::Miss;
        }

        let (vector, _tokens) = match self.embedder.embed(req).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "embedding skipped, semantic tier unavailable");
                return LookupOutcome::Miss;
            }
        };
        ctx.store_embedding(vector.clone());

        let mut semantic_filters = Self::base_filters(&namespace, req, &self.config);
        semantic_filters.push(Filter::eq("params_hash", fp.params_hash.to_string()));
        let threshold = self.threshold(ctx);

        match self.store.get_nearest(&namespace, &vector, &semantic_filters, threshold, 1).await {
            Ok(hits) => {
                if let Some(m) = hits.into_iter().next() {
                    if let Some(payload) =
                        self.synthesize_if_fresh(&namespace, &m.point, HitType::Semantic, m.similarity).await
                    {
                        return LookupOutcome::Hit { payload, hit_type: HitType::Semantic, similarity: m.similarity };
                    }
                }
                LookupOutcome::Miss
            }
            Err(e) => {
                warn!(error = %e, "semantic-tier lookup failed, treating as miss");
                LookupOutcome::Miss
            }
        }
    }

    /// Checks TTL on a raw hit; if expired, schedules a background delete and returns
    /// `None` (treated as miss). Otherwise reconstructs whichever payload shape the point
    /// was written with — a single response, or the full ordered chunk sequence for a
    /// stream-cached entry (spec.md §8 S4).
    async fn synthesize_if_fresh(
        &self,
        namespace: &str,
        point: &StoredPoint,
        hit_type: HitType,
        similarity: f32,
    ) -> Option<CachedPayload> {
        let expires_at = point.metadata.get("expires_at").and_then(Value::as_i64).unwrap_or(0);
        let now = unix_now();
        if expires_at <= now {
            let store = Arc::clone(&self.store);
            let namespace = namespace.to_string();
            let id = point.id;
            tokio::spawn(async move {
                if let Err(e) = store.delete(&namespace, id).await {
                    debug!(error = %e, "lazy TTL delete failed");
                }
            });
            return None;
        }
        if point.metadata.contains_key("stream_chunks") {
            synthetic_stream_chunks(point, hit_type, similarity).map(CachedPayload::Stream)
        } else {
            Some(CachedPayload::Response(synthetic_response(point, hit_type, similarity)))
        }
    }

    /// Implements spec.md §4.E.2: fire-and-forget write-back for a completed non-stream
    /// response. The caller must spawn this (or await it detached) so the hot path never
    /// blocks on it; `CacheEngine` itself performs no spawning, matching the "plugin owns
    /// the background-task scope" split (spec.md §4.G).
    #[instrument(skip(self, req, resp, ctx), fields(request_id = %ctx.request_id))]
    pub async fn write_back_response(&self, req: &GatewayRequest, resp: &GatewayResponse, ctx: &RequestContext) {
        if resp.cache_hit {
            return;
        }
        if ctx.no_store {
            return;
        }
        let Some(namespace) = ctx.resolved_namespace().or_else(|| self.resolve_namespace(ctx)) else {
            return;
        };
        if resp.error.is_some() {
            return;
        }

        if let Err(e) = self.write_back_response_inner(&namespace, req, resp, ctx).await {
            warn!(error = %e, "cache write-back failed, response delivered unaffected");
        }
    }

    async fn write_back_response_inner(
        &self,
        namespace: &str,
        req: &GatewayRequest,
        resp: &GatewayResponse,
        ctx: &RequestContext,
    ) -> Result<(), CacheError> {
        let fp = match ctx.fingerprint() {
            Some(fp) => fp,
            None => fingerprint(req, req.is_stream, self.config.exclude_system_prompt)?,
        };

        // Embedding is generated at write time purely for persistence (so a later
        // semantic lookup can find this entry); a missing embedder result here still
        // allows the direct-tier write to proceed with an empty vector.
        let embedding = match ctx.embedding() {
            Some(v) => v,
            None => self.embedder.embed(req).await.map(|(v, _)| v).unwrap_or_default(),
        };

        let serialized = serde_json::to_string(resp)?;
        let record = CacheEntryRecord {
            id: stable_entry_id(&req.request_id),
            embedding,
            content_hash: fp.content_hash,
            params_hash: fp.params_hash,
            cache_namespace: namespace.to_string(),
            provider: req.provider.clone(),
            model: req.model.clone(),
            payload: CachePayload::Response(serialized),
            expires_at: unix_now() + self.ttl_secs(ctx),
            plugin_marker: true,
        };

        self.add_with_timeout(record).await
    }

    /// Writes back a finalized stream (spec.md §4.D/§4.E.2.3).
    #[instrument(skip(self, finalized))]
    pub async fn write_back_stream(&self, finalized: FinalizedStream) {
        if finalized.serialized_chunks.is_empty() {
            return;
        }
        let PendingMetadata { cache_namespace, content_hash, params_hash, provider, model, ttl_secs } =
            finalized.pending_metadata;
        if cache_namespace.is_empty() {
            return;
        }

        let record = CacheEntryRecord {
            id: stable_entry_id(&finalized.request_id),
            embedding: finalized.embedding.unwrap_or_default(),
            content_hash,
            params_hash,
            cache_namespace,
            provider,
            model,
            payload: CachePayload::StreamChunks(finalized.serialized_chunks),
            expires_at: unix_now() + ttl_secs,
            plugin_marker: true,
        };

        if let Err(e) = self.add_with_timeout(record).await {
            warn!(error = %e, "stream cache write-back failed");
        }
    }

    async fn add_with_timeout(&self, record: CacheEntryRecord) -> Result<(), CacheError> {
        let metadata = entry_to_metadata(&record);
        let timeout = Duration::from_secs(self.config.background_timeout_secs);

        match tokio::time::timeout(timeout, self.store.add(&record.cache_namespace, record.id, record.embedding.clone(), metadata)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(namespace = %record.cache_namespace, "cache write-back timed out");
                Ok(())
            }
        }
    }
}

/// Derives a stable entry id from the request-id so replaying the same completed
/// post-hook twice never creates more than one new cache entry (spec.md §8 invariant 7).
fn stable_entry_id(request_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, request_id.as_bytes())
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn entry_to_metadata(record: &CacheEntryRecord) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("content_hash".into(), json!(record.content_hash.to_string()));
    metadata.insert("params_hash".into(), json!(record.params_hash.to_string()));
    metadata.insert("cache_namespace".into(), json!(record.cache_namespace));
    metadata.insert("provider".into(), json!(record.provider));
    metadata.insert("model".into(), json!(record.model));
    metadata.insert("plugin_marker".into(), json!(record.plugin_marker));
    metadata.insert("expires_at".into(), json!(record.expires_at));
    match &record.payload {
        CachePayload::Response(blob) => {
            metadata.insert("response".into(), json!(blob));
        }
        CachePayload::StreamChunks(chunks) => {
            metadata.insert("stream_chunks".into(), json!(chunks));
        }
    }
    metadata
}

/// Builds the synthetic response for a non-streamed cache hit, annotated with the
/// cache-debug block spec.md §4.E describes (`cache_hit`, `hit_type`, `cache_id`,
/// `similarity`, ...).
fn synthetic_response(point: &StoredPoint, hit_type: HitType, similarity: f32) -> GatewayResponse {
    let blob = point.metadata.get("response").and_then(Value::as_str);

    let mut response: GatewayResponse = match blob.and_then(|b| serde_json::from_str(b).ok()) {
        Some(resp) => resp,
        None => GatewayResponse {
            request_id: String::new(),
            kind: crate::request::RequestKind::Chat,
            provider: point.metadata.get("provider").and_then(Value::as_str).unwrap_or_default().to_string(),
            model: point.metadata.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
            usage: Some(UsageBlock::default()),
            error: None,
            cache_hit: false,
            extra: Default::default(),
            native_chat: None,
        },
    };

    response.cache_hit = true;
    response.extra.insert("cache_hit".into(), json!(true));
    response.extra.insert(
        "hit_type".into(),
        json!(match hit_type {
            HitType::Direct => "Direct",
            HitType::Semantic => "Semantic",
        }),
    );
    response.extra.insert("cache_id".into(), json!(point.id.to_string()));
    response.extra.insert("similarity".into(), json!(similarity));
    response
}

/// Reconstructs the full ordered chunk sequence a stream-cached entry was written with,
/// attaching the cache-debug block to the last chunk only (spec.md §8 S4, invariant 3).
/// Returns `None` if the metadata is missing or every chunk fails to deserialize, which
/// the caller treats the same as an expired entry: a miss.
fn synthetic_stream_chunks(point: &StoredPoint, hit_type: HitType, similarity: f32) -> Option<Vec<StreamChunk>> {
    let raw = point.metadata.get("stream_chunks").and_then(Value::as_array)?;
    let mut chunks: Vec<StreamChunk> = raw
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|s| serde_json::from_str::<StreamChunk>(s).ok())
        .collect();
    if chunks.is_empty() {
        return None;
    }
    if let Some(last) = chunks.last_mut() {
        attach_cache_debug(last, point.id, hit_type, similarity);
    }
    Some(chunks)
}

/// Merges the same cache-debug fields [`synthetic_response`] attaches (`cache_hit`,
/// `hit_type`, `cache_id`, `similarity`) into a chunk's opaque payload. Non-object
/// payloads are wrapped rather than overwritten so the original provider payload is
/// still reachable under `"value"`.
fn attach_cache_debug(chunk: &mut StreamChunk, cache_id: Uuid, hit_type: HitType, similarity: f32) {
    if !chunk.payload.is_object() {
        let original = std::mem::replace(&mut chunk.payload, Value::Null);
        chunk.payload = json!({ "value": original });
    }
    let map = chunk.payload.as_object_mut().expect("payload normalized to an object above");
    map.insert("cache_hit".into(), json!(true));
    map.insert(
        "hit_type".into(),
        json!(match hit_type {
            HitType::Direct => "Direct",
            HitType::Semantic => "Semantic",
        }),
    );
    map.insert("cache_id".into(), json!(cache_id.to_string()));
    map.insert("similarity".into(), json!(similarity));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::request::{RequestBody, RequestKind, RequestParams, TenancyInfo, TextMessage};
    use crate::vectordb::MockVectorStore;

    fn chat_request(id: &str, text: &str) -> GatewayRequest {
        GatewayRequest {
            request_id: id.into(),
            kind: RequestKind::Chat,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            is_stream: false,
            params: RequestParams::default(),
            body: RequestBody::Chat {
                native: None,
                messages: vec![TextMessage { role: "user".into(), text: text.into() }],
            },
            tenancy: TenancyInfo::default(),
        }
    }

    fn response_for(req: &GatewayRequest, text: &str) -> GatewayResponse {
        GatewayResponse {
            request_id: req.request_id.clone(),
            kind: req.kind,
            provider: req.provider.clone(),
            model: req.model.clone(),
            usage: Some(UsageBlock { total_tokens: 10, ..Default::default() }),
            error: None,
            cache_hit: false,
            extra: [("content".to_string(), json!(text))].into_iter().collect(),
            native_chat: None,
        }
    }

    fn engine() -> (CacheEngine, Arc<MockVectorStore>) {
        let store = Arc::new(MockVectorStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let config = CacheEngineConfig { default_namespace: "u1".into(), ..Default::default() };
        (CacheEngine::new(store.clone(), embedder, config), store)
    }

    #[tokio::test]
    async fn miss_then_direct_hit_after_write_back() {
        let (engine, _store) = engine();
        let ctx = RequestContext::new("r1", RequestKind::Chat);
        let req = chat_request("r1", "What is Bifrost?");

        match engine.pre_llm_lookup(&req, &ctx).await {
            LookupOutcome::Miss => {}
            _ => panic!("expected initial miss"),
        }

        let resp = response_for(&req, "X");
        engine.write_back_response(&req, &resp, &ctx).await;

        let ctx2 = RequestContext::new("r2", RequestKind::Chat);
        let req2 = chat_request("r2", "What is Bifrost?");
        match engine.pre_llm_lookup(&req2, &ctx2).await {
            LookupOutcome::Hit { hit_type, similarity, .. } => {
                assert_eq!(hit_type, HitType::Direct);
                assert_eq!(similarity, 1.0);
            }
            _ => panic!("expected direct hit"),
        }
    }

    #[tokio::test]
    async fn params_change_causes_miss_despite_identical_content() {
        let (engine, _store) = engine();
        let ctx = RequestContext::new("r1", RequestKind::Chat);
        let mut req = chat_request("r1", "What is Bifrost?");
        req.params.temperature = Some(0.7);
        engine.pre_llm_lookup(&req, &ctx).await;
        engine.write_back_response(&req, &response_for(&req, "X"), &ctx).await;

        let mut req2 = chat_request("r2", "What is Bifrost?");
        req2.params.temperature = Some(0.5);
        let ctx2 = RequestContext::new("r2", RequestKind::Chat);
        match engine.pre_llm_lookup(&req2, &ctx2).await {
            LookupOutcome::Miss => {}
            _ => panic!("expected miss on params change"),
        }
    }

    #[tokio::test]
    async fn no_namespace_resolved_bypasses_cache() {
        let store = Arc::new(MockVectorStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let engine = CacheEngine::new(store, embedder, CacheEngineConfig::default());

        let ctx = RequestContext::new("r1", RequestKind::Chat);
        let req = chat_request("r1", "hello");
        match engine.pre_llm_lookup(&req, &ctx).await {
            LookupOutcome::Bypass => {}
            _ => panic!("expected bypass with no namespace"),
        }
    }

    #[tokio::test]
    async fn replaying_completed_post_hook_twice_writes_at_most_one_entry() {
        let (engine, store) = engine();
        let ctx = RequestContext::new("r1", RequestKind::Chat);
        let req = chat_request("r1", "idempotency check");
        let resp = response_for(&req, "X");

        engine.write_back_response(&req, &resp, &ctx).await;
        engine.write_back_response(&req, &resp, &ctx).await;

        assert_eq!(store.count("u1"), 1);
    }

    #[tokio::test]
    async fn cache_hit_response_is_not_written_back_again() {
        let (engine, store) = engine();
        let ctx = RequestContext::new("r1", RequestKind::Chat);
        let req = chat_request("r1", "already cached");
        let mut resp = response_for(&req, "X");
        resp.cache_hit = true;

        engine.write_back_response(&req, &resp, &ctx).await;
        assert_eq!(store.count("u1"), 0);
    }

    fn stream_chunk(index: u64, delta: &str, finish_reason: Option<&str>) -> crate::request::StreamChunk {
        crate::request::StreamChunk {
            chunk_index: index,
            image_index: None,
            finish_reason: finish_reason.map(String::from),
            usage: None,
            error: None,
            payload: json!({ "delta": delta }),
        }
    }

    #[tokio::test]
    async fn stream_hit_replays_all_chunks_with_debug_block_on_last_only() {
        let (engine, _store) = engine();
        let mut req = chat_request("r1", "stream me");
        req.is_stream = true;
        let fp = crate::fingerprint::fingerprint(&req, true, false).unwrap();

        let chunks = vec![stream_chunk(0, "a", None), stream_chunk(1, "b", None), stream_chunk(2, "c", Some("stop"))];
        let serialized_chunks: Vec<String> = chunks.iter().map(serde_json::to_string).map(Result::unwrap).collect();
        let finalized = crate::stream::FinalizedStream {
            request_id: "r1".into(),
            serialized_chunks,
            embedding: None,
            pending_metadata: crate::stream::PendingMetadata {
                cache_namespace: "u1".into(),
                content_hash: fp.content_hash,
                params_hash: fp.params_hash,
                provider: "openai".into(),
                model: "gpt-4o".into(),
                ttl_secs: 300,
            },
        };
        engine.write_back_stream(finalized).await;

        let ctx2 = RequestContext::new("r2", RequestKind::Chat);
        let mut req2 = chat_request("r2", "stream me");
        req2.is_stream = true;
        match engine.pre_llm_lookup(&req2, &ctx2).await {
            LookupOutcome::Hit { payload: CachedPayload::Stream(replayed), hit_type, similarity } => {
                assert_eq!(hit_type, HitType::Direct);
                assert_eq!(similarity, 1.0);
                assert_eq!(replayed.len(), 3);
                for (i, chunk) in replayed.iter().enumerate() {
                    assert_eq!(chunk.chunk_index, i as u64);
                }
                assert_eq!(replayed[0].payload.get("delta").and_then(Value::as_str), Some("a"));
                assert!(replayed[0].payload.get("cache_hit").is_none());
                assert_eq!(replayed[1].payload.get("delta").and_then(Value::as_str), Some("b"));
                assert!(replayed[1].payload.get("cache_hit").is_none());
                let last = &replayed[2];
                assert_eq!(last.payload.get("delta").and_then(Value::as_str), Some("c"));
                assert_eq!(last.payload.get("cache_hit"), Some(&json!(true)));
                assert_eq!(last.payload.get("hit_type"), Some(&json!("Direct")));
            }
            _ => panic!("expected a replayed stream hit"),
        }
    }
}
