//! Shared per-request context values (spec.md §4.G, §6).
//!
//! One [`RequestContext`] is created per request and threaded through all four hook
//! calls. It is a typed struct rather than a stringly-typed map — an idiomatic Rust
//! rendering of spec.md §6's "context keys consumed... by value or named sentinels."
//! [`RequestContext::from_raw_parts`] is the seam a surrounding runtime would use to
//! bridge its own stringly-typed context into this one.

use crate::fingerprint::Fingerprint;
use crate::request::RequestKind;
use parking_lot::Mutex;

/// Scratch values the pre-LLM lookup stores for the post-LLM write-back to reuse
/// without recomputing (spec.md §4.E.1: "store ch, ph, tenant-metadata in request
/// context" / "store vec in request context").
#[derive(Debug, Clone, Default)]
struct ScratchState {
    fingerprint: Option<Fingerprint>,
    embedding: Option<Vec<f32>>,
    resolved_namespace: Option<String>,
    stream_complete: bool,
}

#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub request_kind: RequestKind,
    pub tenant_id: Option<String>,
    pub retry_count: u32,
    pub fallback_index: u32,

    /// Per-request override of the cache namespace; `None` falls back to configuration.
    pub cache_namespace_override: Option<String>,
    /// Per-request TTL override, in seconds.
    pub cache_ttl_override: Option<i64>,
    /// Per-request similarity threshold override.
    pub cache_threshold_override: Option<f32>,
    /// Disables write-back but not lookup when set.
    pub no_store: bool,

    scratch: Mutex<ScratchState>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, request_kind: RequestKind) -> Self {
        Self {
            request_id: request_id.into(),
            request_kind,
            tenant_id: None,
            retry_count: 0,
            fallback_index: 0,
            cache_namespace_override: None,
            cache_ttl_override: None,
            cache_threshold_override: None,
            no_store: false,
            scratch: Mutex::new(ScratchState::default()),
        }
    }

    /// Constructs a context from a surrounding runtime's stringly-typed values. `None`
    /// for any optional field means "not set" rather than "set to empty."
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw_parts(
        request_id: impl Into<String>,
        request_kind: RequestKind,
        tenant_id: Option<String>,
        cache_namespace_override: Option<String>,
        cache_ttl_override: Option<i64>,
        cache_threshold_override: Option<f32>,
        no_store: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            request_kind,
            tenant_id,
            retry_count: 0,
            fallback_index: 0,
            cache_namespace_override,
            cache_ttl_override,
            cache_threshold_override,
            no_store,
            scratch: Mutex::new(ScratchState::default()),
        }
    }

    pub fn store_fingerprint(&self, fingerprint: Fingerprint) {
        self.scratch.lock().fingerprint = Some(fingerprint);
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.scratch.lock().fingerprint
    }

    pub fn store_embedding(&self, embedding: Vec<f32>) {
        self.scratch.lock().embedding = Some(embedding);
    }

    pub fn embedding(&self) -> Option<Vec<f32>> {
        self.scratch.lock().embedding.clone()
    }

    pub fn store_resolved_namespace(&self, namespace: String) {
        self.scratch.lock().resolved_namespace = Some(namespace);
    }

    pub fn resolved_namespace(&self) -> Option<String> {
        self.scratch.lock().resolved_namespace.clone()
    }

    /// Flips once the final chunk of a streamed response has been sent downstream, so
    /// later middleware in the same request can tell the stream is done (spec.md §4.E).
    pub fn mark_stream_complete(&self) {
        self.scratch.lock().stream_complete = true;
    }

    pub fn is_stream_complete(&self) -> bool {
        self.scratch.lock().stream_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_state_round_trips_across_hook_boundary() {
        let ctx = RequestContext::new("r1", RequestKind::Chat);
        assert!(ctx.fingerprint().is_none());

        ctx.store_fingerprint(Fingerprint { content_hash: 1, params_hash: 2 });
        let fp = ctx.fingerprint().unwrap();
        assert_eq!(fp.content_hash, 1);
        assert_eq!(fp.params_hash, 2);

        ctx.store_embedding(vec![0.1, 0.2]);
        assert_eq!(ctx.embedding(), Some(vec![0.1, 0.2]));
    }

    #[test]
    fn stream_complete_defaults_false_and_latches_true() {
        let ctx = RequestContext::new("r1", RequestKind::Chat);
        assert!(!ctx.is_stream_complete());
        ctx.mark_stream_complete();
        assert!(ctx.is_stream_complete());
    }
}
