//! Streaming chunk accumulator (spec.md §4.D).
//!
//! `StreamRegistry` wraps a `DashMap` (the registry-level lock) keyed by request-id,
//! each entry guarded by its own `parking_lot::Mutex` (the per-entry lock), satisfying
//! the lock order spec.md §5 requires: registry lookup first, then per-entry lock.

pub mod error;

pub use error::StreamError;

use crate::constants::ACCUMULATOR_MAX_AGE_SECS;
use crate::request::StreamChunk;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// State machine: `Open` → `Open` (non-final chunk) → `Complete` (first completion
/// signal) → `Discarded` (swept or finalized and removed). `Error` is a flag on the
/// record rather than its own state; an errored stream goes straight from `Open` to
/// discarded without ever reaching `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Open,
    Complete,
}

/// Metadata captured at the pre-LLM hook, carried through to the finalized write-back
/// (cache namespace, fingerprint, TTL override, etc.) without re-deriving it.
#[derive(Debug, Clone, Default)]
pub struct PendingMetadata {
    pub cache_namespace: String,
    pub content_hash: u64,
    pub params_hash: u64,
    pub provider: String,
    pub model: String,
    pub ttl_secs: i64,
}

struct AccumulatorRecord {
    chunks: Vec<StreamChunk>,
    state: AccumulatorState,
    has_error: bool,
    first_chunk_at: Instant,
    embedding: Option<Vec<f32>>,
    pending_metadata: PendingMetadata,
}

/// The result of a successful finalization: chunks serialized and stably ordered,
/// ready to hand to the cache engine's write-back.
pub struct FinalizedStream {
    pub request_id: String,
    pub serialized_chunks: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub pending_metadata: PendingMetadata,
}

/// Outcome of pushing one chunk into the accumulator.
pub enum PushOutcome {
    /// The stream is still open; nothing further to do.
    Continue,
    /// This chunk was the first completion signal and finalization succeeded; the
    /// caller should hand the result to the cache engine's write-back.
    Finalized(FinalizedStream),
    /// This chunk was a completion signal but the stream had already recorded an error,
    /// or the finalized chunk set was empty; no cache write should occur.
    Discarded,
}

pub struct StreamRegistry {
    entries: DashMap<String, Mutex<AccumulatorRecord>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Creates an accumulator for a new streaming request (pre-LLM hook).
    pub fn create(&self, request_id: impl Into<String>, embedding: Option<Vec<f32>>, pending_metadata: PendingMetadata) {
        self.entries.insert(
            request_id.into(),
            Mutex::new(AccumulatorRecord {
                chunks: Vec::new(),
                state: AccumulatorState::Open,
                has_error: false,
                first_chunk_at: Instant::now(),
                embedding,
                pending_metadata,
            }),
        );
    }

    /// Pushes one chunk (stream-chunk hook). Missing accumulators are logged and
    /// dropped per spec.md §4.D — the provider chunk still passes through unchanged at
    /// the call site regardless of this return value.
    #[instrument(skip(self, chunk), fields(request_id))]
    pub fn push_chunk(&self, request_id: &str, chunk: StreamChunk) -> Result<PushOutcome, StreamError> {
        let Some(entry) = self.entries.get(request_id) else {
            warn!(request_id, "stream-chunk hook fired with no open accumulator");
            return Err(StreamError::MissingAccumulator { request_id: request_id.to_string() });
        };

        let mut record = entry.lock();
        if record.state == AccumulatorState::Complete {
            // First completion signal already processed; later ones are ignored.
            return Ok(PushOutcome::Continue);
        }

        let is_completion = chunk.is_completion_signal();
        if chunk.error.is_some() {
            record.has_error = true;
        }
        record.chunks.push(chunk);

        if !is_completion {
            return Ok(PushOutcome::Continue);
        }

        record.state = AccumulatorState::Complete;
        let outcome = Self::finalize_locked(request_id, &mut record);
        drop(record);
        self.entries.remove(request_id);
        Ok(outcome)
    }

    fn finalize_locked(request_id: &str, record: &mut AccumulatorRecord) -> PushOutcome {
        if record.has_error {
            debug!(request_id, "discarding errored stream, no cache write");
            return PushOutcome::Discarded;
        }

        // Stable sort by chunk_index, with image_index as the primary key for
        // image-generation streams; nil (absent) indices sort to the end.
        record.chunks.sort_by(|a, b| {
            a.image_index
                .cmp(&b.image_index)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });

        let serialized: Result<Vec<String>, _> =
            record.chunks.iter().map(serde_json::to_string).collect();
        let Ok(serialized) = serialized else {
            return PushOutcome::Discarded;
        };
        if serialized.is_empty() {
            return PushOutcome::Discarded;
        }

        PushOutcome::Finalized(FinalizedStream {
            request_id: request_id.to_string(),
            serialized_chunks: serialized,
            embedding: record.embedding.clone(),
            pending_metadata: record.pending_metadata.clone(),
        })
    }

    /// Sweeps accumulators whose first chunk is older than [`ACCUMULATOR_MAX_AGE_SECS`],
    /// discarding them without writing back.
    fn sweep(&self) {
        let max_age = Duration::from_secs(ACCUMULATOR_MAX_AGE_SECS);
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().lock().first_chunk_at.elapsed() > max_age)
            .map(|entry| entry.key().clone())
            .collect();

        for request_id in stale {
            debug!(request_id, "janitor sweeping stale stream accumulator");
            self.entries.remove(&request_id);
        }
    }

    /// Active accumulator count, used by tests and shutdown diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the background janitor task. The task runs until `cancel` is triggered, at
/// which point it returns so the owning `JoinSet` can observe completion on shutdown.
pub fn spawn_janitor(
    registry: Arc<StreamRegistry>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => registry.sweep(),
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResponseError;
    use serde_json::Value;

    fn chunk(index: u64, finish_reason: Option<&str>) -> StreamChunk {
        StreamChunk {
            chunk_index: index,
            image_index: None,
            finish_reason: finish_reason.map(String::from),
            usage: None,
            error: None,
            payload: Value::String(format!("chunk-{index}")),
        }
    }

    #[test]
    fn non_final_chunks_keep_stream_open() {
        let registry = StreamRegistry::new();
        registry.create("r1", None, PendingMetadata::default());

        match registry.push_chunk("r1", chunk(0, None)).unwrap() {
            PushOutcome::Continue => {}
            _ => panic!("expected Continue"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn finish_reason_finalizes_in_index_order_regardless_of_arrival_order() {
        let registry = StreamRegistry::new();
        registry.create("r1", None, PendingMetadata::default());

        registry.push_chunk("r1", chunk(2, None)).unwrap();
        registry.push_chunk("r1", chunk(0, None)).unwrap();
        let outcome = registry.push_chunk("r1", chunk(1, Some("stop"))).unwrap();

        match outcome {
            PushOutcome::Finalized(finalized) => {
                assert_eq!(finalized.serialized_chunks.len(), 3);
                assert!(finalized.serialized_chunks[0].contains("chunk-0"));
                assert!(finalized.serialized_chunks[1].contains("chunk-1"));
                assert!(finalized.serialized_chunks[2].contains("chunk-2"));
            }
            _ => panic!("expected Finalized"),
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn errored_stream_is_discarded_without_cache_write() {
        let registry = StreamRegistry::new();
        registry.create("r1", None, PendingMetadata::default());
        registry.push_chunk("r1", chunk(0, None)).unwrap();

        let mut errored = chunk(1, None);
        errored.error = Some(ResponseError { kind: "timeout".into(), code: None, message: "x".into() });
        let outcome = registry.push_chunk("r1", errored).unwrap();

        match outcome {
            PushOutcome::Discarded => {}
            _ => panic!("expected Discarded"),
        }
    }

    #[test]
    fn missing_accumulator_is_reported_but_does_not_panic() {
        let registry = StreamRegistry::new();
        let err = registry.push_chunk("ghost", chunk(0, Some("stop"))).unwrap_err();
        assert!(matches!(err, StreamError::MissingAccumulator { .. }));
    }

    #[test]
    fn later_completion_signals_after_first_are_ignored() {
        let registry = StreamRegistry::new();
        registry.create("r1", None, PendingMetadata::default());
        registry.push_chunk("r1", chunk(0, Some("stop"))).unwrap();
        // Accumulator was already removed on first completion; a stray second chunk
        // for the same id now reports MissingAccumulator rather than double-writing.
        let err = registry.push_chunk("r1", chunk(1, Some("stop"))).unwrap_err();
        assert!(matches!(err, StreamError::MissingAccumulator { .. }));
    }
}
