//! Vector store adapter capability (spec.md §4.C).
//!
//! The core never depends on a particular vector database's storage engine — only on
//! this capability interface. [`QdrantVectorStore`] is the default implementation;
//! [`MockVectorStore`] is an in-memory stand-in for tests and the `mock` feature.

pub mod error;
pub mod mock;
pub mod qdrant;

pub use error::{VectorStoreError, VectorStoreResult};
pub use mock::MockVectorStore;
pub use qdrant::QdrantVectorStore;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Arbitrary metadata attached to a stored point (content_hash, params_hash,
/// cache_namespace, provider, model, plugin_marker, expires_at, response/stream_chunks —
/// see spec.md §6's vector store metadata schema).
pub type Metadata = BTreeMap<String, Value>;

/// An exact-match equality filter over a metadata field, used by both `get_all`
/// (direct-tier scan) and `get_nearest` (semantic-tier pre-filter).
#[derive(Debug, Clone)]
pub struct Filter {
    pub key: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// A point as returned from the store, metadata intact.
#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// A [`StoredPoint`] paired with its similarity score against the query vector.
#[derive(Debug, Clone)]
pub struct NearestMatch {
    pub point: StoredPoint,
    pub similarity: f32,
}

/// Capability the cache engine consumes for both tiers.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upserts a point. `namespace` scopes the logical collection (spec.md's
    /// `cache_namespace`); backends that need a single physical collection can fold it
    /// into the point id or a metadata filter instead.
    async fn add(
        &self,
        namespace: &str,
        id: Uuid,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> VectorStoreResult<()>;

    /// Exact-match filter scan, used by the direct tier.
    async fn get_all(
        &self,
        namespace: &str,
        filters: &[Filter],
        limit: usize,
    ) -> VectorStoreResult<Vec<StoredPoint>>;

    /// Cosine (or provider-native) nearest-neighbor search, pre-filtered by `filters`,
    /// used by the semantic tier.
    async fn get_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        filters: &[Filter],
        min_similarity: f32,
        limit: usize,
    ) -> VectorStoreResult<Vec<NearestMatch>>;

    async fn delete(&self, namespace: &str, id: Uuid) -> VectorStoreResult<()>;

    /// Bulk delete by filter; returns the number of points removed. Used both for
    /// lazy TTL-expiry deletes and for `Cleanup()`'s `plugin_marker=true` sweep.
    async fn delete_all(&self, namespace: &str, filters: &[Filter]) -> VectorStoreResult<u64>;
}

/// Plain cosine similarity, shared by the mock store and by any backend whose client
/// does not compute a similarity score itself.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}
