//! In-memory [`VectorStore`] used by tests and the `mock` feature.

use super::{Filter, Metadata, NearestMatch, StoredPoint, VectorStore, VectorStoreError, VectorStoreResult, cosine_similarity};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MockVectorStore {
    namespaces: RwLock<HashMap<String, Vec<StoredPoint>>>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total point count across a namespace, used by tests to assert on cleanup.
    pub fn count(&self, namespace: &str) -> usize {
        self.namespaces.read().get(namespace).map(Vec::len).unwrap_or(0)
    }

    fn matches(point: &StoredPoint, filters: &[Filter]) -> bool {
        filters.iter().all(|f| point.metadata.get(&f.key) == Some(&f.value))
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn add(&self, namespace: &str, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> VectorStoreResult<()> {
        let mut namespaces = self.namespaces.write();
        let points = namespaces.entry(namespace.to_string()).or_default();
        points.retain(|p| p.id != id);
        points.push(StoredPoint { id, vector, metadata });
        Ok(())
    }

    async fn get_all(&self, namespace: &str, filters: &[Filter], limit: usize) -> VectorStoreResult<Vec<StoredPoint>> {
        let namespaces = self.namespaces.read();
        let Some(points) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        Ok(points
            .iter()
            .filter(|p| Self::matches(p, filters))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        filters: &[Filter],
        min_similarity: f32,
        limit: usize,
    ) -> VectorStoreResult<Vec<NearestMatch>> {
        let namespaces = self.namespaces.read();
        let Some(points) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<NearestMatch> = points
            .iter()
            .filter(|p| Self::matches(p, filters))
            .map(|p| NearestMatch { point: p.clone(), similarity: cosine_similarity(vector, &p.vector) })
            .filter(|m| m.similarity >= min_similarity)
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete(&self, namespace: &str, id: Uuid) -> VectorStoreResult<()> {
        let mut namespaces = self.namespaces.write();
        let Some(points) = namespaces.get_mut(namespace) else {
            return Err(VectorStoreError::NotFound { namespace: namespace.to_string() });
        };
        let before = points.len();
        points.retain(|p| p.id != id);
        if points.len() == before {
            return Err(VectorStoreError::NotFound { namespace: namespace.to_string() });
        }
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, filters: &[Filter]) -> VectorStoreResult<u64> {
        let mut namespaces = self.namespaces.write();
        let Some(points) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        let before = points.len();
        points.retain(|p| !Self::matches(p, filters));
        Ok((before - points.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn add_then_get_all_round_trips() {
        let store = MockVectorStore::new();
        let id = Uuid::new_v4();
        let mut metadata = Metadata::new();
        metadata.insert("cache_namespace".into(), json!("u1"));

        store.add("u1", id, vec![1.0, 0.0], metadata.clone()).await.unwrap();

        let filters = vec![Filter::eq("cache_namespace", "u1")];
        let results = store.get_all("u1", &filters, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[tokio::test]
    async fn get_nearest_respects_threshold_and_filters() {
        let store = MockVectorStore::new();
        let close_id = Uuid::new_v4();
        let mut metadata = Metadata::new();
        metadata.insert("cache_namespace".into(), json!("u1"));
        store.add("u1", close_id, vec![1.0, 0.0], metadata.clone()).await.unwrap();

        let far_id = Uuid::new_v4();
        store.add("u1", far_id, vec![0.0, 1.0], metadata).await.unwrap();

        let filters = vec![Filter::eq("cache_namespace", "u1")];
        let results = store.get_nearest("u1", &[1.0, 0.0], &filters, 0.5, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].point.id, close_id);
    }

    #[tokio::test]
    async fn delete_all_removes_matching_points_only() {
        let store = MockVectorStore::new();
        let mut marked = Metadata::new();
        marked.insert("plugin_marker".into(), json!(true));
        store.add("u1", Uuid::new_v4(), vec![1.0], marked).await.unwrap();
        store.add("u1", Uuid::new_v4(), vec![1.0], Metadata::new()).await.unwrap();

        let removed = store
            .delete_all("u1", &[Filter::eq("plugin_marker", true)])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("u1"), 1);
    }

    #[tokio::test]
    async fn delete_missing_point_is_not_found() {
        let store = MockVectorStore::new();
        let err = store.delete("u1", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::NotFound { .. }));
    }
}
