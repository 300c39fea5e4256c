//! Qdrant-backed [`VectorStore`] implementation.

use super::{Filter, Metadata, NearestMatch, StoredPoint, VectorStore, VectorStoreError, VectorStoreResult};
use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter as QdrantFilter,
    PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// A thin wrapper over a single Qdrant collection. `namespace` (spec.md's
/// `cache_namespace`) is folded into every call as an additional equality filter rather
/// than a distinct physical collection, matching how the direct- and semantic-tier
/// pseudocode in spec.md §4.E already always includes `cache_namespace` in its filter
/// set.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorStore {
    pub async fn connect(url: &str, collection: impl Into<String>, vector_size: u64) -> VectorStoreResult<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        let collection = collection.into();

        let exists = client
            .collection_exists(&collection)
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        if !exists {
            client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        }

        Ok(Self { client, collection })
    }

    fn build_filter(namespace: &str, filters: &[Filter]) -> QdrantFilter {
        let mut conditions: Vec<Condition> = vec![Condition::matches("cache_namespace", namespace.to_string())];
        for f in filters {
            conditions.push(match &f.value {
                serde_json::Value::String(s) => Condition::matches(f.key.as_str(), s.clone()),
                serde_json::Value::Bool(b) => Condition::matches(f.key.as_str(), *b),
                serde_json::Value::Number(n) if n.is_i64() => {
                    Condition::matches(f.key.as_str(), n.as_i64().unwrap())
                }
                other => Condition::matches(f.key.as_str(), other.to_string()),
            });
        }
        QdrantFilter::must(conditions)
    }

    fn metadata_to_payload(metadata: Metadata) -> HashMap<String, qdrant_client::qdrant::Value> {
        metadata
            .into_iter()
            .map(|(k, v)| (k, json_to_qdrant_value(v)))
            .collect()
    }

    fn payload_to_metadata(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Metadata {
        payload.into_iter().map(|(k, v)| (k, qdrant_value_to_json(v))).collect()
    }
}

fn json_to_qdrant_value(value: serde_json::Value) -> qdrant_client::qdrant::Value {
    match value {
        serde_json::Value::Null => qdrant_client::qdrant::Value::from(Option::<bool>::None),
        serde_json::Value::Bool(b) => qdrant_client::qdrant::Value::from(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                qdrant_client::qdrant::Value::from(i)
            } else {
                qdrant_client::qdrant::Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => qdrant_client::qdrant::Value::from(s),
        serde_json::Value::Array(items) => {
            qdrant_client::qdrant::Value::from(items.into_iter().map(json_to_qdrant_value).collect::<Vec<_>>())
        }
        other @ serde_json::Value::Object(_) => qdrant_client::qdrant::Value::from(other.to_string()),
    }
}

/// Extracts the typed scalar from a protobuf payload value instead of debug-formatting
/// it, mirroring the `.as_integer()`/`.as_str()` accessor pattern Qdrant's own client
/// uses to read payloads back out (see the vector-db model's `SearchResult` conversion).
/// A debug-formatted string would make every round-tripped field — including
/// `expires_at` and the cached response blob — unparseable on the way back in.
fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::from(i)
    } else if let Some(d) = value.as_double() {
        serde_json::Value::from(d)
    } else if let Some(s) = value.as_str() {
        serde_json::Value::String(s.to_string())
    } else if let Some(list) = value.as_list() {
        serde_json::Value::Array(list.iter().cloned().map(qdrant_value_to_json).collect())
    } else {
        serde_json::Value::Null
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    #[instrument(skip(self, vector, metadata), fields(namespace, id = %id))]
    async fn add(&self, namespace: &str, id: Uuid, vector: Vec<f32>, mut metadata: Metadata) -> VectorStoreResult<()> {
        metadata.insert("cache_namespace".into(), serde_json::Value::String(namespace.to_string()));
        let payload = Self::metadata_to_payload(metadata);
        let point = PointStruct::new(id.to_string(), vector, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get_all(&self, namespace: &str, filters: &[Filter], limit: usize) -> VectorStoreResult<Vec<StoredPoint>> {
        let filter = Self::build_filter(namespace, filters);

        let result = self
            .client
            .scroll(
                qdrant_client::qdrant::ScrollPointsBuilder::new(&self.collection)
                    .filter(filter)
                    .limit(limit as u32)
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;

        result
            .result
            .into_iter()
            .map(|p| {
                let id = p
                    .id
                    .and_then(|id| id.point_id_options)
                    .map(|opts| match opts {
                        qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u) => u,
                        qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
                    })
                    .unwrap_or_default();
                let id = Uuid::parse_str(&id).map_err(|_| VectorStoreError::Transport("invalid point id".into()))?;
                let vector = p
                    .vectors
                    .and_then(|v| v.vectors_options)
                    .map(vector_options_to_vec)
                    .unwrap_or_default();
                Ok(StoredPoint { id, vector, metadata: Self::payload_to_metadata(p.payload) })
            })
            .collect()
    }

    #[instrument(skip(self, vector, filters))]
    async fn get_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        filters: &[Filter],
        min_similarity: f32,
        limit: usize,
    ) -> VectorStoreResult<Vec<NearestMatch>> {
        let filter = Self::build_filter(namespace, filters);

        let result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                    .filter(filter)
                    .score_threshold(min_similarity)
                    .with_payload(true),
            )
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;

        result
            .result
            .into_iter()
            .map(|scored| {
                let id = scored
                    .id
                    .and_then(|id| id.point_id_options)
                    .map(|opts| match opts {
                        qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u) => u,
                        qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
                    })
                    .unwrap_or_default();
                let id = Uuid::parse_str(&id).map_err(|_| VectorStoreError::Transport("invalid point id".into()))?;
                Ok(NearestMatch {
                    point: StoredPoint { id, vector: Vec::new(), metadata: Self::payload_to_metadata(scored.payload) },
                    similarity: scored.score,
                })
            })
            .collect()
    }

    async fn delete(&self, _namespace: &str, id: Uuid) -> VectorStoreResult<()> {
        let selector = PointsIdsList { ids: vec![id.to_string().into()] };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(selector).wait(true))
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, filters: &[Filter]) -> VectorStoreResult<u64> {
        const DELETE_ALL_SCAN_LIMIT: usize = 100_000;
        let to_delete = self.get_all(namespace, filters, DELETE_ALL_SCAN_LIMIT).await?;
        let count = to_delete.len() as u64;
        if to_delete.is_empty() {
            return Ok(0);
        }
        let selector = PointsIdsList { ids: to_delete.iter().map(|p| p.id.to_string().into()).collect() };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(selector).wait(true))
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        Ok(count)
    }
}

fn vector_options_to_vec(opts: qdrant_client::qdrant::vectors::VectorsOptions) -> Vec<f32> {
    match opts {
        qdrant_client::qdrant::vectors::VectorsOptions::Vector(v) => v.data,
        qdrant_client::qdrant::vectors::VectorsOptions::Vectors(_) => Vec::new(),
    }
}
