//! In-process vector store
//!
//! Brute-force cosine search over a map of collections. Suitable for small
//! conversations, local experiments and tests; nothing is persisted.

use super::{
    ChunkPoint, CollectionSpec, CollectionStatus, SearchFilter, SearchResult, VectorStore,
};
use crate::error::{Error, ExternalService, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct MemoryCollection {
    dimension: usize,
    points: HashMap<Uuid, ChunkPoint>,
    /// Status checks left before the collection reports ready
    warmup_remaining: usize,
}

/// Vector store kept entirely in memory
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    warmup_polls: usize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report new collections as pending for the first `polls` status checks
    pub fn with_warmup_polls(polls: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            warmup_polls: polls,
        }
    }

    /// Number of collections currently held
    pub async fn collection_count(&self) -> usize {
        self.collections.read().await.len()
    }

    fn missing(name: &str) -> Error {
        Error::external(
            ExternalService::VectorStore,
            format!("collection '{}' does not exist", name),
        )
    }
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(&self, name: &str, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(name.to_string())
            .or_insert_with(|| MemoryCollection {
                dimension: spec.dimension,
                points: HashMap::new(),
                warmup_remaining: self.warmup_polls,
            });
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn collection_status(&self, name: &str) -> Result<CollectionStatus> {
        let mut collections = self.collections.write().await;
        let Some(collection) = collections.get_mut(name) else {
            return Ok(CollectionStatus::Missing);
        };

        if collection.warmup_remaining > 0 {
            collection.warmup_remaining -= 1;
            return Ok(CollectionStatus::Pending);
        }
        Ok(CollectionStatus::Ready)
    }

    async fn upsert(&self, name: &str, points: Vec<ChunkPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| Self::missing(name))?;

        if let Some(mismatch) = points
            .iter()
            .find(|p| p.vector.len() != collection.dimension)
        {
            return Err(Error::external(
                ExternalService::VectorStore,
                format!(
                    "Vector dimension mismatch for collection '{}': expected {} (got {})",
                    name,
                    collection.dimension,
                    mismatch.vector.len()
                ),
            ));
        }

        for point in points {
            collection.points.insert(point.id, point);
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        min_score: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| Self::missing(name))?;

        let mut results: Vec<SearchResult> = collection
            .points
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|p| SearchResult {
                id: p.id.to_string(),
                score: cosine_similarity(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|r| r.score >= min_score)
            .collect();

        // Ties broken by id so equal scores come back in a stable order
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_by_field(&self, name: &str, field: &str, value: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(name) {
            collection
                .points
                .retain(|_, p| p.payload.field(field).as_deref() != Some(value));
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.write().await.remove(name).is_some())
    }

    async fn count(&self, name: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| Self::missing(name))?;
        Ok(collection.points.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkPayload, DistanceMetric};

    fn spec(dimension: usize) -> CollectionSpec {
        CollectionSpec {
            dimension,
            distance: DistanceMetric::Cosine,
            hnsw_m: 16,
            hnsw_ef_construct: 100,
        }
    }

    fn point(doc_id: &str, index: usize, vector: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            id: ChunkPoint::point_id(doc_id, index),
            vector,
            payload: ChunkPayload {
                doc_id: doc_id.to_string(),
                chunk_index: index as i64,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_orders_and_applies_floor() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", &spec(2)).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("d1", 0, vec![1.0, 0.0]),
                    point("d1", 1, vec![0.8, 0.6]),
                    point("d2", 0, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = store.search("c", vec![1.0, 0.0], 5, 0.5, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].payload.chunk_index, 0);

        let filter = SearchFilter::documents(vec!["d2".to_string()]).unwrap();
        let filtered = store
            .search("c", vec![0.0, 1.0], 5, 0.5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].payload.doc_id, "d2");
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", &spec(3)).await.unwrap();

        let err = store
            .upsert("c", vec![point("d", 0, vec![0.1, 0.2])])
            .await
            .expect_err("should reject mismatched vector length");
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_delete_by_field_and_collection() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", &spec(2)).await.unwrap();
        store
            .upsert(
                "c",
                vec![point("d1", 0, vec![1.0, 0.0]), point("d2", 0, vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        store.delete_by_field("c", "doc_id", "d1").await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);

        assert!(store.delete_collection("c").await.unwrap());
        assert!(!store.delete_collection("c").await.unwrap());
        assert_eq!(
            store.collection_status("c").await.unwrap(),
            CollectionStatus::Missing
        );
    }

    #[tokio::test]
    async fn test_warmup_polls() {
        let store = MemoryVectorStore::with_warmup_polls(2);
        store.create_collection("c", &spec(2)).await.unwrap();

        assert_eq!(store.collection_status("c").await.unwrap(), CollectionStatus::Pending);
        assert_eq!(store.collection_status("c").await.unwrap(), CollectionStatus::Pending);
        assert_eq!(store.collection_status("c").await.unwrap(), CollectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = MemoryVectorStore::new();
        store.create_collection("c", &spec(2)).await.unwrap();
        store.upsert("c", vec![point("d", 0, vec![1.0, 0.0])]).await.unwrap();
        store.create_collection("c", &spec(2)).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
    }
}
