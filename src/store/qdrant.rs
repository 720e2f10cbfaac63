//! Qdrant backend

use super::{
    ChunkPayload, ChunkPoint, CollectionSpec, CollectionStatus, DistanceMetric, SearchFilter,
    SearchResult, VectorStore,
};
use crate::error::{Error, ExternalService, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    HnswConfigDiffBuilder, PointId, PointStruct, ScalarQuantizationBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use tracing::{debug, info};

/// Qdrant store handle, shared by every conversation collection
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Build a client for the given URL; no request is made until first use
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::external(ExternalService::VectorStore, e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, name: &str, spec: &CollectionSpec) -> Result<()> {
        if self.client.collection_exists(name).await? {
            debug!(collection = %name, "Collection already exists");
            return Ok(());
        }

        info!(
            collection = %name,
            dimension = spec.dimension,
            "Creating collection"
        );

        let distance = match spec.distance {
            DistanceMetric::Cosine => Distance::Cosine,
        };
        let vectors_config = VectorParamsBuilder::new(spec.dimension as u64, distance);
        let hnsw = HnswConfigDiffBuilder::default()
            .m(spec.hnsw_m)
            .ef_construct(spec.hnsw_ef_construct);

        let created = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(vectors_config)
                    .hnsw_config(hnsw)
                    .quantization_config(ScalarQuantizationBuilder::default()),
            )
            .await;

        if let Err(e) = created {
            // Lost a creation race; the collection is there either way
            if self.client.collection_exists(name).await.unwrap_or(false) {
                debug!(collection = %name, "Concurrent create: {}", e);
                return Ok(());
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.client.collection_exists(name).await?)
    }

    async fn collection_status(&self, name: &str) -> Result<CollectionStatus> {
        use qdrant_client::qdrant::CollectionStatus as Remote;

        if !self.client.collection_exists(name).await? {
            return Ok(CollectionStatus::Missing);
        }

        let info = self.client.collection_info(name).await?;
        let status = match info.result.map(|r| r.status()) {
            Some(Remote::Green) => CollectionStatus::Ready,
            Some(Remote::Yellow) => CollectionStatus::Optimizing,
            Some(Remote::Red) => CollectionStatus::Failed,
            Some(Remote::Grey) | Some(Remote::UnknownCollectionStatus) | None => {
                CollectionStatus::Pending
            }
        };
        Ok(status)
    }

    async fn upsert(&self, name: &str, points: Vec<ChunkPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        debug!(collection = %name, "Upserting {} points", points.len());

        let point_structs: Vec<PointStruct> =
            points.into_iter().map(|p| p.to_point_struct()).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, point_structs).wait(true))
            .await?;

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
        debug!(collection = %name, "Searching with limit {}", limit);

        let mut search_builder = SearchPointsBuilder::new(name, vector, limit as u64)
            .with_payload(true)
            .score_threshold(min_score);

        if let Some(qdrant_filter) = filter.and_then(to_qdrant_filter) {
            search_builder = search_builder.filter(qdrant_filter);
        }

        let response = self.client.search_points(search_builder).await?;

        let results = response
            .result
            .into_iter()
            .map(|p| {
                let payload: ChunkPayload = p
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, json_from_qdrant_value(v)))
                    .collect::<serde_json::Map<String, Value>>()
                    .into();

                SearchResult {
                    id: point_id_to_string(p.id),
                    score: p.score,
                    payload,
                }
            })
            .collect();

        Ok(results)
    }

    async fn delete_by_field(&self, name: &str, field: &str, value: &str) -> Result<()> {
        debug!(collection = %name, field, value, "Deleting points by field");

        let filter = Filter::must([Condition::matches(field, value.to_string())]);
        self.client
            .delete_points(DeletePointsBuilder::new(name).points(filter).wait(true))
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        if !self.client.collection_exists(name).await? {
            return Ok(false);
        }

        info!(collection = %name, "Deleting collection");
        self.client.delete_collection(name).await?;
        Ok(true)
    }

    async fn count(&self, name: &str) -> Result<u64> {
        let info = self.client.collection_info(name).await?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0))
    }

    fn backend_name(&self) -> &'static str {
        "qdrant"
    }
}

fn to_qdrant_filter(filter: &SearchFilter) -> Option<Filter> {
    let ids = filter.document_ids.as_ref()?;
    match ids.len() {
        0 => None,
        1 => Some(Filter::must([Condition::matches("doc_id", ids[0].clone())])),
        _ => Some(Filter::must([Condition::matches("doc_id", ids.clone())])),
    }
}

/// Convert PointId to string
fn point_id_to_string(id: Option<PointId>) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;

    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_filter_to_qdrant() {
        let filter = SearchFilter::documents(vec!["doc-1".to_string()]).unwrap();
        let qdrant_filter = to_qdrant_filter(&filter).unwrap();
        assert_eq!(qdrant_filter.must.len(), 1);

        let many = SearchFilter::documents(vec!["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(to_qdrant_filter(&many).unwrap().must.len(), 1);

        assert!(to_qdrant_filter(&SearchFilter::default()).is_none());
    }

    #[test]
    fn test_payload_survives_qdrant_value_conversion() {
        let payload = ChunkPayload {
            conversation_id: "c".to_string(),
            doc_id: "d".to_string(),
            doc_name: "file.pdf".to_string(),
            chunk_index: 2,
            chunk_hash: "h".to_string(),
            text: "body".to_string(),
            updated_at: "now".to_string(),
        };

        let back: ChunkPayload = payload
            .clone()
            .to_qdrant_payload()
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect::<serde_json::Map<String, Value>>()
            .into();

        assert_eq!(back, payload);
    }

    #[test]
    fn test_point_id_to_string() {
        let id = PointId::from("5b1f0e8e-0000-4000-8000-000000000000".to_string());
        assert_eq!(
            point_id_to_string(Some(id)),
            "5b1f0e8e-0000-4000-8000-000000000000"
        );
        assert_eq!(point_id_to_string(None), "");
    }

    #[test]
    fn test_client_builds_without_server() {
        assert!(QdrantStore::new("http://127.0.0.1:6334", None).is_ok());
    }
}
