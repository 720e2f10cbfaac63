//! Payload schema for vector points

use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// A point ready to be upserted
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

impl ChunkPoint {
    /// Stable point id for a document's chunk, so re-ingesting overwrites instead of duplicating
    pub fn point_id(doc_id: &str, chunk_index: usize) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}:{}", doc_id, chunk_index).as_bytes(),
        )
    }

    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let payload_map = self.payload.to_qdrant_payload();
        PointStruct::new(self.id.to_string(), self.vector, payload_map)
    }
}

/// Provenance stored with each chunk vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Owning conversation
    pub conversation_id: String,

    /// Document ID
    pub doc_id: String,

    /// Original filename, used to label sources
    pub doc_name: String,

    /// Chunk index within the document
    pub chunk_index: i64,

    /// Hash of the chunk content
    pub chunk_hash: String,

    /// The chunk text itself; chunks are not stored anywhere else
    pub text: String,

    /// When this chunk was last updated
    pub updated_at: String,
}

impl ChunkPayload {
    /// Value of a payload field as a string, for filter matching
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "conversation_id" => Some(self.conversation_id.clone()),
            "doc_id" => Some(self.doc_id.clone()),
            "doc_name" => Some(self.doc_name.clone()),
            "chunk_index" => Some(self.chunk_index.to_string()),
            "chunk_hash" => Some(self.chunk_hash.clone()),
            _ => None,
        }
    }

    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();

        map.insert(
            "conversation_id".to_string(),
            string_to_qdrant(&self.conversation_id),
        );
        map.insert("doc_id".to_string(), string_to_qdrant(&self.doc_id));
        map.insert("doc_name".to_string(), string_to_qdrant(&self.doc_name));
        map.insert("chunk_index".to_string(), int_to_qdrant(self.chunk_index));
        map.insert("chunk_hash".to_string(), string_to_qdrant(&self.chunk_hash));
        map.insert("text".to_string(), string_to_qdrant(&self.text));
        map.insert("updated_at".to_string(), string_to_qdrant(&self.updated_at));

        map
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)),
    }
}

impl From<Map<String, Value>> for ChunkPayload {
    fn from(map: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::value::Kind;

    fn payload() -> ChunkPayload {
        ChunkPayload {
            conversation_id: "conv-1".to_string(),
            doc_id: "doc-1".to_string(),
            doc_name: "manual.pdf".to_string(),
            chunk_index: 4,
            chunk_hash: "h".to_string(),
            text: "Press the red button.".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_qdrant_payload_types() {
        let map = payload().to_qdrant_payload();
        assert!(matches!(
            map.get("chunk_index").and_then(|v| v.kind.clone()),
            Some(Kind::IntegerValue(4))
        ));
        assert!(matches!(
            map.get("doc_name").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue(ref s)) if s == "manual.pdf"
        ));
    }

    #[test]
    fn test_from_json_map() {
        let value = serde_json::to_value(payload()).unwrap();
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(ChunkPayload::from(map), payload());
    }

    #[test]
    fn test_point_id_is_stable_per_chunk() {
        assert_eq!(
            ChunkPoint::point_id("doc-1", 0),
            ChunkPoint::point_id("doc-1", 0)
        );
        assert_ne!(
            ChunkPoint::point_id("doc-1", 0),
            ChunkPoint::point_id("doc-1", 1)
        );
    }

    #[test]
    fn test_field_lookup() {
        let p = payload();
        assert_eq!(p.field("doc_id").as_deref(), Some("doc-1"));
        assert_eq!(p.field("chunk_index").as_deref(), Some("4"));
        assert_eq!(p.field("unknown"), None);
    }
}
