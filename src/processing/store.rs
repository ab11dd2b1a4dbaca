//! Vector store gateway: partition-scoped purge and insert.

use crate::processing::types::{EmbeddedChunk, EmbeddedRecord};
use crate::qdrant::{
    QdrantError,
    payload::{chunk_payload, current_timestamp_rfc3339, record_payload},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

/// Logical collection within the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Free-text chunks.
    Chunks,
    /// Structured JSON records.
    Records,
}

impl Partition {
    /// Both partitions, in purge order.
    pub const ALL: [Partition; 2] = [Partition::Chunks, Partition::Records];
}

/// Errors raised by vector store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Qdrant request failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Vector length does not match the collection.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store was configured with.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
}

/// Storage backend for embedded chunks and records, keyed by document identifier.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare collections and indexes. Called once at startup.
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Whether any entry for `document_id` exists in `partition`.
    async fn exists(&self, partition: Partition, document_id: &str) -> Result<bool, StoreError>;

    /// Remove every entry for `document_id` in `partition`.
    async fn delete_document(
        &self,
        partition: Partition,
        document_id: &str,
    ) -> Result<(), StoreError>;

    /// Delete prior entries when present. Returns whether anything was removed.
    async fn purge(&self, partition: Partition, document_id: &str) -> Result<bool, StoreError> {
        if !self.exists(partition, document_id).await? {
            return Ok(false);
        }
        self.delete_document(partition, document_id).await?;
        tracing::info!(?partition, document_id, "Purged existing entries");
        Ok(true)
    }

    /// Store one embedded chunk in the chunk partition.
    async fn insert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError>;

    /// Store a batch of embedded records in the record partition.
    async fn insert_many(&self, records: Vec<EmbeddedRecord>) -> Result<(), StoreError>;

    /// Cheap reachability check for health endpoints.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A stored point as seen by [`MemoryVectorStore`].
#[derive(Debug, Clone)]
pub struct StoredPoint {
    /// Partition the point lives in.
    pub partition: Partition,
    /// Document the point belongs to.
    pub document_id: String,
    /// Payload identical to what Qdrant would receive.
    pub payload: Value,
    /// Embedding vector.
    pub vector: Vec<f32>,
}

/// Process-local store used when no Qdrant URL is configured.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    points: Mutex<Vec<StoredPoint>>,
}

impl MemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points stored for `document_id` in `partition`.
    pub fn count(&self, partition: Partition, document_id: &str) -> usize {
        self.points
            .lock()
            .iter()
            .filter(|point| point.partition == partition && point.document_id == document_id)
            .count()
    }

    /// Snapshot of every point in `partition`, in insertion order.
    pub fn points(&self, partition: Partition) -> Vec<StoredPoint> {
        self.points
            .lock()
            .iter()
            .filter(|point| point.partition == partition)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn exists(&self, partition: Partition, document_id: &str) -> Result<bool, StoreError> {
        Ok(self.count(partition, document_id) > 0)
    }

    async fn delete_document(
        &self,
        partition: Partition,
        document_id: &str,
    ) -> Result<(), StoreError> {
        self.points
            .lock()
            .retain(|point| !(point.partition == partition && point.document_id == document_id));
        Ok(())
    }

    async fn insert(&self, chunk: EmbeddedChunk) -> Result<(), StoreError> {
        let payload = chunk_payload(&chunk.chunk, &current_timestamp_rfc3339());
        self.points.lock().push(StoredPoint {
            partition: Partition::Chunks,
            document_id: chunk.chunk.document_id,
            payload,
            vector: chunk.vector,
        });
        Ok(())
    }

    async fn insert_many(&self, records: Vec<EmbeddedRecord>) -> Result<(), StoreError> {
        let now = current_timestamp_rfc3339();
        let mut points = self.points.lock();
        for embedded in records {
            points.push(StoredPoint {
                partition: Partition::Records,
                payload: record_payload(&embedded.record, &now),
                document_id: embedded.record.document_id,
                vector: embedded.vector,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::types::{Chunk, StructuredRecord};
    use serde_json::{Map, json};

    fn embedded(document_id: &str, chunk_index: usize) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                document_id: document_id.into(),
                chunk_index,
                text: format!("chunk {chunk_index}"),
                tokenized_text: format!("chunk {chunk_index}"),
                page_number: None,
            },
            vector: vec![0.5, 0.5],
        }
    }

    #[tokio::test]
    async fn purge_only_touches_the_target_document() {
        let store = MemoryVectorStore::new();
        store.insert(embedded("a.txt", 0)).await.unwrap();
        store.insert(embedded("a.txt", 1)).await.unwrap();
        store.insert(embedded("b.txt", 0)).await.unwrap();

        assert!(store.purge(Partition::Chunks, "a.txt").await.unwrap());
        assert_eq!(store.count(Partition::Chunks, "a.txt"), 0);
        assert_eq!(store.count(Partition::Chunks, "b.txt"), 1);
    }

    #[tokio::test]
    async fn purge_of_unknown_document_is_a_no_op() {
        let store = MemoryVectorStore::new();
        assert!(!store.purge(Partition::Records, "missing.json").await.unwrap());
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let store = MemoryVectorStore::new();
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ada"));
        store
            .insert_many(vec![EmbeddedRecord {
                record: StructuredRecord {
                    document_id: "c.json".into(),
                    fields,
                },
                vector: vec![1.0],
            }])
            .await
            .unwrap();

        assert!(store.exists(Partition::Records, "c.json").await.unwrap());
        assert!(!store.exists(Partition::Chunks, "c.json").await.unwrap());
        assert_eq!(store.points(Partition::Records)[0].payload["name"], "Ada");
    }
}
