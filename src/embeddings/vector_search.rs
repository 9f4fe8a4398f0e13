// Vector index seam and an in-process implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::{AppError, AppResult, SourceType};

/// Metadata stored next to every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub user_id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub created_at: i64,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl VectorRecord {
    pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
        format!("{}_{}", document_id, chunk_index)
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces by `record.id`.
    async fn upsert(&self, record: VectorRecord) -> AppResult<()>;

    /// Removes every chunk of a document; returns how many were removed.
    async fn delete_document(&self, user_id: &str, document_id: &str) -> AppResult<usize>;
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Sorted chunk ids stored for `user_id`.
    #[cfg(test)]
    pub async fn ids(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.metadata.user_id == user_id)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> AppResult<()> {
        if record.values.is_empty() {
            return Err(AppError::VectorIndex(format!("{} has an empty vector", record.id)));
        }
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_document(&self, user_id: &str, document_id: &str) -> AppResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.metadata.user_id == user_id && r.metadata.document_id == document_id));
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, doc: &str, index: usize, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: VectorRecord::chunk_id(doc, index),
            values,
            metadata: ChunkMetadata {
                user_id: user.into(),
                document_id: doc.into(),
                content: format!("chunk {}", index),
                chunk_index: index,
                created_at: 0,
                source_type: SourceType::Standard,
            },
        }
    }

    #[tokio::test]
    async fn test_records_are_kept_per_user() {
        let index = InMemoryVectorIndex::new();
        index.upsert(record("u1", "d1", 0, vec![1.0, 0.0])).await.unwrap();
        index.upsert(record("u1", "d1", 1, vec![0.0, 1.0])).await.unwrap();
        index.upsert(record("u2", "d2", 0, vec![1.0, 0.0])).await.unwrap();

        assert_eq!(index.ids("u1").await, vec!["d1_0", "d1_1"]);
        assert_eq!(index.ids("u2").await, vec!["d2_0"]);
    }

    #[tokio::test]
    async fn test_delete_document_only_touches_owner() {
        let index = InMemoryVectorIndex::new();
        index.upsert(record("u1", "d1", 0, vec![1.0])).await.unwrap();
        index.upsert(record("u1", "d1", 1, vec![1.0])).await.unwrap();
        index.upsert(record("u1", "d9", 0, vec![1.0])).await.unwrap();

        assert_eq!(index.delete_document("u2", "d1").await.unwrap(), 0);
        assert_eq!(index.delete_document("u1", "d1").await.unwrap(), 2);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let index = InMemoryVectorIndex::new();
        index.upsert(record("u1", "d1", 0, vec![1.0])).await.unwrap();
        index.upsert(record("u1", "d1", 0, vec![2.0])).await.unwrap();
        assert_eq!(index.len().await, 1);
        assert!(index.upsert(record("u1", "d1", 1, vec![])).await.is_err());
    }
}
