use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{Document, DocumentStatus};
use crate::types::AppResult;

pub use operations::*;
pub use pool::*;

pub mod operations;
pub mod pool;

/// Persistence for document records created by ingestion.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: &Document) -> AppResult<()>;

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> AppResult<()>;

    async fn get(&self, user_id: &str, document_id: &str) -> AppResult<Option<Document>>;

    /// Newest first.
    async fn list(&self, user_id: &str) -> AppResult<Vec<Document>>;

    /// `false` when the user has no such document.
    async fn delete(&self, user_id: &str, document_id: &str) -> AppResult<bool>;
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document: &Document) -> AppResult<()> {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> AppResult<()> {
        if let Some(document) = self.documents.write().await.get_mut(document_id) {
            document.status = status;
        }
        Ok(())
    }

    async fn get(&self, user_id: &str, document_id: &str) -> AppResult<Option<Document>> {
        Ok(self
            .documents
            .read()
            .await
            .get(document_id)
            .filter(|d| d.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: &str) -> AppResult<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn delete(&self, user_id: &str, document_id: &str) -> AppResult<bool> {
        let mut documents = self.documents.write().await;
        if documents.get(document_id).is_some_and(|d| d.user_id == user_id) {
            documents.remove(document_id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;
    use chrono::{Duration, Utc};

    fn document(id: &str, user: &str, age_secs: i64) -> Document {
        Document {
            id: id.into(),
            user_id: user.into(),
            title: id.into(),
            source_type: SourceType::Notion,
            chunk_count: 1,
            uploaded_at: Utc::now() - Duration::seconds(age_secs),
            metadata: Default::default(),
            status: DocumentStatus::ProcessingChunks,
        }
    }

    #[tokio::test]
    async fn test_documents_are_scoped_to_owner() {
        let store = InMemoryDocumentStore::new();
        store.insert(&document("old", "u1", 60)).await.unwrap();
        store.insert(&document("new", "u1", 0)).await.unwrap();
        store.insert(&document("theirs", "u2", 0)).await.unwrap();

        let listed: Vec<String> = store.list("u1").await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(listed, vec!["new", "old"]);

        assert!(store.get("u1", "theirs").await.unwrap().is_none());
        assert!(!store.delete("u1", "theirs").await.unwrap());
        assert!(store.delete("u2", "theirs").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_status() {
        let store = InMemoryDocumentStore::new();
        store.insert(&document("d1", "u1", 0)).await.unwrap();
        store.set_status("d1", DocumentStatus::Completed).await.unwrap();

        let stored = store.get("u1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
    }
}
