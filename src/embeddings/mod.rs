// Ingestion collaborators: extraction, embeddings, vector storage

pub mod document_processor;
pub mod openai;
pub mod vector_search;

pub use document_processor::*;
pub use openai::OpenAIEmbeddings;
pub use vector_search::*;

use async_trait::async_trait;
use std::sync::Arc;

use crate::db::DocumentStore;
use crate::types::AppResult;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}

/// Everything the worker delegates to while running a job.
#[derive(Clone)]
pub struct IngestionServices {
    pub extractor: Arc<dyn ContentExtractor>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vectors: Arc<dyn VectorIndex>,
    pub documents: Arc<dyn DocumentStore>,
}
