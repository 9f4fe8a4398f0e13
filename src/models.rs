use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::db::DocumentStore;
use crate::embeddings::VectorIndex;
use crate::events::{EventEmitter, EventHub};
use crate::queue::JobQueue;
use crate::types::SourceType;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub queue: JobQueue,
    pub hub: EventHub,
    pub events: EventEmitter,
    pub documents: Arc<dyn DocumentStore>,
    pub vectors: Arc<dyn VectorIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    ProcessingChunks,
    Completed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::ProcessingChunks => "processing_chunks",
            DocumentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing_chunks" => Some(DocumentStatus::ProcessingChunks),
            "completed" => Some(DocumentStatus::Completed),
            _ => None,
        }
    }
}

/// Imported document. Its chunks live in the vector index under
/// `<id>_<chunk_index>`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub source_type: SourceType,
    pub chunk_count: usize,
    pub uploaded_at: DateTime<Utc>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: DocumentStatus,
}

// API Request/Response types

#[derive(Debug, serde::Serialize)]
pub struct UploadResponse {
    pub job_ids: Vec<String>,
    pub status: String,
    pub files_received: usize,
    pub estimated_time_seconds: usize,
    /// Files that could not be queued. The rest of the upload still stands.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<RejectedFile>,
}

#[derive(Debug, serde::Serialize)]
pub struct RejectedFile {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, serde::Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub queue_backend: String,
    pub queue_depth: Option<usize>,
    pub connected_users: usize,
    pub connections: usize,
}
