// Domain events -> hub messages

use chrono::Utc;
use serde_json::json;

use super::hub::EventHub;
use crate::models::Document;

pub const DOCUMENT_CREATED: &str = "document:created";
pub const DOCUMENT_DELETED: &str = "document:deleted";
pub const DOCUMENTS_UPDATED: &str = "documents:updated";
pub const JOB_PROGRESS: &str = "job-progress";
pub const JOB_COMPLETED: &str = "job-completed";
pub const JOB_FAILED: &str = "job-failed";

#[derive(Clone)]
pub struct EventEmitter {
    hub: EventHub,
}

impl EventEmitter {
    pub fn new(hub: EventHub) -> Self {
        Self { hub }
    }

    pub fn document_created(&self, user_id: &str, document: &Document) {
        self.hub.send_to_user(
            user_id,
            DOCUMENT_CREATED,
            json!({
                "document": document,
                "timestamp": Utc::now().timestamp(),
            }),
        );
    }

    pub fn document_deleted(&self, user_id: &str, document_id: &str) {
        self.hub.send_to_user(
            user_id,
            DOCUMENT_DELETED,
            json!({
                "document_id": document_id,
                "timestamp": Utc::now().timestamp(),
            }),
        );
    }

    pub fn documents_updated(&self, user_id: &str, documents: &[Document]) {
        self.hub.send_to_user(
            user_id,
            DOCUMENTS_UPDATED,
            json!({
                "documents": documents,
                "timestamp": Utc::now().timestamp(),
            }),
        );
    }

    pub fn job_progress(&self, user_id: &str, job_id: &str, progress: u8, status: &str) {
        self.hub.send_to_user(
            user_id,
            JOB_PROGRESS,
            json!({
                "job_id": job_id,
                "progress": progress,
                "status": status,
                "timestamp": Utc::now().timestamp(),
            }),
        );
    }

    pub fn job_completed(&self, user_id: &str, job_id: &str) {
        self.hub.send_to_user(
            user_id,
            JOB_COMPLETED,
            json!({
                "job_id": job_id,
                "timestamp": Utc::now().timestamp(),
            }),
        );
    }

    pub fn job_failed(&self, user_id: &str, job_id: &str, error: &str) {
        self.hub.send_to_user(
            user_id,
            JOB_FAILED,
            json!({
                "job_id": job_id,
                "error": error,
                "timestamp": Utc::now().timestamp(),
            }),
        );
    }
}
