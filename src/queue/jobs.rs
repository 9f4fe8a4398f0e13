// Job records and status entries stored alongside the work queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SourceType;

/// Error appended to a job whose recoverable copy is gone at startup.
pub const DATA_LOST_ERROR: &str = "Job data lost during server restart";

/// Error appended when the recoverable copy exists but no longer decodes.
pub const DATA_CORRUPTED_ERROR: &str = "Job data corrupted before restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// The recoverable copy of a submission. This is also the exact form pushed
/// onto the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: String,
    pub filename: String,
    pub source_type: SourceType,
    #[serde(rename = "file_data", with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub status: JobState,
}

impl JobRecord {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        filename: impl Into<String>,
        source_type: SourceType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            filename: filename.into(),
            source_type,
            payload,
            created_at: Utc::now(),
            status: JobState::Pending,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Status-tracking entry, kept apart from the recoverable copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Submitting user. Empty on entries written without an owner.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
}

impl JobStatus {
    /// `completed_at` is stamped only for terminal states.
    pub fn new(status: JobState, progress: u8) -> Self {
        Self {
            status,
            progress: progress.min(100),
            completed_at: status.is_terminal().then(Utc::now),
            user_id: String::new(),
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Ownerless entries are readable by any authenticated user.
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.user_id.is_empty() || self.user_id == user_id
    }
}

/// Point-in-time answer to a status query.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub id: String,
    pub user_id: String,
    pub status: JobState,
    pub progress: u8,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_shape() {
        let record = JobRecord::new("j1", "u1", "notes.md", SourceType::Obsidian, b"# Hi".to_vec());
        let value: serde_json::Value = serde_json::from_str(&record.encode().unwrap()).unwrap();

        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["source_type"], "obsidian");
        assert_eq!(value["file_data"], "IyBIaQ==");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_decode_rejects_bad_payload_encoding() {
        let raw = r#"{"job_id":"j1","user_id":"u1","filename":"a","source_type":"roam",
            "file_data":"!!not base64!!","created_at":"2024-01-01T00:00:00Z","status":"pending"}"#;
        assert!(JobRecord::decode(raw).is_err());
    }

    #[test]
    fn test_status_completed_at_only_on_terminal() {
        assert!(JobStatus::new(JobState::Processing, 0).completed_at.is_none());
        assert!(JobStatus::new(JobState::Pending, 0).completed_at.is_none());
        assert!(JobStatus::new(JobState::Completed, 100).completed_at.is_some());
        assert!(JobStatus::new(JobState::Failed, 100).completed_at.is_some());
        assert_eq!(JobStatus::new(JobState::Processing, 250).progress, 100);
    }

    #[test]
    fn test_status_owner_round_trip_and_visibility() {
        let owned = JobStatus::new(JobState::Pending, 0).owned_by("u1");
        let raw = serde_json::to_string(&owned).unwrap();
        assert_eq!(serde_json::from_str::<JobStatus>(&raw).unwrap(), owned);
        assert!(owned.is_visible_to("u1"));
        assert!(!owned.is_visible_to("u2"));

        let legacy: JobStatus = serde_json::from_str(r#"{"status":"processing","progress":5}"#).unwrap();
        assert!(legacy.user_id.is_empty());
        assert!(legacy.is_visible_to("anyone"));
    }
}
