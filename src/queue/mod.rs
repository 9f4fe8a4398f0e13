// Durable job queue: submission, status tracking, worker and startup recovery

pub mod jobs;
pub mod memory;
pub mod recovery;
pub mod redis_store;
pub mod store;
pub mod workers;

pub use jobs::*;
pub use memory::MemoryStore;
pub use recovery::{RecoveryManager, RecoveryReport};
pub use redis_store::RedisStore;
pub use store::{QueueBackend, RecordStore, WorkQueue};
pub use workers::{JobWorker, JobOutcome};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::types::{AppError, AppResult};

/// Submission and status API over a [`QueueBackend`].
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        Self { backend, config }
    }

    /// Queue backed by [`MemoryStore`] with default timings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), QueueConfig::default())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Accepts a job: recoverable copy (best-effort), `pending` status, then
    /// the append onto the shared list. Only the last two can fail the call.
    pub async fn submit(&self, job: &JobRecord) -> AppResult<()> {
        let raw = job.encode()?;

        if let Err(e) = self
            .backend
            .put_record(&job.job_id, &raw, self.config.record_ttl())
            .await
        {
            warn!(job_id = %job.job_id, "Could not store recoverable copy: {}", e);
        }

        self.update_status(&job.job_id, &job.user_id, JobState::Pending, 0)
            .await?;
        self.backend.push(&raw).await?;

        info!(
            job_id = %job.job_id,
            user_id = %job.user_id,
            source_type = %job.source_type,
            "Queued file for processing: {}",
            job.filename
        );
        Ok(())
    }

    /// Next serialized job in FIFO order, or `None` once `timeout` elapses.
    pub async fn dequeue(&self, timeout: Duration) -> AppResult<Option<String>> {
        self.backend.pop(timeout).await
    }

    /// Puts an already-serialized job back on the tail, byte for byte.
    pub async fn requeue_raw(&self, raw: &str) -> AppResult<()> {
        self.backend.push(raw).await
    }

    pub async fn depth(&self) -> AppResult<usize> {
        self.backend.len().await
    }

    pub async fn update_status(
        &self,
        job_id: &str,
        user_id: &str,
        state: JobState,
        progress: u8,
    ) -> AppResult<()> {
        let status = JobStatus::new(state, progress).owned_by(user_id);
        self.backend
            .put_status(job_id, &status, self.config.status_ttl())
            .await
    }

    pub async fn add_error(&self, job_id: &str, message: &str) -> AppResult<()> {
        self.backend
            .append_error(job_id, message, self.config.status_ttl())
            .await
    }

    /// Status and error log of a job owned by `user_id`. Another user's job
    /// is reported as not found.
    pub async fn get_status(&self, job_id: &str, user_id: &str) -> AppResult<JobStatusView> {
        let status = self
            .backend
            .get_status(job_id)
            .await?
            .filter(|status| status.is_visible_to(user_id))
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
        let errors = self.backend.errors(job_id).await?;

        Ok(JobStatusView {
            id: job_id.to_string(),
            user_id: if status.user_id.is_empty() {
                user_id.to_string()
            } else {
                status.user_id
            },
            status: status.status,
            progress: status.progress,
            errors,
            completed_at: status.completed_at,
        })
    }

    pub async fn errors(&self, job_id: &str) -> AppResult<Vec<String>> {
        self.backend.errors(job_id).await
    }

    pub async fn load_record(&self, job_id: &str) -> AppResult<Option<String>> {
        self.backend.get_record(job_id).await
    }

    pub async fn discard_record(&self, job_id: &str) -> AppResult<()> {
        self.backend.delete_record(job_id).await
    }

    pub(crate) async fn status_entries(&self) -> AppResult<Vec<(String, JobStatus)>> {
        self.backend.status_entries().await
    }
}
