//! Storage seams for the work queue.
//!
//! `RecordStore` holds the per-job entries (recoverable copy, status, error
//! log) and `WorkQueue` is the single FIFO list shared by submitters and
//! workers. Both are implemented by [`RedisStore`](super::redis_store::RedisStore)
//! for production and [`MemoryStore`](super::memory::MemoryStore) for
//! single-process runs and tests.

use async_trait::async_trait;
use std::time::Duration;

use super::jobs::JobStatus;
use crate::types::AppResult;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Overwrites any previous copy for the job.
    async fn put_record(&self, job_id: &str, raw: &str, ttl: Duration) -> AppResult<()>;

    async fn get_record(&self, job_id: &str) -> AppResult<Option<String>>;

    async fn delete_record(&self, job_id: &str) -> AppResult<()>;

    async fn put_status(&self, job_id: &str, status: &JobStatus, ttl: Duration) -> AppResult<()>;

    async fn get_status(&self, job_id: &str) -> AppResult<Option<JobStatus>>;

    /// Appends to the job's error log and refreshes its expiry to `ttl`.
    async fn append_error(&self, job_id: &str, message: &str, ttl: Duration) -> AppResult<()>;

    /// Error log in append order.
    async fn errors(&self, job_id: &str) -> AppResult<Vec<String>>;

    /// Every live status entry. Linear in the number of tracked jobs.
    async fn status_entries(&self) -> AppResult<Vec<(String, JobStatus)>>;
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends to the tail.
    async fn push(&self, raw: &str) -> AppResult<()>;

    /// Removes the head, waiting at most `timeout`. `Ok(None)` on timeout.
    async fn pop(&self, timeout: Duration) -> AppResult<Option<String>>;

    async fn len(&self) -> AppResult<usize>;
}

/// A backend that provides both halves.
pub trait QueueBackend: RecordStore + WorkQueue {
    fn backend_name(&self) -> &'static str;
}

/// Key layout shared by every backend that speaks in string keys.
pub mod keys {
    pub const STATUS_PREFIX: &str = "job:";
    pub const ERRORS_SUFFIX: &str = ":errors";
    pub const RECORD_PREFIX: &str = "persistent_job:";

    pub fn status(job_id: &str) -> String {
        format!("{}{}", STATUS_PREFIX, job_id)
    }

    pub fn errors(job_id: &str) -> String {
        format!("{}{}{}", STATUS_PREFIX, job_id, ERRORS_SUFFIX)
    }

    pub fn record(job_id: &str) -> String {
        format!("{}{}", RECORD_PREFIX, job_id)
    }

    /// Maps a `job:*` key back to its job id, skipping error-log keys.
    pub fn job_id_from_status_key(key: &str) -> Option<&str> {
        if key.ends_with(ERRORS_SUFFIX) {
            return None;
        }
        key.strip_prefix(STATUS_PREFIX).filter(|id| !id.is_empty())
    }
}
