//! Startup recovery for jobs interrupted mid-processing.
//!
//! Runs once before the worker starts. Every status still `processing`
//! belonged to a worker that died; such jobs go back on the queue from their
//! recoverable copy or are failed when the copy is gone or unreadable.

use tracing::{error, info, warn};

use super::jobs::{JobRecord, JobState, DATA_CORRUPTED_ERROR, DATA_LOST_ERROR};
use super::JobQueue;
use crate::types::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: Vec<String>,
    pub failed: Vec<String>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

pub struct RecoveryManager {
    queue: JobQueue,
}

impl RecoveryManager {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    /// Scans job statuses and resolves every interrupted job. Only a failed
    /// scan aborts; per-job write failures are logged and the job is left
    /// `processing` for the next start.
    pub async fn run(&self) -> AppResult<RecoveryReport> {
        info!("Scanning for jobs interrupted by a restart");

        let mut report = RecoveryReport::default();
        let interrupted: Vec<(String, String)> = self
            .queue
            .status_entries()
            .await?
            .into_iter()
            .filter(|(_, status)| status.status == JobState::Processing)
            .map(|(job_id, status)| (job_id, status.user_id))
            .collect();

        for (job_id, user_id) in interrupted {
            match self.recover(&job_id, &user_id).await {
                Ok(true) => report.requeued.push(job_id),
                Ok(false) => report.failed.push(job_id),
                Err(e) => error!(job_id = %job_id, "Could not recover job: {}", e),
            }
        }

        if report.is_empty() {
            info!("No interrupted jobs found");
        } else {
            info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Recovery complete"
            );
        }
        Ok(report)
    }

    /// `true` when the job went back on the queue.
    async fn recover(&self, job_id: &str, user_id: &str) -> AppResult<bool> {
        let Some(raw) = self.queue.load_record(job_id).await? else {
            warn!(job_id = %job_id, "No recoverable copy for interrupted job");
            self.fail(job_id, user_id, DATA_LOST_ERROR).await?;
            return Ok(false);
        };

        let job = match JobRecord::decode(&raw) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, "Recoverable copy does not decode: {}", e);
                self.fail(job_id, user_id, DATA_CORRUPTED_ERROR).await?;
                return Ok(false);
            }
        };

        self.queue
            .update_status(job_id, &job.user_id, JobState::Pending, 0)
            .await?;
        self.queue.requeue_raw(&raw).await?;
        info!(job_id = %job_id, "Re-queued interrupted job");
        Ok(true)
    }

    async fn fail(&self, job_id: &str, user_id: &str, message: &str) -> AppResult<()> {
        self.queue
            .update_status(job_id, user_id, JobState::Failed, 100)
            .await?;
        self.queue.add_error(job_id, message).await?;
        self.queue.discard_record(job_id).await
    }
}
