//! Job worker: drains the work queue and drives each job through ingestion.
//!
//! Per job: `processing` + progress event, cancellation check, extraction,
//! document record + `document:created`, then every chunk in index order
//! (embed, upsert). The first failing chunk aborts the job. Both terminal
//! states drop the recoverable copy.

use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::{JobRecord, JobState};
use super::JobQueue;
use crate::embeddings::{ChunkMetadata, IngestionServices, VectorRecord};
use crate::events::EventEmitter;
use crate::models::{Document, DocumentStatus};
use crate::types::AppResult;

/// Pause after a failed dequeue before polling again.
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { document_id: String, chunks: usize },
    Failed { error: String },
    /// Cancelled before work started; the job is back on the queue.
    Requeued,
    /// Queue item that does not decode as a job.
    Discarded,
}

pub struct JobWorker {
    queue: JobQueue,
    services: IngestionServices,
    events: EventEmitter,
    cancel: CancellationToken,
}

impl JobWorker {
    pub fn new(
        queue: JobQueue,
        services: IngestionServices,
        events: EventEmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            services,
            events,
            cancel,
        }
    }

    /// Runs until the token is cancelled. Cancellation is observed between
    /// dequeues and right before a job starts, never mid-job.
    pub async fn run(&self) {
        let timeout = self.queue.config().dequeue_timeout();
        info!(
            backend = self.queue.backend_name(),
            timeout_secs = timeout.as_secs(),
            "Starting job queue processor"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // The pop is deliberately not raced against the token: a dropped
            // in-flight BRPOP can still remove an item on the server.
            match self.queue.dequeue(timeout).await {
                Ok(Some(raw)) => {
                    self.handle(raw).await;
                }
                Ok(None) => continue,
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    warn!("Failed to dequeue job: {}", e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(DEQUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Job queue processor shutting down");
    }

    /// Processes one serialized job taken off the queue.
    pub async fn handle(&self, raw: String) -> JobOutcome {
        let job = match JobRecord::decode(&raw) {
            Ok(job) => job,
            Err(e) => {
                error!("Discarding undecodable job: {}", e);
                return JobOutcome::Discarded;
            }
        };

        info!(
            job_id = %job.job_id,
            user_id = %job.user_id,
            source_type = %job.source_type,
            "Processing file: {}",
            job.filename
        );

        self.set_status(&job, JobState::Processing, 0).await;
        self.events
            .job_progress(&job.user_id, &job.job_id, 0, &JobState::Processing.to_string());

        if self.cancel.is_cancelled() {
            return self.requeue_cancelled(&job, &raw).await;
        }

        let outcome = match self.process(&job).await {
            Ok(document) => {
                info!(
                    job_id = %job.job_id,
                    document_id = %document.id,
                    chunks = document.chunk_count,
                    "Successfully processed file: {}",
                    job.filename
                );
                self.set_status(&job, JobState::Completed, 100).await;
                self.events.job_completed(&job.user_id, &job.job_id);
                JobOutcome::Completed {
                    document_id: document.id,
                    chunks: document.chunk_count,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job.job_id, "Failed to process file {}: {}", job.filename, message);
                self.set_status(&job, JobState::Failed, 100).await;
                if let Err(e) = self.queue.add_error(&job.job_id, &message).await {
                    warn!(job_id = %job.job_id, "Could not record job error: {}", e);
                }
                self.events.job_failed(&job.user_id, &job.job_id, &message);
                JobOutcome::Failed { error: message }
            }
        };

        if let Err(e) = self.queue.discard_record(&job.job_id).await {
            warn!(job_id = %job.job_id, "Could not delete recoverable copy: {}", e);
        }

        outcome
    }

    /// Puts the job back untouched. If that fails the status stays
    /// `processing` and startup recovery picks it up from its copy.
    async fn requeue_cancelled(&self, job: &JobRecord, raw: &str) -> JobOutcome {
        info!(job_id = %job.job_id, "Job processing cancelled before start, re-queuing");
        match self.queue.requeue_raw(raw).await {
            Ok(()) => self.set_status(job, JobState::Pending, 0).await,
            Err(e) => error!(job_id = %job.job_id, "Could not re-queue cancelled job: {}", e),
        }
        JobOutcome::Requeued
    }

    async fn process(&self, job: &JobRecord) -> AppResult<Document> {
        let extraction = self
            .services
            .extractor
            .extract(&job.payload, &job.filename, job.source_type)
            .await?;

        let total = extraction.chunks.len();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            user_id: job.user_id.clone(),
            title: extraction.title_or(&job.filename),
            source_type: job.source_type,
            chunk_count: total,
            uploaded_at: Utc::now(),
            metadata: extraction.metadata.clone(),
            status: DocumentStatus::ProcessingChunks,
        };

        self.services.documents.insert(&document).await?;
        info!(job_id = %job.job_id, document_id = %document.id, "Created document record");
        self.events.document_created(&job.user_id, &document);

        for (index, content) in extraction.chunks.iter().enumerate() {
            debug!(job_id = %job.job_id, chunk = index + 1, total, "Processing chunk");
            if let Err(e) = self.process_chunk(job, &document.id, index, content).await {
                warn!(
                    job_id = %job.job_id,
                    chunk = index + 1,
                    total,
                    "Chunk failed, aborting remaining chunks: {}",
                    e
                );
                return Err(e);
            }

            let progress = ((index + 1) * 100 / total).min(99) as u8;
            self.set_status(job, JobState::Processing, progress).await;
        }

        self.services
            .documents
            .set_status(&document.id, DocumentStatus::Completed)
            .await?;

        Ok(Document {
            status: DocumentStatus::Completed,
            ..document
        })
    }

    async fn process_chunk(
        &self,
        job: &JobRecord,
        document_id: &str,
        index: usize,
        content: &str,
    ) -> AppResult<()> {
        let values = self.services.embedder.embed(content).await?;

        let record = VectorRecord {
            id: VectorRecord::chunk_id(document_id, index),
            values,
            metadata: ChunkMetadata {
                user_id: job.user_id.clone(),
                document_id: document_id.to_string(),
                content: content.to_string(),
                chunk_index: index,
                created_at: Utc::now().timestamp(),
                source_type: job.source_type,
            },
        };

        self.services.vectors.upsert(record).await
    }

    async fn set_status(&self, job: &JobRecord, state: JobState, progress: u8) {
        if let Err(e) = self
            .queue
            .update_status(&job.job_id, &job.user_id, state, progress)
            .await
        {
            warn!(job_id = %job.job_id, status = %state, "Could not update job status: {}", e);
        }
    }
}
