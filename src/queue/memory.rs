//! In-process job store and work queue.
//!
//! Same contract as the Redis backend minus durability: everything is lost
//! when the process exits. Expired entries are dropped lazily on access.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::jobs::JobStatus;
use super::store::{QueueBackend, RecordStore, WorkQueue};
use crate::types::AppResult;

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct State {
    records: HashMap<String, Expiring<String>>,
    statuses: HashMap<String, Expiring<JobStatus>>,
    errors: HashMap<String, Expiring<Vec<String>>>,
    queue: VecDeque<String>,
}

fn live<'a, T>(map: &'a mut HashMap<String, Expiring<T>>, key: &str) -> Option<&'a mut Expiring<T>> {
    let now = Instant::now();
    if map.get(key).is_some_and(|e| !e.is_live(now)) {
        map.remove(key);
    }
    map.get_mut(key)
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put_record(&self, job_id: &str, raw: &str, ttl: Duration) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state
            .records
            .insert(job_id.to_string(), Expiring::new(raw.to_string(), ttl));
        Ok(())
    }

    async fn get_record(&self, job_id: &str) -> AppResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(live(&mut state.records, job_id).map(|e| e.value.clone()))
    }

    async fn delete_record(&self, job_id: &str) -> AppResult<()> {
        self.state.lock().await.records.remove(job_id);
        Ok(())
    }

    async fn put_status(&self, job_id: &str, status: &JobStatus, ttl: Duration) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state
            .statuses
            .insert(job_id.to_string(), Expiring::new(status.clone(), ttl));
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> AppResult<Option<JobStatus>> {
        let mut state = self.state.lock().await;
        Ok(live(&mut state.statuses, job_id).map(|e| e.value.clone()))
    }

    async fn append_error(&self, job_id: &str, message: &str, ttl: Duration) -> AppResult<()> {
        let mut state = self.state.lock().await;
        match live(&mut state.errors, job_id) {
            Some(entry) => {
                entry.value.push(message.to_string());
                entry.expires_at = Instant::now() + ttl;
            }
            None => {
                state
                    .errors
                    .insert(job_id.to_string(), Expiring::new(vec![message.to_string()], ttl));
            }
        }
        Ok(())
    }

    async fn errors(&self, job_id: &str) -> AppResult<Vec<String>> {
        let mut state = self.state.lock().await;
        Ok(live(&mut state.errors, job_id)
            .map(|e| e.value.clone())
            .unwrap_or_default())
    }

    async fn status_entries(&self) -> AppResult<Vec<(String, JobStatus)>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.statuses.retain(|_, e| e.is_live(now));
        Ok(state
            .statuses
            .iter()
            .map(|(id, e)| (id.clone(), e.value.clone()))
            .collect())
    }
}

#[async_trait]
impl WorkQueue for MemoryStore {
    async fn push(&self, raw: &str) -> AppResult<()> {
        self.state.lock().await.queue.push_back(raw.to_string());
        self.pushed.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> AppResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(raw) = self.state.lock().await.queue.pop_front() {
                return Ok(Some(raw));
            }
            // notify_one leaves a permit when nobody is waiting, so a push
            // landing between the check above and this await is not lost.
            if tokio::time::timeout_at(deadline, self.pushed.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> AppResult<usize> {
        Ok(self.state.lock().await.queue.len())
    }
}

impl QueueBackend for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
