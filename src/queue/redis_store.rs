//! Redis-backed job store and work queue.
//!
//! Layout:
//! - `job_queue`: list, `LPUSH` on submit and `BRPOP` in the worker (FIFO)
//! - `job:<id>`: JSON status entry, `SET EX`
//! - `job:<id>:errors`: list, `RPUSH`, expiry refreshed on every append
//! - `persistent_job:<id>`: recoverable copy, `SET EX`

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::jobs::JobStatus;
use super::store::{keys, QueueBackend, RecordStore, WorkQueue};
use crate::types::AppResult;

#[derive(Clone)]
pub struct RedisStore {
    /// Regular commands.
    conn: ConnectionManager,
    /// `BRPOP` only. A blocking pop on the shared multiplexed connection would
    /// stall every other command behind it for the length of the timeout.
    blocking: ConnectionManager,
    queue_key: String,
}

impl RedisStore {
    pub async fn connect(url: &str, queue_key: impl Into<String>) -> AppResult<Self> {
        let queue_key = queue_key.into();
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let blocking = ConnectionManager::new(client).await?;

        let mut ping = conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut ping).await?;

        info!(queue_key = %queue_key, "Connected to Redis job store");

        Ok(Self {
            conn,
            blocking,
            queue_key,
        })
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn put_record(&self, job_id: &str, raw: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::record(job_id), raw, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get_record(&self, job_id: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(keys::record(job_id)).await?)
    }

    async fn delete_record(&self, job_id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys::record(job_id)).await?;
        Ok(())
    }

    async fn put_status(&self, job_id: &str, status: &JobStatus, ttl: Duration) -> AppResult<()> {
        let data = serde_json::to_string(status)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::status(job_id), data, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> AppResult<Option<JobStatus>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(keys::status(job_id)).await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn append_error(&self, job_id: &str, message: &str, ttl: Duration) -> AppResult<()> {
        let key = keys::errors(job_id);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, message)
            .ignore()
            .expire(&key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn errors(&self, job_id: &str) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(keys::errors(job_id), 0, -1).await?)
    }

    async fn status_entries(&self) -> AppResult<Vec<(String, JobStatus)>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", keys::STATUS_PREFIX);
        let found: Vec<String> = conn.keys(pattern).await?;

        let mut entries = Vec::new();
        for (key, job_id) in status_keys(&found) {
            // Expired between KEYS and GET.
            let Some(data) = conn.get::<_, Option<String>>(key).await? else {
                continue;
            };
            match serde_json::from_str::<JobStatus>(&data) {
                Ok(status) => entries.push((job_id.to_string(), status)),
                Err(e) => warn!(key = %key, "Skipping unreadable job status: {}", e),
            }
        }

        debug!(count = entries.len(), "Scanned job status entries");
        Ok(entries)
    }
}

#[async_trait]
impl WorkQueue for RedisStore {
    async fn push(&self, raw: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = push_cmd(&self.queue_key, raw).query_async(&mut conn).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> AppResult<Option<String>> {
        let mut conn = self.blocking.clone();
        let popped: Option<(String, String)> = pop_cmd(&self.queue_key, timeout)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, raw)| raw))
    }

    async fn len(&self) -> AppResult<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&self.queue_key).await?)
    }
}

impl QueueBackend for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Submitters push at the head and the worker pops from the tail.
fn push_cmd(queue_key: &str, raw: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("LPUSH");
    cmd.arg(queue_key).arg(raw);
    cmd
}

fn pop_cmd(queue_key: &str, timeout: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("BRPOP");
    cmd.arg(queue_key).arg(brpop_timeout_secs(timeout));
    cmd
}

/// Whole seconds, rounded up and never 0: `BRPOP key 0` blocks forever.
fn brpop_timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

/// `(key, job_id)` for every status key among a `job:*` scan.
fn status_keys(found: &[String]) -> Vec<(&str, &str)> {
    found
        .iter()
        .filter_map(|key| keys::job_id_from_status_key(key).map(|id| (key.as_str(), id)))
        .collect()
}
