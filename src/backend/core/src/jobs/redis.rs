//! Redis-backed queue backend.
//!
//! Per queue `q` under prefix `p`:
//!
//! - `p:q:ready` sorted set of job ids scored by `available_at` (ms)
//! - `p:q:inflight` sorted set of job ids scored by lease deadline (ms)
//! - `p:q:jobs` hash of job id to JSON envelope
//! - `p:q:attempts` hash of job id to delivery count
//!
//! The delivery count doubles as the lease token: ack, retry and discard carry
//! the `attempts` of their delivery and are refused once a later delivery exists.
//!
//! The dedupe key is the job id, so a key is held for as long as its hash
//! field exists, no matter which process enqueued it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

use super::queue::{EnqueueOutcome, QueueBackend, QueueStats, QueuedJob};
use crate::config::RedisConfig;
use crate::error::{MonitraError, Result};

const ENQUEUE: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return 1
"#;

const DEQUEUE: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[3], id)
    redis.call('ZADD', KEYS[2], ARGV[1], id)
end
while true do
    local ids = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 1)
    if #ids == 0 then
        return false
    end
    local id = ids[1]
    redis.call('ZREM', KEYS[2], id)
    local raw = redis.call('HGET', KEYS[1], id)
    if raw then
        local attempts = redis.call('HINCRBY', KEYS[4], id, 1)
        redis.call('ZADD', KEYS[3], ARGV[2], id)
        return {raw, attempts}
    end
end
"#;

const RETRY: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return 0
end
if redis.call('HGET', KEYS[4], ARGV[1]) ~= ARGV[3] then
    return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
return 1
"#;

const RELEASE: &str = r#"
if redis.call('HGET', KEYS[4], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
return 1
"#;

const CANCEL: &str = r#"
if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
    return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return 1
"#;

/// Redis-backed queue backend for production use.
pub struct RedisQueueBackend {
    conn: ConnectionManager,
    prefix: String,
    enqueue: Script,
    dequeue: Script,
    retry: Script,
    release: Script,
    cancel: Script,
}

struct Keys {
    ready: String,
    inflight: String,
    jobs: String,
    attempts: String,
}

impl RedisQueueBackend {
    /// Connect to Redis. The connection manager reconnects on its own.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn, &config.key_prefix))
    }

    pub fn with_connection(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
            enqueue: Script::new(ENQUEUE),
            dequeue: Script::new(DEQUEUE),
            retry: Script::new(RETRY),
            release: Script::new(RELEASE),
            cancel: Script::new(CANCEL),
        }
    }

    fn keys(&self, queue: &str) -> Keys {
        let base = format!("{}:{}", self.prefix, queue);
        Keys {
            ready: format!("{}:ready", base),
            inflight: format!("{}:inflight", base),
            jobs: format!("{}:jobs", base),
            attempts: format!("{}:attempts", base),
        }
    }

    /// Remove every trace of a job if `job` is its latest delivery.
    async fn release(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release
            .key(&keys.jobs)
            .key(&keys.ready)
            .key(&keys.inflight)
            .key(&keys.attempts)
            .arg(&job.id)
            .arg(job.attempts)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<EnqueueOutcome> {
        let keys = self.keys(queue);
        let serialized = serde_json::to_string(&job)?;

        let mut conn = self.conn.clone();
        let added: i64 = self
            .enqueue
            .key(&keys.jobs)
            .key(&keys.ready)
            .arg(&job.id)
            .arg(serialized)
            .arg(millis(job.available_at))
            .invoke_async(&mut conn)
            .await?;

        Ok(if added == 1 {
            EnqueueOutcome::Enqueued
        } else {
            EnqueueOutcome::Coalesced
        })
    }

    async fn dequeue(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> Result<Option<QueuedJob>> {
        let keys = self.keys(queue);
        let deadline = millis(now) + visibility.as_millis() as i64;

        let mut conn = self.conn.clone();
        let leased: Option<(String, u32)> = self
            .dequeue
            .key(&keys.jobs)
            .key(&keys.ready)
            .key(&keys.inflight)
            .key(&keys.attempts)
            .arg(millis(now))
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;

        match leased {
            Some((raw, attempts)) => {
                let mut job: QueuedJob = serde_json::from_str(&raw).map_err(|e| {
                    MonitraError::job_payload_invalid(queue, e.to_string())
                })?;
                job.attempts = attempts;
                tracing::debug!(queue = %queue, job_id = %job.id, attempt = attempts, "Job dequeued");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        self.release(queue, job).await
    }

    async fn retry(&self, queue: &str, job: &QueuedJob, available_at: DateTime<Utc>) -> Result<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .retry
            .key(&keys.jobs)
            .key(&keys.ready)
            .key(&keys.inflight)
            .key(&keys.attempts)
            .arg(&job.id)
            .arg(millis(available_at))
            .arg(job.attempts)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn discard(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        self.release(queue, job).await
    }

    async fn cancel(&self, queue: &str, key: &str) -> Result<bool> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .cancel
            .key(&keys.jobs)
            .key(&keys.ready)
            .key(&keys.attempts)
            .arg(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn stats(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueStats> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let (waiting, ready, in_flight): (usize, usize, usize) = redis::pipe()
            .zcard(&keys.ready)
            .zcount(&keys.ready, "-inf", millis(now))
            .zcard(&keys.inflight)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            ready,
            delayed: waiting.saturating_sub(ready),
            in_flight,
            dead_letter: 0,
        })
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let length: usize = redis::cmd("ZCARD")
            .arg(&keys.ready)
            .query_async(&mut conn)
            .await?;
        Ok(length)
    }
}
