//! Job queue with dedupe, visibility leases and dead letter handling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::clock::{SharedClock, SystemClock};
use crate::error::{MonitraError, Result};

/// Queue consumed by the check workers.
pub const CHECK_QUEUE: &str = "monitor-tasks";

/// Queue consumed by the notification dispatcher.
pub const NOTIFICATION_QUEUE: &str = "notification-tasks";

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum items in the dead letter queue
    pub dead_letter_max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dead_letter_max_size: 1000,
        }
    }
}

/// A job in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Equal to the dedupe key when one is set
    pub id: String,
    /// Serialized job data
    pub payload: serde_json::Value,
    /// Deliveries so far, including the current one. Also the lease token:
    /// only the holder of the latest delivery may ack, retry or discard.
    pub attempts: u32,
    /// When the job was first enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Not delivered before this instant
    pub available_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
}

impl QueuedJob {
    pub fn new(payload: serde_json::Value, dedupe_key: Option<String>, now: DateTime<Utc>) -> Self {
        let id = dedupe_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            payload,
            attempts: 0,
            enqueued_at: now,
            available_at: now,
            dedupe_key,
        }
    }

    /// Decode the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Whether an enqueue added a job or was absorbed by an outstanding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Coalesced,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs deliverable now
    pub ready: usize,
    /// Jobs waiting for their `available_at`
    pub delayed: usize,
    /// Jobs leased to a worker
    pub in_flight: usize,
    /// Number of dead letter jobs
    pub dead_letter: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dead Letter Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// A job dropped after its retries were exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: QueuedJob,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Bounded buffer of dropped jobs, oldest evicted first.
#[derive(Debug)]
pub struct DeadLetterQueue {
    jobs: VecDeque<DeadLetter>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, entry: DeadLetter) {
        if self.max_size == 0 {
            return;
        }
        if self.jobs.len() >= self.max_size {
            self.jobs.pop_front();
        }
        self.jobs.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.jobs.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<DeadLetter> {
        self.jobs.drain(..).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage for named queues.
///
/// A job carrying a dedupe key holds that key from enqueue until it is acked,
/// discarded or cancelled; enqueues in between are coalesced.
///
/// `ack`, `retry` and `discard` take effect only for the latest delivery of a
/// job (matching `attempts`). A worker whose lease expired and was handed to
/// another worker gets `false` and changes nothing.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Add a job, or coalesce it into an outstanding job with the same key.
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<EnqueueOutcome>;

    /// Lease the earliest available job until `now + visibility`.
    ///
    /// Leases that expired before `now` are returned to the ready set first.
    async fn dequeue(&self, queue: &str, now: DateTime<Utc>, visibility: Duration)
        -> Result<Option<QueuedJob>>;

    /// Remove a completed job and release its key.
    async fn ack(&self, queue: &str, job: &QueuedJob) -> Result<bool>;

    /// Return a leased job to the ready set, deliverable from `available_at`.
    async fn retry(&self, queue: &str, job: &QueuedJob, available_at: DateTime<Utc>)
        -> Result<bool>;

    /// Drop a job whose retries are exhausted and release its key.
    async fn discard(&self, queue: &str, job: &QueuedJob) -> Result<bool>;

    /// Remove a job that is waiting (not leased). Returns whether one was removed.
    async fn cancel(&self, queue: &str, key: &str) -> Result<bool>;

    /// Get queue statistics.
    async fn stats(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueStats>;

    /// Jobs waiting for delivery, ready or delayed.
    async fn len(&self, queue: &str) -> Result<usize>;

    /// Check if the queue is empty.
    async fn is_empty(&self, queue: &str) -> Result<bool> {
        Ok(self.len(queue).await? == 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting { seq: u64 },
    Leased { until: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, (QueuedJob, Slot)>,
    seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Whether `job` is the latest delivery of a stored job.
    fn holds_lease(&self, job: &QueuedJob) -> bool {
        self.jobs
            .get(&job.id)
            .is_some_and(|(stored, _)| stored.attempts == job.attempts)
    }
}

/// In-memory queue backend for tests and single-process runs.
pub struct InMemoryQueueBackend {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<EnqueueOutcome> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        if state.jobs.contains_key(&job.id) {
            return Ok(EnqueueOutcome::Coalesced);
        }
        let seq = state.next_seq();
        state.jobs.insert(job.id.clone(), (job, Slot::Waiting { seq }));
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> Result<Option<QueuedJob>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let expired: Vec<String> = state
            .jobs
            .iter()
            .filter(|(_, (_, slot))| matches!(slot, Slot::Leased { until } if *until <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            let seq = state.next_seq();
            if let Some((_, slot)) = state.jobs.get_mut(&id) {
                *slot = Slot::Waiting { seq };
            }
        }

        let next = state
            .jobs
            .iter()
            .filter_map(|(id, (job, slot))| match slot {
                Slot::Waiting { seq } if job.available_at <= now => Some((job.available_at, *seq, id)),
                _ => None,
            })
            .min()
            .map(|(_, _, id)| id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let lease = chrono::Duration::from_std(visibility)
            .map_err(|e| MonitraError::internal(format!("Invalid visibility timeout: {}", e)))?;
        Ok(state.jobs.get_mut(&id).map(|(job, slot)| {
            job.attempts += 1;
            *slot = Slot::Leased { until: now + lease };
            job.clone()
        }))
    }

    async fn ack(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(false);
        };
        if !state.holds_lease(job) {
            return Ok(false);
        }
        state.jobs.remove(&job.id);
        Ok(true)
    }

    async fn retry(&self, queue: &str, job: &QueuedJob, available_at: DateTime<Utc>) -> Result<bool> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(false);
        };
        if !state.holds_lease(job) {
            return Ok(false);
        }
        let seq = state.next_seq();
        if let Some((stored, slot)) = state.jobs.get_mut(&job.id) {
            stored.available_at = available_at;
            *slot = Slot::Waiting { seq };
        }
        Ok(true)
    }

    async fn discard(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        self.ack(queue, job).await
    }

    async fn cancel(&self, queue: &str, key: &str) -> Result<bool> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(false);
        };
        match state.jobs.get(key) {
            Some((_, Slot::Waiting { .. })) => {
                state.jobs.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stats(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueStats> {
        let queues = self.queues.lock().await;
        let mut stats = QueueStats::default();
        if let Some(state) = queues.get(queue) {
            for (job, slot) in state.jobs.values() {
                match slot {
                    Slot::Leased { .. } => stats.in_flight += 1,
                    Slot::Waiting { .. } if job.available_at <= now => stats.ready += 1,
                    Slot::Waiting { .. } => stats.delayed += 1,
                }
            }
        }
        Ok(stats)
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, |state| {
            state
                .jobs
                .values()
                .filter(|(_, slot)| matches!(slot, Slot::Waiting { .. }))
                .count()
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// A named queue on a shared backend.
pub struct JobQueue {
    name: String,
    backend: Arc<dyn QueueBackend>,
    dead_letter: Arc<RwLock<DeadLetterQueue>>,
    clock: SharedClock,
}

impl JobQueue {
    /// Create a new job queue with the given backend.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn QueueBackend>,
        config: QueueConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            dead_letter: Arc::new(RwLock::new(DeadLetterQueue::new(config.dead_letter_max_size))),
            clock,
        }
    }

    /// Create a new in-memory job queue (for testing).
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::new(InMemoryQueueBackend::new()),
            QueueConfig::default(),
            Arc::new(SystemClock),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Serialize and enqueue a payload.
    pub async fn enqueue<T: Serialize + Sync>(
        &self,
        payload: &T,
        dedupe_key: Option<String>,
    ) -> Result<EnqueueOutcome> {
        let job = QueuedJob::new(serde_json::to_value(payload)?, dedupe_key, self.clock.now());
        let job_id = job.id.clone();
        let outcome = self.backend.enqueue(&self.name, job).await?;

        match outcome {
            EnqueueOutcome::Enqueued => {
                counter!("monitra_tasks_enqueued_total", "queue" => self.name.clone()).increment(1);
                tracing::debug!(queue = %self.name, job_id = %job_id, "Job enqueued");
            }
            EnqueueOutcome::Coalesced => {
                counter!("monitra_tasks_coalesced_total", "queue" => self.name.clone()).increment(1);
                tracing::debug!(queue = %self.name, job_id = %job_id, "Job coalesced into outstanding job");
            }
        }
        Ok(outcome)
    }

    /// Lease the next job.
    pub async fn dequeue(&self, visibility: Duration) -> Result<Option<QueuedJob>> {
        self.backend
            .dequeue(&self.name, self.clock.now(), visibility)
            .await
    }

    /// Complete a delivery. Returns false when the lease had passed to another delivery.
    pub async fn ack(&self, job: &QueuedJob) -> Result<bool> {
        let held = self.backend.ack(&self.name, job).await?;
        if !held {
            self.stale_lease(job, "ack");
        }
        Ok(held)
    }

    /// Redeliver after `delay`.
    pub async fn retry(&self, job: &QueuedJob, delay: Duration) -> Result<bool> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| MonitraError::internal(format!("Invalid retry delay: {}", e)))?;
        let held = self
            .backend
            .retry(&self.name, job, self.clock.now() + delay)
            .await?;
        if held {
            counter!("monitra_jobs_retried_total", "queue" => self.name.clone()).increment(1);
        } else {
            self.stale_lease(job, "retry");
        }
        Ok(held)
    }

    /// Drop a job and keep it in the dead letter buffer.
    pub async fn discard(&self, job: &QueuedJob, error: impl Into<String>) -> Result<bool> {
        let held = self.backend.discard(&self.name, job).await?;
        if !held {
            self.stale_lease(job, "discard");
            return Ok(false);
        }
        counter!("monitra_jobs_dead_total", "queue" => self.name.clone()).increment(1);
        self.dead_letter.write().await.push(DeadLetter {
            job: job.clone(),
            error: error.into(),
            failed_at: self.clock.now(),
        });
        Ok(true)
    }

    fn stale_lease(&self, job: &QueuedJob, action: &'static str) {
        counter!("monitra_stale_leases_total", "queue" => self.name.clone()).increment(1);
        tracing::warn!(
            queue = %self.name,
            job_id = %job.id,
            attempt = job.attempts,
            action,
            "Lease no longer held, job left to its current delivery"
        );
    }

    /// Remove a waiting job by key.
    pub async fn cancel(&self, key: &str) -> Result<bool> {
        let removed = self.backend.cancel(&self.name, key).await?;
        if removed {
            tracing::debug!(queue = %self.name, job_id = key, "Queued job cancelled");
        }
        Ok(removed)
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len(&self.name).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.backend.is_empty(&self.name).await
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = self.backend.stats(&self.name, self.clock.now()).await?;
        stats.dead_letter = self.dead_letter.read().await.len();
        Ok(stats)
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letter.read().await.snapshot()
    }
}
