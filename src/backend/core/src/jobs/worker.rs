//! Job worker for concurrent job execution.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::{JobHandler, JobQueue, QueuedJob};

/// Configuration for the job worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent job executions
    pub concurrency: usize,
    /// Poll interval for checking the queue (milliseconds)
    pub poll_interval_ms: u64,
    /// Lease length before an unacknowledged job is redelivered (seconds)
    pub visibility_timeout_secs: u64,
    /// Shutdown timeout (seconds)
    pub shutdown_timeout_secs: u64,
    /// Worker name/identifier
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 500,
            visibility_timeout_secs: 60,
            shutdown_timeout_secs: 30,
            name: "monitra-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Settings for the check worker pool.
    pub fn for_checks(settings: &crate::config::WorkerConfig) -> Self {
        Self {
            concurrency: settings.concurrency,
            poll_interval_ms: settings.poll_interval_ms,
            visibility_timeout_secs: settings.visibility_timeout_secs,
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
            name: "check-worker".to_string(),
        }
    }

    /// Settings for the notification dispatcher.
    pub fn for_notifications(
        settings: &crate::config::WorkerConfig,
        notifications: &crate::config::NotificationConfig,
    ) -> Self {
        Self {
            concurrency: notifications.concurrency,
            name: "notification-worker".to_string(),
            ..Self::for_checks(settings)
        }
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Total jobs processed
    pub processed: Arc<AtomicU64>,
    /// Total jobs succeeded
    pub succeeded: Arc<AtomicU64>,
    /// Total failed deliveries
    pub failed: Arc<AtomicU64>,
    /// Deliveries scheduled for retry
    pub retried: Arc<AtomicU64>,
    /// Jobs dropped after exhausting retries
    pub dead: Arc<AtomicU64>,
    /// Currently running jobs
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dead(&self) -> u64 {
        self.dead.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    stats: WorkerStats,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop leasing jobs.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Signal shutdown and wait for in-flight jobs (bounded by the shutdown timeout).
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.task.await {
            error!(error = %e, "Worker task panicked");
        }
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

/// Job worker that processes jobs from a queue.
pub struct JobWorker {
    config: WorkerConfig,
    stats: WorkerStats,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            stats: WorkerStats::new(),
        }
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self, queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let config = self.config;
        let worker_stats = stats.clone();

        let task = tokio::spawn(async move {
            let concurrency = config.concurrency.max(1);
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let poll_interval = Duration::from_millis(config.poll_interval_ms);
            let visibility = Duration::from_secs(config.visibility_timeout_secs);

            info!(
                worker = %config.name,
                queue = %queue.name(),
                concurrency,
                "Job worker started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let permit = tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                match queue.dequeue(visibility).await {
                    Ok(Some(job)) => {
                        let queue = queue.clone();
                        let handler = handler.clone();
                        let stats = worker_stats.clone();
                        let span = tracing::info_span!(
                            "job",
                            queue = %queue.name(),
                            job_id = %job.id,
                            attempt = job.attempts,
                        );
                        tokio::spawn(
                            async move {
                                process(&queue, handler.as_ref(), &stats, job).await;
                                drop(permit);
                            }
                            .instrument(span),
                        );
                    }
                    Ok(None) => {
                        drop(permit);
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        drop(permit);
                        e.log();
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            info!(worker = %config.name, "Worker shutting down");

            // Wait for in-flight jobs by taking every permit back.
            let drain = semaphore.acquire_many(concurrency as u32);
            let drained =
                tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), drain).await;
            match drained {
                Ok(_) => info!(worker = %config.name, "Worker stopped"),
                Err(_) => warn!(
                    worker = %config.name,
                    active = worker_stats.active(),
                    "Shutdown timeout elapsed with jobs still running; they will be redelivered"
                ),
            };
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats,
            task,
        }
    }
}

async fn process(queue: &JobQueue, handler: &dyn JobHandler, stats: &WorkerStats, job: QueuedJob) {
    stats.active.fetch_add(1, Ordering::Relaxed);
    let result = handler.handle(&job).await;
    stats.active.fetch_sub(1, Ordering::Relaxed);
    stats.processed.fetch_add(1, Ordering::Relaxed);

    match result {
        Ok(()) => {
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = queue.ack(&job).await {
                e.log();
            }
            debug!(handler = handler.name(), "Job completed");
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            let policy = handler.retry_policy();
            if policy.should_retry(job.attempts, &err) {
                let delay = policy.next_retry_delay(job.attempts);
                stats.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    handler = handler.name(),
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Job failed, scheduling retry"
                );
                if let Err(e) = queue.retry(&job, delay).await {
                    e.log();
                }
            } else {
                stats.dead.fetch_add(1, Ordering::Relaxed);
                error!(
                    handler = handler.name(),
                    error = %err,
                    attempts = job.attempts,
                    "Job failed permanently, moved to dead letter"
                );
                if let Err(e) = queue.discard(&job, err.to_string()).await {
                    e.log();
                }
            }
        }
    }
}
