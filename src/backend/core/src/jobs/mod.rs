//! Background job system for Monitra.
//!
//! - **Scheduler**: one recurring timer per active endpoint
//! - **Queue**: durable, deduplicated task queues with visibility leases
//! - **Worker**: bounded-concurrency consumers with retry and graceful shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            Check Pipeline                                    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │  Scheduler  │    │monitor-tasks│    │   Check     │    │notification-│  │
//! │  │  (timers)   │───▶│  (Redis/    │───▶│   Worker    │───▶│   tasks     │  │
//! │  │             │    │  memory)    │    │             │    │             │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │                                               │                  │         │
//! │                                               ▼                  ▼         │
//! │                                        ┌─────────────┐    ┌─────────────┐  │
//! │                                        │ Heartbeats  │    │ Notification│  │
//! │                                        │ + status    │    │   Worker    │  │
//! │                                        └─────────────┘    └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use monitra_core::jobs::{CheckScheduler, JobQueue, JobWorker, WorkerConfig, CHECK_QUEUE};
//!
//! let queue = Arc::new(JobQueue::in_memory(CHECK_QUEUE));
//! let scheduler = Arc::new(CheckScheduler::new(queue.clone(), clock));
//! scheduler.reconcile(&store.list_active_endpoints().await?).await?;
//!
//! let worker = JobWorker::new(WorkerConfig::default()).start(queue, handler);
//! ```

pub mod job;
pub mod queue;
pub mod redis;
pub mod scheduler;
pub mod worker;

pub use job::{BackoffStrategy, JobError, JobHandler, JobResult, RetryPolicy};
pub use queue::{
    DeadLetter, DeadLetterQueue, EnqueueOutcome, InMemoryQueueBackend, JobQueue, QueueBackend,
    QueueConfig, QueueStats, QueuedJob, CHECK_QUEUE, NOTIFICATION_QUEUE,
};
pub use self::redis::RedisQueueBackend;
pub use scheduler::{CheckScheduler, ReconcileReport, ScheduledCheck, TickReport};
pub use worker::{JobWorker, WorkerConfig, WorkerHandle, WorkerStats};
