#![allow(clippy::result_large_err)]
//! # Monitra Core
//!
//! Scheduled reachability checks for user-registered endpoints, with an
//! immutable heartbeat log and alerts on every up/down status change.
//!
//! ## Architecture
//!
//! - **Scheduler**: one recurring timer per active endpoint, rebuilt from the store by reconcile
//! - **Queues**: deduplicated, leased task queues (in-memory or Redis)
//! - **Workers**: bounded pools running check and notification handlers
//! - **Probes**: HTTP, TCP port and ICMP ping checks under a hard timeout
//! - **Transitions**: pure status-change detection
//! - **Notifications**: templated alert mail through a pluggable transport
//! - **Telemetry**: structured logging, Prometheus metrics and OTLP traces

pub mod checks;
pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod model;
pub mod notifications;
pub mod probe;
pub mod recorder;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod transition;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, MonitraError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checks::{CheckHandler, CheckOutcome};
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, MonitraError, Result};
    pub use crate::jobs::{
        CheckScheduler, InMemoryQueueBackend, JobHandler, JobQueue, JobWorker, QueueBackend,
        RedisQueueBackend, WorkerConfig, WorkerHandle, CHECK_QUEUE, NOTIFICATION_QUEUE,
    };
    pub use crate::model::{
        CheckKind, CheckTask, Endpoint, EndpointId, EndpointStatus, Heartbeat, NewEndpoint,
        Outcome, TransitionEvent, UserId,
    };
    pub use crate::notifications::{MailMessage, MailTransport, NotificationHandler};
    pub use crate::probe::{Probe, ProbeExecutor, ProbeResult, ProbeTarget};
    pub use crate::recorder::HeartbeatRecorder;
    pub use crate::service::MonitorService;
    pub use crate::store::{InMemoryStore, MonitorStore, PgStore};
    pub use crate::transition::{detect, Detection};
}
