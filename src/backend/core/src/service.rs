//! Caller-facing endpoint operations.
//!
//! Every operation that changes whether an endpoint is schedulable updates the
//! store first and the scheduler second, so a crash in between is repaired by
//! the next reconcile.

use std::sync::Arc;
use tracing::info;

use crate::clock::SharedClock;
use crate::config::{ChecksConfig, Config};
use crate::error::{MonitraError, Result};
use crate::jobs::{
    CheckScheduler, InMemoryQueueBackend, JobQueue, QueueBackend, QueueConfig, RedisQueueBackend,
};
use crate::model::{Endpoint, EndpointId, EndpointStatus, Heartbeat, NewEndpoint, UserId};
use crate::recorder::HeartbeatRecorder;
use crate::store::{InMemoryStore, MonitorStore, PgStore};
use crate::telemetry::redact_url;

/// The store and queue transport a process runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn MonitorStore>,
    pub queues: Arc<dyn QueueBackend>,
    pub clock: SharedClock,
}

impl Backends {
    /// PostgreSQL (migrated) and Redis.
    pub async fn connect(config: &Config, clock: SharedClock) -> Result<Self> {
        let store = PgStore::connect(&config.database).await?;
        store.migrate().await?;
        info!(url = %redact_url(&config.database.url), "Connected to database");

        let queues = RedisQueueBackend::connect(&config.redis).await?;
        info!(url = %redact_url(&config.redis.url), prefix = %config.redis.key_prefix, "Connected to Redis");

        Ok(Self {
            store: Arc::new(store),
            queues: Arc::new(queues),
            clock,
        })
    }

    /// Single-process backends; nothing survives a restart.
    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            store: Arc::new(InMemoryStore::with_clock(clock.clone())),
            queues: Arc::new(InMemoryQueueBackend::new()),
            clock,
        }
    }

    pub fn queue(&self, name: &str) -> Arc<JobQueue> {
        Arc::new(JobQueue::new(
            name,
            self.queues.clone(),
            QueueConfig::default(),
            self.clock.clone(),
        ))
    }
}

pub struct MonitorService {
    store: Arc<dyn MonitorStore>,
    recorder: HeartbeatRecorder,
    scheduler: Arc<CheckScheduler>,
    checks: ChecksConfig,
    clock: SharedClock,
}

impl MonitorService {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        scheduler: Arc<CheckScheduler>,
        checks: ChecksConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            recorder: HeartbeatRecorder::new(store.clone()),
            store,
            scheduler,
            checks,
            clock,
        }
    }

    /// Validate and persist a new endpoint, then schedule its first check.
    ///
    /// # Errors
    ///
    /// `ValidationError`, `InvalidTarget` or `IntervalOutOfRange` for a bad
    /// definition; store errors otherwise.
    pub async fn register(&self, new: NewEndpoint) -> Result<Endpoint> {
        let endpoint = new.into_endpoint(&self.checks, self.clock.now())?;
        self.store.create_endpoint(&endpoint).await?;
        self.scheduler.register(&endpoint).await?;

        info!(
            endpoint_id = %endpoint.id,
            owner_id = %endpoint.owner_id,
            kind = %endpoint.kind,
            interval_secs = endpoint.interval_secs,
            "Endpoint registered"
        );
        Ok(endpoint)
    }

    pub async fn list_for_user(&self, owner: UserId) -> Result<Vec<Endpoint>> {
        self.store.list_endpoints_for_user(owner).await
    }

    pub async fn get(&self, id: EndpointId) -> Result<Endpoint> {
        self.store
            .get_endpoint(id)
            .await?
            .ok_or_else(|| MonitraError::not_found("Endpoint", id.to_string()))
    }

    /// Newest first. `None` means the default window; any limit is clamped to
    /// `1..=max_window`.
    pub async fn recent_heartbeats(&self, id: EndpointId, limit: Option<usize>) -> Result<Vec<Heartbeat>> {
        self.get(id).await?;
        let limit = limit
            .unwrap_or(self.checks.default_window)
            .clamp(1, self.checks.max_window.max(1));
        self.recorder.recent_window(id, limit).await
    }

    /// Stop checking an endpoint and drop its queued task.
    pub async fn pause(&self, id: EndpointId) -> Result<Endpoint> {
        let endpoint = self
            .store
            .set_endpoint_active(id, false, EndpointStatus::Paused)
            .await?
            .ok_or_else(|| MonitraError::not_found("Endpoint", id.to_string()))?;
        self.scheduler.unregister(id).await?;

        info!(endpoint_id = %id, "Endpoint paused");
        Ok(endpoint)
    }

    /// Resume checking. The status restarts at `pending` and the first check is immediate.
    pub async fn resume(&self, id: EndpointId) -> Result<Endpoint> {
        let endpoint = self
            .store
            .set_endpoint_active(id, true, EndpointStatus::Pending)
            .await?
            .ok_or_else(|| MonitraError::not_found("Endpoint", id.to_string()))?;
        self.scheduler.register(&endpoint).await?;

        info!(endpoint_id = %id, "Endpoint resumed");
        Ok(endpoint)
    }

    /// Remove an endpoint and its heartbeats.
    pub async fn delete(&self, id: EndpointId) -> Result<()> {
        self.scheduler.unregister(id).await?;
        if !self.store.delete_endpoint(id).await? {
            return Err(MonitraError::not_found("Endpoint", id.to_string()));
        }

        info!(endpoint_id = %id, "Endpoint deleted");
        Ok(())
    }
}
