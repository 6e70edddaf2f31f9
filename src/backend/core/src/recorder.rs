//! Heartbeat recorder.
//!
//! Each check appends one heartbeat and then updates the endpoint's status and
//! last-checked time. The two steps are separate so a caller can publish a
//! transition in between: until the status moves, a redelivered check detects
//! the same transition again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::model::{EndpointId, EndpointStatus, Heartbeat, Outcome};
use crate::store::MonitorStore;

#[derive(Clone)]
pub struct HeartbeatRecorder {
    store: Arc<dyn MonitorStore>,
}

impl HeartbeatRecorder {
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self { store }
    }

    /// Append the immutable record of one check.
    pub async fn append(
        &self,
        endpoint_id: EndpointId,
        outcome: Outcome,
        latency_ms: u64,
        message: Option<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<Heartbeat> {
        let heartbeat = Heartbeat::new(endpoint_id, outcome, latency_ms, message, checked_at);
        self.store.append_heartbeat(&heartbeat).await?;
        Ok(heartbeat)
    }

    /// Move the endpoint to `status`. Returns false when it was paused or
    /// deleted while the check ran; the status is then left alone.
    pub async fn apply_status(
        &self,
        endpoint_id: EndpointId,
        status: EndpointStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<bool> {
        let applied = self
            .store
            .update_endpoint_status(endpoint_id, status, checked_at)
            .await?;
        if !applied {
            debug!(endpoint_id = %endpoint_id, "Endpoint no longer active, status left unchanged");
        }
        Ok(applied)
    }

    /// The most recent `limit` heartbeats, newest first.
    pub async fn recent_window(&self, endpoint_id: EndpointId, limit: usize) -> Result<Vec<Heartbeat>> {
        self.store.recent_heartbeats(endpoint_id, limit).await
    }
}
