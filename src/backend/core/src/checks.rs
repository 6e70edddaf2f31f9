//! Check task handler.
//!
//! The body every check worker runs for one [`CheckTask`]: load the endpoint,
//! probe it, append the heartbeat, publish a [`TransitionEvent`] when the status
//! category changed, then move the status.

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::ErrorCode;
use crate::jobs::{JobError, JobHandler, JobQueue, JobResult, QueuedJob, RetryPolicy};
use crate::model::{CheckTask, Endpoint, EndpointId, TransitionEvent};
use crate::probe::ProbeExecutor;
use crate::recorder::HeartbeatRecorder;
use crate::store::MonitorStore;
use crate::transition::{detect, should_notify};

/// What one check did, for callers that run checks directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Endpoint missing, inactive or paused; nothing recorded
    Skipped,
    /// Heartbeat recorded; `notified` is true when an event was published
    Recorded { transitioned: bool, notified: bool },
}

pub struct CheckHandler {
    store: Arc<dyn MonitorStore>,
    recorder: HeartbeatRecorder,
    probes: ProbeExecutor,
    notifications: Arc<JobQueue>,
    clock: SharedClock,
    notify_on_first_check: bool,
    retry_policy: RetryPolicy,
}

impl CheckHandler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        probes: ProbeExecutor,
        notifications: Arc<JobQueue>,
        clock: SharedClock,
    ) -> Self {
        Self {
            recorder: HeartbeatRecorder::new(store.clone()),
            store,
            probes,
            notifications,
            clock,
            notify_on_first_check: false,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Also alert on `pending -> down`.
    pub fn notify_on_first_check(mut self, enabled: bool) -> Self {
        self.notify_on_first_check = enabled;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Run one check for `task`.
    ///
    /// A transition is published before the status moves. If the publish fails,
    /// the status still holds its old value and the error is returned, so the
    /// redelivered task detects the same transition and publishes it again.
    ///
    /// # Errors
    ///
    /// Store and notification-queue failures; a failed probe is a `down` outcome.
    pub async fn run(&self, task: &CheckTask) -> crate::error::Result<CheckOutcome> {
        let Some(endpoint) = self.schedulable(task.endpoint_id).await? else {
            return Ok(CheckOutcome::Skipped);
        };

        let result = self.probes.run(endpoint.kind, &endpoint.target).await;
        let checked_at = self.clock.now();
        let previous = endpoint.status;
        let detection = detect(previous, result.outcome);

        let appended = self
            .recorder
            .append(
                endpoint.id,
                result.outcome,
                result.latency_ms,
                result.message.clone(),
                checked_at,
            )
            .await;
        match appended {
            Ok(_) => {}
            Err(e) if matches!(e.code(), ErrorCode::EndpointNotFound | ErrorCode::RecordNotFound) => {
                debug!(endpoint_id = %endpoint.id, "Endpoint deleted during check, result dropped");
                return Ok(CheckOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        debug!(
            endpoint_id = %endpoint.id,
            outcome = %result.outcome,
            latency_ms = result.latency_ms,
            "Check recorded"
        );

        let mut notified = false;
        if detection.transitioned && should_notify(previous, detection, self.notify_on_first_check) {
            // Paused, deleted or already moved while the check ran: no alert.
            let current = self.schedulable(endpoint.id).await?;
            if current.map_or(true, |current| current.status != previous) {
                return Ok(CheckOutcome::Recorded {
                    transitioned: false,
                    notified: false,
                });
            }

            let event = TransitionEvent::new(
                &endpoint,
                previous,
                detection.status,
                result.message.as_deref(),
                checked_at,
            );
            if let Err(e) = self
                .notifications
                .enqueue(&event, Some(transition_key(&endpoint)))
                .await
            {
                warn!(
                    endpoint_id = %endpoint.id,
                    error = %e,
                    "Failed to publish transition event, status left for redelivery"
                );
                return Err(e);
            }
            notified = true;
        }

        let status_applied = self
            .recorder
            .apply_status(endpoint.id, detection.status, checked_at)
            .await?;
        if !status_applied || !detection.transitioned {
            return Ok(CheckOutcome::Recorded {
                transitioned: false,
                notified,
            });
        }

        counter!("monitra_transitions_total", "to" => detection.status.as_str()).increment(1);
        info!(
            endpoint_id = %endpoint.id,
            from = %previous,
            to = %detection.status,
            notified,
            "Endpoint status changed"
        );

        Ok(CheckOutcome::Recorded {
            transitioned: true,
            notified,
        })
    }

    /// The endpoint, if it still exists and is neither inactive nor paused.
    async fn schedulable(&self, id: EndpointId) -> crate::error::Result<Option<Endpoint>> {
        match self.store.get_endpoint(id).await? {
            Some(endpoint) if endpoint.is_schedulable() => Ok(Some(endpoint)),
            Some(_) => {
                debug!(endpoint_id = %id, "Endpoint paused or inactive, skipping check");
                Ok(None)
            }
            None => {
                debug!(endpoint_id = %id, "Endpoint no longer exists, skipping check");
                Ok(None)
            }
        }
    }
}

/// One key per status baseline, so a redelivered check coalesces into the
/// event its earlier delivery already queued.
fn transition_key(endpoint: &Endpoint) -> String {
    format!(
        "{}:{}",
        endpoint.id,
        endpoint.last_checked.map_or(0, |at| at.timestamp_millis())
    )
}

#[async_trait]
impl JobHandler for CheckHandler {
    fn name(&self) -> &'static str {
        "check"
    }

    async fn handle(&self, job: &QueuedJob) -> JobResult {
        let task: CheckTask = job.decode().map_err(|e| JobError::fatal(e.to_string()))?;
        self.run(&task).await.map(|_| ()).map_err(JobError::from)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }
}
