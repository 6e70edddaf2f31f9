//! End-to-end tests for the check pipeline.
//!
//! Tests cover:
//! - Status transitions and the events they publish (first check, up -> down, down -> up)
//! - Timeouts recorded as down heartbeats
//! - Pausing an endpoint mid-cycle
//! - Retry of transient store failures and dead-lettering after exhaustion
//! - Re-publishing a transition whose first publish failed
//! - Notification dispatch through the worker pool, including a failing transport

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use monitra_core::checks::CheckHandler;
use monitra_core::clock::{Clock, ManualClock, SharedClock};
use monitra_core::config::ChecksConfig;
use monitra_core::error::{ErrorCode, MonitraError, Result};
use monitra_core::jobs::{
    BackoffStrategy, CheckScheduler, EnqueueOutcome, InMemoryQueueBackend, JobHandler, JobQueue,
    JobWorker, QueueBackend, QueueStats, QueuedJob, RetryPolicy, WorkerConfig, CHECK_QUEUE,
    NOTIFICATION_QUEUE,
};
use monitra_core::model::{
    CheckKind, CheckTask, Endpoint, EndpointId, EndpointStatus, Heartbeat, NewEndpoint, Outcome,
    TransitionEvent, UserId,
};
use monitra_core::notifications::{MailMessage, MailTransport, NotificationHandler};
use monitra_core::probe::{Probe, ProbeExecutor, ProbeResult, ProbeTarget};
use monitra_core::service::MonitorService;
use monitra_core::store::{InMemoryStore, MonitorStore};

// ============================================================================
// Fixtures
// ============================================================================

/// Plays back results in order, repeating the last one. `None` hangs past any timeout.
struct ScriptedProbe {
    script: Mutex<VecDeque<Option<ProbeResult>>>,
    delay: Duration,
}

impl ScriptedProbe {
    fn new(script: Vec<Option<ProbeResult>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
        })
    }

    fn with_delay(script: Vec<Option<ProbeResult>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            delay,
        })
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self, _target: &ProbeTarget) -> ProbeResult {
        let next = {
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().cloned().flatten()
            }
        };
        match next {
            Some(result) => {
                tokio::time::sleep(self.delay).await;
                result
            }
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ProbeResult::up("unreachable")
            }
        }
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    clock: ManualClock,
    checks: Arc<JobQueue>,
    notifications: Arc<JobQueue>,
    scheduler: Arc<CheckScheduler>,
    handler: CheckHandler,
    service: MonitorService,
}

fn harness(probe: Arc<dyn Probe>) -> Harness {
    let clock = ManualClock::default();
    let shared: SharedClock = Arc::new(clock.clone());
    let store = Arc::new(InMemoryStore::with_clock(shared.clone()));
    let checks = Arc::new(JobQueue::new(
        CHECK_QUEUE,
        Arc::new(InMemoryQueueBackend::new()),
        Default::default(),
        shared.clone(),
    ));
    let notifications = Arc::new(JobQueue::in_memory(NOTIFICATION_QUEUE));
    let scheduler = Arc::new(CheckScheduler::new(checks.clone(), shared.clone()));
    let probes = ProbeExecutor::empty(Duration::from_millis(200)).with_probe(CheckKind::Http, probe);
    let handler = CheckHandler::new(store.clone(), probes, notifications.clone(), shared.clone());
    let service = MonitorService::new(store.clone(), scheduler.clone(), ChecksConfig::default(), shared);

    Harness {
        store,
        clock,
        checks,
        notifications,
        scheduler,
        handler,
        service,
    }
}

fn new_endpoint(interval: u64) -> NewEndpoint {
    NewEndpoint {
        owner_id: UserId(Uuid::new_v4()),
        notify_email: "ops@example.com".into(),
        name: "E1".into(),
        target: "https://e1.example.com/health".into(),
        kind: CheckKind::Http,
        interval_secs: Some(interval),
    }
}

impl Harness {
    /// Fire due timers, then run and ack every queued check. Returns checks run.
    async fn cycle(&self) -> usize {
        self.scheduler.tick(self.clock.now()).await;
        let mut ran = 0;
        while let Some(job) = self.checks.dequeue(Duration::from_secs(60)).await.unwrap() {
            self.handler.handle(&job).await.unwrap();
            self.checks.ack(&job).await.unwrap();
            ran += 1;
        }
        ran
    }

    async fn events(&self) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        while let Some(job) = self.notifications.dequeue(Duration::from_secs(60)).await.unwrap() {
            events.push(job.decode().unwrap());
            self.notifications.ack(&job).await.unwrap();
        }
        events
    }

    async fn endpoint(&self, id: EndpointId) -> Endpoint {
        self.store.get_endpoint(id).await.unwrap().unwrap()
    }

    async fn heartbeats(&self, id: EndpointId) -> Vec<Heartbeat> {
        self.store.recent_heartbeats(id, 50).await.unwrap()
    }
}

// ============================================================================
// Transition Scenarios
// ============================================================================

#[tokio::test]
async fn test_first_check_up_sets_baseline_without_event() {
    let probe = ScriptedProbe::with_delay(vec![Some(ProbeResult::up("OK: 200"))], Duration::from_millis(42));
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    assert_eq!(h.cycle().await, 1);

    let stored = h.endpoint(endpoint.id).await;
    assert_eq!(stored.status, EndpointStatus::Up);
    assert_eq!(stored.last_checked, Some(h.clock.now()));

    let heartbeats = h.heartbeats(endpoint.id).await;
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0].outcome, Outcome::Up);
    assert!(heartbeats[0].latency_ms >= 42);
    assert!(h.events().await.is_empty());
}

#[tokio::test]
async fn test_timeout_after_up_publishes_one_event() {
    let probe = ScriptedProbe::new(vec![Some(ProbeResult::up("OK: 200")), None]);
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    h.cycle().await;
    assert!(h.events().await.is_empty());

    h.clock.advance_secs(30);
    assert_eq!(h.cycle().await, 1);

    let heartbeats = h.heartbeats(endpoint.id).await;
    assert_eq!(heartbeats.len(), 2);
    assert_eq!(heartbeats[0].outcome, Outcome::Down);
    assert!(heartbeats[0].message.as_deref().unwrap_or_default().contains("timeout"));
    assert_eq!(h.endpoint(endpoint.id).await.status, EndpointStatus::Down);

    let events = h.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous, EndpointStatus::Up);
    assert_eq!(events[0].current, EndpointStatus::Down);
    assert_eq!(events[0].endpoint_id, endpoint.id);
    assert!(events[0].message.contains("timeout"));
}

#[tokio::test]
async fn test_recovery_publishes_event_and_repeats_are_silent() {
    let probe = ScriptedProbe::new(vec![
        Some(ProbeResult::up("OK: 200")),
        Some(ProbeResult::down("HTTP request failed: connection refused")),
        Some(ProbeResult::down("HTTP request failed: connection refused")),
        Some(ProbeResult::down("HTTP request failed: connection refused")),
        Some(ProbeResult::up("OK: 200")),
    ]);
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    h.cycle().await;
    h.clock.advance_secs(30);
    h.cycle().await;
    assert_eq!(h.events().await.len(), 1);

    // Two more down checks: no new events.
    for _ in 0..2 {
        h.clock.advance_secs(30);
        h.cycle().await;
    }
    assert!(h.events().await.is_empty());

    h.clock.advance_secs(30);
    h.cycle().await;
    let events = h.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous, EndpointStatus::Down);
    assert_eq!(events[0].current, EndpointStatus::Up);

    assert_eq!(h.heartbeats(endpoint.id).await.len(), 5);
}

#[tokio::test]
async fn test_heartbeats_are_newest_first() {
    let probe = ScriptedProbe::new(vec![
        Some(ProbeResult::up("first")),
        Some(ProbeResult::up("second")),
        Some(ProbeResult::up("third")),
    ]);
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    for _ in 0..3 {
        h.cycle().await;
        h.clock.advance_secs(30);
    }

    let window = h.service.recent_heartbeats(endpoint.id, Some(2)).await.unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].message.as_deref(), Some("third"));
    assert_eq!(window[1].message.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_pause_mid_cycle_cancels_pending_task() {
    let probe = ScriptedProbe::new(vec![Some(ProbeResult::up("OK: 200"))]);
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    // The first task is queued but not yet run.
    h.scheduler.tick(h.clock.now()).await;
    assert_eq!(h.checks.len().await.unwrap(), 1);

    h.service.pause(endpoint.id).await.unwrap();
    assert_eq!(h.checks.len().await.unwrap(), 0);

    for _ in 0..5 {
        h.clock.advance_secs(30);
        assert_eq!(h.cycle().await, 0);
    }
    assert!(h.heartbeats(endpoint.id).await.is_empty());
    assert_eq!(h.endpoint(endpoint.id).await.status, EndpointStatus::Paused);

    h.service.resume(endpoint.id).await.unwrap();
    assert_eq!(h.cycle().await, 1);
    assert_eq!(h.heartbeats(endpoint.id).await.len(), 1);
    assert_eq!(h.endpoint(endpoint.id).await.status, EndpointStatus::Up);
}

#[tokio::test]
async fn test_down_across_pause_is_a_new_baseline() {
    let probe = ScriptedProbe::new(vec![
        Some(ProbeResult::up("OK: 200")),
        Some(ProbeResult::down("refused")),
    ]);
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    h.cycle().await;
    h.clock.advance_secs(30);
    h.cycle().await;
    assert_eq!(h.events().await.len(), 1);

    h.service.pause(endpoint.id).await.unwrap();
    h.service.resume(endpoint.id).await.unwrap();
    assert_eq!(h.endpoint(endpoint.id).await.status, EndpointStatus::Pending);

    assert_eq!(h.cycle().await, 1);
    assert_eq!(h.endpoint(endpoint.id).await.status, EndpointStatus::Down);
    assert!(h.events().await.is_empty());
}

#[tokio::test]
async fn test_task_leased_before_pause_does_not_overwrite_status() {
    let probe = ScriptedProbe::new(vec![Some(ProbeResult::down("refused"))]);
    let h = harness(probe);
    let endpoint = h.service.register(new_endpoint(30)).await.unwrap();

    h.scheduler.tick(h.clock.now()).await;
    let job = h.checks.dequeue(Duration::from_secs(60)).await.unwrap().unwrap();

    // Paused while the check is in flight: no longer schedulable, so the handler skips.
    h.service.pause(endpoint.id).await.unwrap();
    h.handler.handle(&job).await.unwrap();
    h.checks.ack(&job).await.unwrap();

    assert_eq!(h.endpoint(endpoint.id).await.status, EndpointStatus::Paused);
    assert!(h.events().await.is_empty());
}

// ============================================================================
// Retry Handling
// ============================================================================

/// Fails heartbeat appends until `failures` runs out.
struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicUsize,
}

#[async_trait]
impl MonitorStore for FlakyStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.inner.create_endpoint(endpoint).await
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        self.inner.get_endpoint(id).await
    }

    async fn list_endpoints_for_user(&self, owner: UserId) -> Result<Vec<Endpoint>> {
        self.inner.list_endpoints_for_user(owner).await
    }

    async fn list_active_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.inner.list_active_endpoints().await
    }

    async fn update_endpoint_status(
        &self,
        id: EndpointId,
        status: EndpointStatus,
        last_checked: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.update_endpoint_status(id, status, last_checked).await
    }

    async fn set_endpoint_active(
        &self,
        id: EndpointId,
        active: bool,
        status: EndpointStatus,
    ) -> Result<Option<Endpoint>> {
        self.inner.set_endpoint_active(id, active, status).await
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool> {
        self.inner.delete_endpoint(id).await
    }

    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MonitraError::new(ErrorCode::DatabaseConnectionFailed, "database unavailable"));
        }
        self.inner.append_heartbeat(heartbeat).await
    }

    async fn recent_heartbeats(&self, id: EndpointId, limit: usize) -> Result<Vec<Heartbeat>> {
        self.inner.recent_heartbeats(id, limit).await
    }
}

fn fast_worker() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        poll_interval_ms: 10,
        visibility_timeout_secs: 60,
        shutdown_timeout_secs: 5,
        name: "test-worker".into(),
    }
}

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn flaky_setup(failures: usize) -> (Arc<FlakyStore>, Arc<JobQueue>, CheckHandler, Endpoint) {
    let store = Arc::new(FlakyStore {
        inner: InMemoryStore::new(),
        failures: AtomicUsize::new(failures),
    });
    let endpoint = new_endpoint(30)
        .into_endpoint(&ChecksConfig::default(), Utc::now())
        .unwrap();
    store.create_endpoint(&endpoint).await.unwrap();

    let checks = Arc::new(JobQueue::in_memory(CHECK_QUEUE));
    let probes = ProbeExecutor::empty(Duration::from_secs(1))
        .with_probe(CheckKind::Http, ScriptedProbe::new(vec![Some(ProbeResult::up("OK: 200"))]));
    let handler = CheckHandler::new(
        store.clone(),
        probes,
        Arc::new(JobQueue::in_memory(NOTIFICATION_QUEUE)),
        Arc::new(ManualClock::default()),
    )
    .with_retry_policy(RetryPolicy::with_retries(3).with_backoff(BackoffStrategy::fixed(0)));

    (store, checks, handler, endpoint)
}

#[tokio::test]
async fn test_transient_store_failure_is_retried() {
    let (store, checks, handler, endpoint) = flaky_setup(1).await;
    checks
        .enqueue(&CheckTask::new(endpoint.id), Some(endpoint.id.to_string()))
        .await
        .unwrap();

    let worker = JobWorker::new(fast_worker()).start(checks.clone(), Arc::new(handler));
    wait_for(|| worker.stats().succeeded() == 1).await;
    let (retried, succeeded) = (worker.stats().retried(), worker.stats().succeeded());
    worker.stop().await;

    assert_eq!(retried, 1);
    assert_eq!(succeeded, 1);
    assert_eq!(store.inner.heartbeat_count(endpoint.id), 1);
    assert!(checks.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_exhausted_retries_go_to_dead_letter() {
    let (store, checks, handler, endpoint) = flaky_setup(usize::MAX).await;
    checks
        .enqueue(&CheckTask::new(endpoint.id), Some(endpoint.id.to_string()))
        .await
        .unwrap();

    let worker = JobWorker::new(fast_worker()).start(checks.clone(), Arc::new(handler));
    wait_for(|| worker.stats().dead() == 1).await;
    let (processed, dead) = (worker.stats().processed(), worker.stats().dead());
    worker.stop().await;

    assert_eq!(processed, 3);
    assert_eq!(dead, 1);
    assert_eq!(store.inner.heartbeat_count(endpoint.id), 0);

    let dead_letters = checks.dead_letters().await;
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].job.attempts, 3);

    // The dedupe key is released: the next firing can enqueue again.
    let outcome = checks
        .enqueue(&CheckTask::new(endpoint.id), Some(endpoint.id.to_string()))
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Enqueued);
}

/// Fails enqueues until `failures` runs out.
struct FlakyQueue {
    inner: InMemoryQueueBackend,
    failures: AtomicUsize,
}

#[async_trait]
impl QueueBackend for FlakyQueue {
    async fn enqueue(&self, queue: &str, job: QueuedJob) -> Result<EnqueueOutcome> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MonitraError::new(ErrorCode::QueueConnectionFailed, "broker unavailable"));
        }
        self.inner.enqueue(queue, job).await
    }

    async fn dequeue(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> Result<Option<QueuedJob>> {
        self.inner.dequeue(queue, now, visibility).await
    }

    async fn ack(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        self.inner.ack(queue, job).await
    }

    async fn retry(&self, queue: &str, job: &QueuedJob, available_at: DateTime<Utc>) -> Result<bool> {
        self.inner.retry(queue, job, available_at).await
    }

    async fn discard(&self, queue: &str, job: &QueuedJob) -> Result<bool> {
        self.inner.discard(queue, job).await
    }

    async fn cancel(&self, queue: &str, key: &str) -> Result<bool> {
        self.inner.cancel(queue, key).await
    }

    async fn stats(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueStats> {
        self.inner.stats(queue, now).await
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        self.inner.len(queue).await
    }
}

/// An endpoint that was up and now probes down, with a notification queue
/// whose first `publish_failures` enqueues fail.
async fn failing_publish_setup(
    publish_failures: usize,
) -> (Arc<InMemoryStore>, Arc<JobQueue>, CheckHandler, Endpoint) {
    let clock: SharedClock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let endpoint = new_endpoint(30)
        .into_endpoint(&ChecksConfig::default(), clock.now())
        .unwrap();
    store.create_endpoint(&endpoint).await.unwrap();
    store
        .update_endpoint_status(endpoint.id, EndpointStatus::Up, clock.now())
        .await
        .unwrap();

    let notifications = Arc::new(JobQueue::new(
        NOTIFICATION_QUEUE,
        Arc::new(FlakyQueue {
            inner: InMemoryQueueBackend::new(),
            failures: AtomicUsize::new(publish_failures),
        }),
        Default::default(),
        clock.clone(),
    ));
    let probes = ProbeExecutor::empty(Duration::from_secs(1)).with_probe(
        CheckKind::Http,
        ScriptedProbe::new(vec![Some(ProbeResult::down("HTTP request failed: connection refused"))]),
    );
    let handler = CheckHandler::new(store.clone(), probes, notifications.clone(), clock)
        .with_retry_policy(RetryPolicy::with_retries(3).with_backoff(BackoffStrategy::fixed(0)));

    (store, notifications, handler, endpoint)
}

#[tokio::test]
async fn test_failed_publish_keeps_status_and_is_retryable() {
    let (store, notifications, handler, endpoint) = failing_publish_setup(1).await;
    let job = QueuedJob::new(serde_json::to_value(CheckTask::new(endpoint.id)).unwrap(), None, Utc::now());

    let err = handler.handle(&job).await.unwrap_err();
    assert!(err.retryable);
    assert!(notifications.is_empty().await.unwrap());
    let stored = store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EndpointStatus::Up);

    handler.handle(&job).await.unwrap();
    let stored = store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EndpointStatus::Down);

    let event: TransitionEvent = notifications
        .dequeue(Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(event.previous, EndpointStatus::Up);
    assert_eq!(event.current, EndpointStatus::Down);
    assert!(notifications.is_empty().await.unwrap());
    assert_eq!(store.heartbeat_count(endpoint.id), 2);
}

#[tokio::test]
async fn test_worker_redelivery_publishes_lost_transition() {
    let (store, notifications, handler, endpoint) = failing_publish_setup(1).await;
    let checks = Arc::new(JobQueue::in_memory(CHECK_QUEUE));
    checks
        .enqueue(&CheckTask::new(endpoint.id), Some(endpoint.id.to_string()))
        .await
        .unwrap();

    let worker = JobWorker::new(fast_worker()).start(checks.clone(), Arc::new(handler));
    wait_for(|| worker.stats().succeeded() == 1).await;
    let (retried, succeeded) = (worker.stats().retried(), worker.stats().succeeded());
    worker.stop().await;

    assert_eq!(retried, 1);
    assert_eq!(succeeded, 1);
    assert_eq!(notifications.len().await.unwrap(), 1);
    let stored = store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EndpointStatus::Down);
}

// ============================================================================
// Notification Dispatch
// ============================================================================

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<MailMessage>>,
    attempts: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MonitraError::mail_delivery_failed(&message.to, "relay unreachable"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_transition_reaches_mail_transport() {
    let probe = ScriptedProbe::new(vec![
        Some(ProbeResult::up("OK: 200")),
        Some(ProbeResult::down("HTTP request failed: connection refused")),
    ]);
    let h = harness(probe);
    h.service.register(new_endpoint(30)).await.unwrap();
    h.cycle().await;
    h.clock.advance_secs(30);
    h.cycle().await;

    let transport = Arc::new(RecordingTransport::default());
    let handler = NotificationHandler::new(transport.clone(), "alerts@monitra.local").unwrap();
    let worker = JobWorker::new(fast_worker()).start(h.notifications.clone(), Arc::new(handler));
    wait_for(|| transport.sent.lock().len() == 1).await;
    worker.stop().await;

    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ops@example.com");
    assert_eq!(sent[0].subject, "Monitor DOWN: E1");
    assert!(sent[0].text_body.contains("connection refused"));
}

#[tokio::test]
async fn test_failed_send_is_attempted_once_and_acked() {
    let notifications = Arc::new(JobQueue::in_memory(NOTIFICATION_QUEUE));
    let event = TransitionEvent {
        endpoint_id: EndpointId::new(),
        endpoint_name: "E1".into(),
        target: "https://e1.example.com/health".into(),
        previous: EndpointStatus::Up,
        current: EndpointStatus::Down,
        recipient: "ops@example.com".into(),
        message: "E1 (https://e1.example.com/health) is now DOWN".into(),
        occurred_at: Utc::now(),
    };
    notifications.enqueue(&event, None).await.unwrap();

    let transport = Arc::new(RecordingTransport {
        fail: true,
        ..Default::default()
    });
    let handler = NotificationHandler::new(transport.clone(), "alerts@monitra.local").unwrap();
    let worker = JobWorker::new(fast_worker()).start(notifications.clone(), Arc::new(handler));
    wait_for(|| worker.stats().processed() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.stop().await;

    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    assert!(notifications.is_empty().await.unwrap());
    assert_eq!(notifications.stats().await.unwrap().in_flight, 0);
}

#[tokio::test]
async fn test_malformed_check_payload_is_not_retried() {
    let h = harness(ScriptedProbe::new(vec![Some(ProbeResult::up("OK: 200"))]));
    let job = QueuedJob::new(serde_json::json!("not a task"), None, Utc::now());
    let err = h.handler.handle(&job).await.unwrap_err();
    assert!(!err.retryable);
}
