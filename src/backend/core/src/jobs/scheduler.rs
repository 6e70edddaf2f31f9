//! Per-endpoint check scheduling.
//!
//! One logical timer per schedulable endpoint, kept as a next-fire time in a
//! min-heap. Replacing or removing a timer bumps its generation; stale heap
//! entries are skipped when they surface.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::gauge;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::queue::{EnqueueOutcome, JobQueue};
use crate::clock::SharedClock;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::model::{CheckTask, Endpoint, EndpointId};
use crate::store::MonitorStore;

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    interval: ChronoDuration,
    next_fire: DateTime<Utc>,
    generation: u64,
}

#[derive(Debug, Default)]
struct SchedulerState {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, EndpointId)>>,
    entries: HashMap<EndpointId, TimerEntry>,
    generation: u64,
}

impl SchedulerState {
    fn arm(&mut self, id: EndpointId, interval: ChronoDuration, next_fire: DateTime<Utc>) {
        self.generation += 1;
        let generation = self.generation;
        self.entries.insert(
            id,
            TimerEntry {
                interval,
                next_fire,
                generation,
            },
        );
        self.heap.push(Reverse((next_fire, generation, id)));
    }

    fn disarm(&mut self, id: EndpointId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Pop every live entry due at `now` and re-arm it one interval later.
    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<EndpointId> {
        let mut due = Vec::new();
        while let Some(Reverse((fire_at, generation, id))) = self.heap.peek().copied() {
            if fire_at > now {
                break;
            }
            self.heap.pop();
            let live = matches!(self.entries.get(&id), Some(entry) if entry.generation == generation);
            if !live {
                continue;
            }
            if let Some(interval) = self.entries.get(&id).map(|e| e.interval) {
                due.push(id);
                self.arm(id, interval, now + interval);
            }
        }
        due
    }

    /// Drop stale heap entries once they dominate the heap.
    fn compact(&mut self) {
        if self.heap.len() > 2 * self.entries.len() + 64 {
            let entries = &self.entries;
            self.heap
                .retain(|Reverse((_, generation, id))| matches!(entries.get(id), Some(e) if e.generation == *generation));
        }
    }
}

fn first_fire(endpoint: &Endpoint, now: DateTime<Utc>) -> DateTime<Utc> {
    endpoint
        .last_checked
        .map_or(now, |last| (last + endpoint.interval()).max(now))
}

/// Result of a [`CheckScheduler::reconcile`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub kept: usize,
}

/// Result of a [`CheckScheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub enqueued: usize,
    pub coalesced: usize,
    pub failed: usize,
}

/// A timer as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledCheck {
    pub endpoint_id: EndpointId,
    pub interval_secs: u64,
    pub next_fire: DateTime<Utc>,
}

/// Keeps one recurring timer per schedulable endpoint and turns firings into check tasks.
pub struct CheckScheduler {
    queue: Arc<JobQueue>,
    clock: SharedClock,
    state: Mutex<SchedulerState>,
}

impl CheckScheduler {
    /// Create a new scheduler feeding `queue`.
    pub fn new(queue: Arc<JobQueue>, clock: SharedClock) -> Self {
        Self {
            queue,
            clock,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Create or replace the timer for an endpoint. The first firing is immediate.
    ///
    /// An endpoint that is inactive or paused is unregistered instead.
    pub async fn register(&self, endpoint: &Endpoint) -> Result<()> {
        if !endpoint.is_schedulable() {
            return self.unregister(endpoint.id).await;
        }
        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            state.arm(endpoint.id, endpoint.interval(), now);
            state.compact();
            gauge!("monitra_scheduled_endpoints").set(state.entries.len() as f64);
        }
        debug!(endpoint_id = %endpoint.id, interval_secs = endpoint.interval_secs, "Timer registered");
        Ok(())
    }

    /// Cancel future firings and any task still waiting in the queue.
    ///
    /// A task already leased by a worker runs to completion.
    pub async fn unregister(&self, id: EndpointId) -> Result<()> {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.disarm(id);
            state.compact();
            gauge!("monitra_scheduled_endpoints").set(state.entries.len() as f64);
            removed
        };
        let cancelled = self.queue.cancel(&CheckTask::new(id).dedupe_key()).await?;
        if removed || cancelled {
            debug!(endpoint_id = %id, cancelled, "Timer unregistered");
        }
        Ok(())
    }

    /// Rebuild timers from the full set of active endpoints.
    ///
    /// Endpoints missing from `active` lose their timer; new ones fire at
    /// `max(now, last_checked + interval)`; unchanged ones keep their timer.
    pub async fn reconcile(&self, active: &[Endpoint]) -> Result<ReconcileReport> {
        let now = self.clock.now();
        let mut report = ReconcileReport::default();

        let removed_ids: Vec<EndpointId> = {
            let mut state = self.state.lock();
            let desired: HashMap<EndpointId, &Endpoint> = active
                .iter()
                .filter(|e| e.is_schedulable())
                .map(|e| (e.id, e))
                .collect();

            let stale: Vec<EndpointId> = state
                .entries
                .keys()
                .filter(|id| !desired.contains_key(id))
                .copied()
                .collect();
            for id in &stale {
                state.disarm(*id);
            }
            report.removed = stale.len();

            for endpoint in desired.values() {
                let interval = endpoint.interval();
                match state.entries.get(&endpoint.id).copied() {
                    Some(entry) if entry.interval == interval => report.kept += 1,
                    Some(_) => {
                        state.arm(endpoint.id, interval, first_fire(endpoint, now));
                        report.updated += 1;
                    }
                    None => {
                        state.arm(endpoint.id, interval, first_fire(endpoint, now));
                        report.added += 1;
                    }
                }
            }

            state.compact();
            gauge!("monitra_scheduled_endpoints").set(state.entries.len() as f64);
            stale
        };

        let cancel_keys: HashSet<String> = removed_ids
            .iter()
            .map(|id| CheckTask::new(*id).dedupe_key())
            .collect();
        for key in cancel_keys {
            self.queue.cancel(&key).await?;
        }

        if report.added + report.removed + report.updated > 0 {
            info!(
                added = report.added,
                removed = report.removed,
                updated = report.updated,
                kept = report.kept,
                "Schedule reconciled"
            );
        }
        Ok(report)
    }

    /// Fire every timer due at `now`: one check task per endpoint, deduplicated
    /// by endpoint id, then re-armed at `now + interval`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let due = self.state.lock().take_due(now);
        let mut report = TickReport::default();

        for id in due {
            let task = CheckTask::new(id);
            match self.queue.enqueue(&task, Some(task.dedupe_key())).await {
                Ok(EnqueueOutcome::Enqueued) => report.enqueued += 1,
                Ok(EnqueueOutcome::Coalesced) => {
                    report.coalesced += 1;
                    debug!(endpoint_id = %id, "Previous check still outstanding, firing coalesced");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(endpoint_id = %id, error = %e, "Failed to enqueue check task; next firing will retry");
                }
            }
        }
        report
    }

    /// Current timers, soonest first.
    pub fn scheduled(&self) -> Vec<ScheduledCheck> {
        let state = self.state.lock();
        let mut timers: Vec<ScheduledCheck> = state
            .entries
            .iter()
            .map(|(id, entry)| ScheduledCheck {
                endpoint_id: *id,
                interval_secs: entry.interval.num_seconds().max(0) as u64,
                next_fire: entry.next_fire,
            })
            .collect();
        timers.sort_by(|a, b| a.next_fire.cmp(&b.next_fire).then(a.endpoint_id.cmp(&b.endpoint_id)));
        timers
    }

    pub fn next_fire(&self, id: EndpointId) -> Option<DateTime<Utc>> {
        self.state.lock().entries.get(&id).map(|e| e.next_fire)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tick on a fixed cadence and periodically re-reconcile from the store
    /// until `shutdown` flips to true.
    pub async fn run(
        self: Arc<Self>,
        store: Arc<dyn MonitorStore>,
        config: SchedulerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(config.tick());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reconciler = tokio::time::interval(config.reconcile_interval());
        reconciler.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first reconcile happens at startup, before the loop.
        reconciler.tick().await;

        info!(
            tick_ms = config.tick_millis,
            reconcile_secs = config.reconcile_interval_secs,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(self.clock.now()).await;
                    if report.enqueued + report.failed > 0 {
                        debug!(
                            enqueued = report.enqueued,
                            coalesced = report.coalesced,
                            failed = report.failed,
                            "Scheduler tick"
                        );
                    }
                }
                _ = reconciler.tick() => {
                    match store.list_active_endpoints().await {
                        Ok(active) => {
                            if let Err(e) = self.reconcile(&active).await {
                                e.log();
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to load endpoints for reconcile; keeping current schedule");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::ChecksConfig;
    use crate::jobs::queue::{InMemoryQueueBackend, QueueConfig, CHECK_QUEUE};
    use crate::model::{CheckKind, EndpointStatus, NewEndpoint, UserId};
    use std::time::Duration;
    use uuid::Uuid;

    fn setup() -> (Arc<CheckScheduler>, Arc<JobQueue>, ManualClock) {
        let clock = ManualClock::default();
        let queue = Arc::new(JobQueue::new(
            CHECK_QUEUE,
            Arc::new(InMemoryQueueBackend::new()),
            QueueConfig::default(),
            Arc::new(clock.clone()),
        ));
        let scheduler = Arc::new(CheckScheduler::new(queue.clone(), Arc::new(clock.clone())));
        (scheduler, queue, clock)
    }

    fn endpoint(interval: u64, now: DateTime<Utc>) -> Endpoint {
        NewEndpoint {
            owner_id: UserId(Uuid::new_v4()),
            notify_email: "ops@example.com".into(),
            name: "api".into(),
            target: "https://example.com".into(),
            kind: CheckKind::Http,
            interval_secs: Some(interval),
        }
        .into_endpoint(&ChecksConfig::default(), now)
        .unwrap()
    }

    async fn drain(queue: &JobQueue) -> usize {
        let mut n = 0;
        while let Some(job) = queue.dequeue(Duration::from_secs(60)).await.unwrap() {
            queue.ack(&job).await.unwrap();
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_first_fire_is_immediate() {
        let (scheduler, queue, clock) = setup();
        let e = endpoint(60, clock.now());
        scheduler.register(&e).await.unwrap();

        let report = scheduler.tick(clock.now()).await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(scheduler.next_fire(e.id), Some(clock.now() + ChronoDuration::seconds(60)));
    }

    #[tokio::test]
    async fn test_181_seconds_yields_four_tasks() {
        let (scheduler, queue, clock) = setup();
        let e = endpoint(60, clock.now());
        scheduler.register(&e).await.unwrap();

        let mut total = 0;
        for _ in 0..=181 {
            total += scheduler.tick(clock.now()).await.enqueued;
            drain(&queue).await;
            clock.advance_secs(1);
        }

        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_outstanding_task_coalesces_next_firing() {
        let (scheduler, queue, clock) = setup();
        let e = endpoint(30, clock.now());
        scheduler.register(&e).await.unwrap();

        assert_eq!(scheduler.tick(clock.now()).await.enqueued, 1);
        clock.advance_secs(30);
        let report = scheduler.tick(clock.now()).await;
        assert_eq!(report.enqueued, 0);
        assert_eq!(report.coalesced, 1);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (scheduler, _queue, clock) = setup();
        let endpoints = vec![endpoint(60, clock.now()), endpoint(30, clock.now())];

        let first = scheduler.reconcile(&endpoints).await.unwrap();
        let second = scheduler.reconcile(&endpoints).await.unwrap();

        assert_eq!(first.added, 2);
        assert_eq!(second, ReconcileReport { kept: 2, ..Default::default() });
        assert_eq!(scheduler.len(), 2);

        let report = scheduler.tick(clock.now()).await;
        assert_eq!(report.enqueued, 2);
    }

    #[tokio::test]
    async fn test_reconcile_uses_last_checked() {
        let (scheduler, _queue, clock) = setup();
        let mut e = endpoint(60, clock.now());
        e.last_checked = Some(clock.now() - ChronoDuration::seconds(20));
        e.status = EndpointStatus::Up;

        scheduler.reconcile(std::slice::from_ref(&e)).await.unwrap();
        assert_eq!(scheduler.next_fire(e.id), Some(clock.now() + ChronoDuration::seconds(40)));

        let mut overdue = endpoint(60, clock.now());
        overdue.last_checked = Some(clock.now() - ChronoDuration::seconds(600));
        scheduler.reconcile(&[e.clone(), overdue.clone()]).await.unwrap();
        assert_eq!(scheduler.next_fire(overdue.id), Some(clock.now()));
    }

    #[tokio::test]
    async fn test_reconcile_drops_orphans_and_paused() {
        let (scheduler, queue, clock) = setup();
        let a = endpoint(60, clock.now());
        let mut b = endpoint(60, clock.now());
        scheduler.reconcile(&[a.clone(), b.clone()]).await.unwrap();
        scheduler.tick(clock.now()).await;
        assert_eq!(queue.len().await.unwrap(), 2);

        b.status = EndpointStatus::Paused;
        let report = scheduler.reconcile(&[b.clone()]).await.unwrap();

        assert_eq!(report.removed, 2);
        assert!(scheduler.is_empty());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_retimes_changed_interval() {
        let (scheduler, _queue, clock) = setup();
        let mut e = endpoint(60, clock.now());
        scheduler.reconcile(std::slice::from_ref(&e)).await.unwrap();
        scheduler.tick(clock.now()).await;

        e.interval_secs = 300;
        let report = scheduler.reconcile(std::slice::from_ref(&e)).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(scheduler.scheduled()[0].interval_secs, 300);
    }

    #[tokio::test]
    async fn test_unregister_cancels_future_and_queued() {
        let (scheduler, queue, clock) = setup();
        let e = endpoint(60, clock.now());
        scheduler.register(&e).await.unwrap();
        scheduler.tick(clock.now()).await;
        assert_eq!(queue.len().await.unwrap(), 1);

        scheduler.unregister(e.id).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);

        clock.advance_secs(600);
        assert_eq!(scheduler.tick(clock.now()).await, TickReport::default());
    }

    #[tokio::test]
    async fn test_register_replaces_timer() {
        let (scheduler, queue, clock) = setup();
        let e = endpoint(60, clock.now());
        scheduler.register(&e).await.unwrap();
        scheduler.register(&e).await.unwrap();

        let report = scheduler.tick(clock.now()).await;
        assert_eq!(report.enqueued + report.coalesced, 1);
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(scheduler.len(), 1);
    }
}
