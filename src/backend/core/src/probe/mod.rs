//! Probe executors.
//!
//! A [`Probe`] runs one kind of reachability check. [`ProbeExecutor`] dispatches
//! by [`CheckKind`], enforces the hard timeout and measures latency, so probes
//! never fail with an error: unreachable targets are a `down` result.

mod http;
mod ping;
mod target;
mod tcp;

pub use http::HttpProbe;
pub use ping::PingProbe;
pub use target::ProbeTarget;
pub use tcp::TcpProbe;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::model::{CheckKind, Outcome};

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub outcome: Outcome,
    pub latency_ms: u64,
    pub message: Option<String>,
}

impl ProbeResult {
    pub fn up(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Up,
            latency_ms: 0,
            message: Some(message.into()),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Down,
            latency_ms: 0,
            message: Some(message.into()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn is_up(&self) -> bool {
        self.outcome == Outcome::Up
    }
}

/// A reachability check for one kind of target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &ProbeTarget) -> ProbeResult;
}

/// Runs the probe registered for a check kind under a hard timeout.
#[derive(Clone)]
pub struct ProbeExecutor {
    probes: HashMap<CheckKind, Arc<dyn Probe>>,
    timeout: Duration,
}

impl ProbeExecutor {
    /// An executor with no probes registered.
    pub fn empty(timeout: Duration) -> Self {
        Self {
            probes: HashMap::new(),
            timeout,
        }
    }

    /// An executor with the HTTP, port and ping probes.
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let timeout = config.timeout();
        Ok(Self::empty(timeout)
            .with_probe(CheckKind::Http, Arc::new(HttpProbe::new(timeout, &config.user_agent)?))
            .with_probe(CheckKind::Port, Arc::new(TcpProbe::new()))
            .with_probe(CheckKind::Ping, Arc::new(PingProbe::new(timeout))))
    }

    /// Register or replace the probe for a kind.
    pub fn with_probe(mut self, kind: CheckKind, probe: Arc<dyn Probe>) -> Self {
        self.probes.insert(kind, probe);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check `raw_target` with the probe for `kind`.
    pub async fn run(&self, kind: CheckKind, raw_target: &str) -> ProbeResult {
        let start = Instant::now();
        let result = self.run_inner(kind, raw_target).await;
        let elapsed = start.elapsed();
        let result = result.with_latency(elapsed);

        counter!(
            "monitra_checks_total",
            "kind" => kind.as_str(),
            "outcome" => result.outcome.as_str(),
        )
        .increment(1);
        histogram!("monitra_check_latency_seconds", "kind" => kind.as_str())
            .record(elapsed.as_secs_f64());

        debug!(
            kind = %kind,
            target = raw_target,
            outcome = %result.outcome,
            latency_ms = result.latency_ms,
            "Probe finished"
        );
        result
    }

    async fn run_inner(&self, kind: CheckKind, raw_target: &str) -> ProbeResult {
        let Some(probe) = self.probes.get(&kind) else {
            return ProbeResult::down(format!("no probe registered for kind {}", kind));
        };
        let target = match ProbeTarget::parse(kind, raw_target) {
            Ok(target) => target,
            Err(e) => return ProbeResult::down(e.user_message().to_string()),
        };

        match tokio::time::timeout(self.timeout, probe.check(&target)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::down(timeout_message(self.timeout)),
        }
    }
}

pub(crate) fn timeout_message(timeout: Duration) -> String {
    format!("timeout after {}ms", timeout.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProbe;

    #[async_trait]
    impl Probe for SlowProbe {
        async fn check(&self, _target: &ProbeTarget) -> ProbeResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ProbeResult::up("late")
        }
    }

    struct FixedProbe(ProbeResult);

    #[async_trait]
    impl Probe for FixedProbe {
        async fn check(&self, _target: &ProbeTarget) -> ProbeResult {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_hard_timeout_yields_down() {
        let executor = ProbeExecutor::empty(Duration::from_millis(50))
            .with_probe(CheckKind::Http, Arc::new(SlowProbe));

        let result = executor.run(CheckKind::Http, "https://example.com").await;

        assert_eq!(result.outcome, Outcome::Down);
        assert!(result.message.unwrap().contains("timeout"));
        assert!(result.latency_ms < 5_000);
    }

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let executor = ProbeExecutor::empty(Duration::from_secs(1))
            .with_probe(CheckKind::Port, Arc::new(FixedProbe(ProbeResult::up("Connected"))));

        let result = executor.run(CheckKind::Port, "db:5432").await;
        assert!(result.is_up());

        let result = executor.run(CheckKind::Ping, "10.0.0.1").await;
        assert_eq!(result.outcome, Outcome::Down);
        assert!(result.message.unwrap().contains("no probe registered"));
    }

    #[tokio::test]
    async fn test_unparseable_target_is_down() {
        let executor = ProbeExecutor::empty(Duration::from_secs(1))
            .with_probe(CheckKind::Http, Arc::new(FixedProbe(ProbeResult::up("OK: 200"))));

        let result = executor.run(CheckKind::Http, "nope").await;
        assert_eq!(result.outcome, Outcome::Down);
    }
}
