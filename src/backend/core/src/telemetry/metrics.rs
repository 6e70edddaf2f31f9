//! Prometheus metrics.
//!
//! Metrics are recorded through the `metrics` facade at the call sites; this
//! module installs the exporter and registers descriptions.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;

use crate::config::ObservabilityConfig;

/// Buckets for probe latency, in seconds. The probe timeout caps the tail.
pub const LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Whether a Prometheus listener was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsExporter {
    Prometheus(SocketAddr),
    Disabled,
}

/// Install the Prometheus exporter when `metrics_addr` is configured.
///
/// Must run inside a tokio runtime: the exporter serves `/metrics` from a
/// spawned task.
///
/// # Errors
///
/// Returns an error for an unparsable address or when a recorder is already installed.
pub fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<MetricsExporter> {
    let Some(addr) = &config.metrics_addr else {
        register_metric_descriptions();
        return Ok(MetricsExporter::Disabled);
    };

    let addr: SocketAddr = addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full("monitra_check_latency_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;

    register_metric_descriptions();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(MetricsExporter::Prometheus(addr))
}

/// Register all metric descriptions.
pub fn register_metric_descriptions() {
    // Checks
    describe_counter!("monitra_checks_total", "Probe executions by kind and outcome");
    describe_histogram!(
        "monitra_check_latency_seconds",
        Unit::Seconds,
        "Probe latency including the timeout bound"
    );
    describe_counter!("monitra_transitions_total", "Endpoint status changes by new status");

    // Scheduling and queues
    describe_gauge!("monitra_scheduled_endpoints", "Endpoints with a live timer");
    describe_counter!("monitra_tasks_enqueued_total", "Jobs added to a queue");
    describe_counter!(
        "monitra_tasks_coalesced_total",
        "Enqueues absorbed by an outstanding job with the same key"
    );
    describe_counter!("monitra_jobs_retried_total", "Failed deliveries scheduled for redelivery");
    describe_counter!("monitra_jobs_dead_total", "Jobs dropped after exhausting retries");

    // Notifications
    describe_counter!("monitra_notifications_sent_total", "Alert mails accepted by the transport");
    describe_counter!("monitra_notifications_failed_total", "Alert mails the transport rejected");

    // Errors
    describe_counter!("monitra_errors_total", "Errors by code, category and severity");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_address() {
        let config = ObservabilityConfig::default();
        assert_eq!(init_metrics(&config).unwrap(), MetricsExporter::Disabled);
    }

    #[test]
    fn test_rejects_bad_address() {
        let config = ObservabilityConfig {
            metrics_addr: Some("not an address".into()),
            ..Default::default()
        };
        assert!(init_metrics(&config).is_err());
    }

    #[test]
    fn test_latency_buckets_sorted() {
        assert!(LATENCY_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }
}
