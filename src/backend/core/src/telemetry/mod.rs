//! Telemetry: logging, metrics and trace export.
//!
//! - **Logging**: structured JSON/pretty logging with secret redaction
//! - **Metrics**: Prometheus exporter for check, queue and notification metrics
//! - **Tracing**: optional OTLP span export
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(config: monitra_core::config::Config) -> anyhow::Result<()> {
//! let telemetry = monitra_core::telemetry::init_telemetry(&config.observability)?;
//! // ... run the service ...
//! telemetry.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use logging::{
    init_logging, redact_url, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
pub use self::metrics::{init_metrics, register_metric_descriptions, MetricsExporter};
pub use self::tracing::{current_trace_id, init_tracer, shutdown_tracing};

use opentelemetry_sdk::trace::Tracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize metrics, trace export and logging, in that order.
///
/// Call once, inside the tokio runtime.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub fn init_telemetry(config: &ObservabilityConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(config)?;
    let tracer = init_tracer(config)?;
    let tracing_enabled = tracer.is_some();

    install_subscriber(&LoggingConfig::from_observability(config), tracer)?;

    ::tracing::info!(
        service = %config.service_name,
        otlp = tracing_enabled,
        metrics = ?metrics,
        "Telemetry initialized"
    );

    Ok(TelemetryHandle {
        metrics,
        tracing_enabled,
    })
}

pub(crate) fn install_subscriber(config: &LoggingConfig, tracer: Option<Tracer>) -> anyhow::Result<()> {
    logging::install_redactor(&config.redaction);

    let filter = EnvFilter::try_new(config.directives())?;
    let otel = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(config.span_events())
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(config.span_events())
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(
                fmt::layer()
                    .compact()
                    .with_span_events(config.span_events())
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()?,
    }

    Ok(())
}

/// Handle for managing telemetry lifecycle.
#[derive(Debug)]
pub struct TelemetryHandle {
    pub metrics: MetricsExporter,
    tracing_enabled: bool,
}

impl TelemetryHandle {
    /// Flush pending spans.
    pub fn shutdown(self) {
        if self.tracing_enabled {
            shutdown_tracing();
        }
        ::tracing::info!("Telemetry shutdown complete");
    }
}
