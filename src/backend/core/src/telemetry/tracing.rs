//! OpenTelemetry trace export over OTLP.

use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self as sdktrace, Sampler};
use opentelemetry_sdk::Resource;

use crate::config::ObservabilityConfig;

/// Build the OTLP batch tracer when `otlp_endpoint` is configured.
///
/// Must run inside a tokio runtime.
///
/// # Errors
///
/// Returns an error if the exporter pipeline cannot be installed.
pub fn init_tracer(config: &ObservabilityConfig) -> anyhow::Result<Option<sdktrace::Tracer>> {
    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        return Ok(None);
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
        .with_trace_config(
            sdktrace::config()
                .with_resource(resource)
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    Ok(Some(tracer))
}

/// Flush remaining spans.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Trace id of the current OpenTelemetry context, if any.
pub fn current_trace_id() -> Option<String> {
    let ctx = Context::current();
    let span = ctx.span();
    let span_ctx = span.span_context();
    span_ctx.is_valid().then(|| span_ctx.trace_id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_endpoint_no_tracer() {
        let config = ObservabilityConfig::default();
        assert!(init_tracer(&config).unwrap().is_none());
    }

    #[test]
    fn test_no_trace_outside_span() {
        assert!(current_trace_id().is_none());
    }
}
