//! Logging and distributed tracing
//!
//! Sets up `tracing` with an env filter, a compact or JSON console layer and,
//! when an OTLP endpoint is configured, an OpenTelemetry export layer.
//!
//! Witness proofs usually arrive through a message transport rather than an
//! HTTP request, so trace context travels in a plain string map attached to
//! each message (W3C `traceparent`/`tracestate` keys).

use std::collections::HashMap;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{self as sdktrace, RandomIdGenerator, Sampler},
    Resource,
};
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const DEFAULT_SERVICE_NAME: &str = "anchor-witness";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Sample rate (0.0 to 1.0)
    pub sample_rate: f64,
    pub enable_console: bool,
    pub json_format: bool,
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: None,
            sample_rate: 1.0,
            enable_console: true,
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            sample_rate: std::env::var("OTEL_SAMPLE_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            enable_console: std::env::var("LOG_CONSOLE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            json_format: std::env::var("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Install the global subscriber and propagator
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> = match (
        config.enable_console,
        config.json_format,
    ) {
        (false, _) => None,
        (true, true) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
        (true, false) => Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .boxed(),
        ),
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => Some(OpenTelemetryLayer::new(init_tracer(config, endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(otel_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Build the OTLP batch pipeline; installing it also sets the global provider
fn init_tracer(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<sdktrace::Tracer, Box<dyn std::error::Error>> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new(
            "deployment.environment",
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        ),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(5)),
        )
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(sampler(config.sample_rate))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    Ok(tracer)
}

fn sampler(sample_rate: f64) -> Sampler {
    if sample_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if sample_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sample_rate)))
    }
}

/// Flush pending spans
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

/// Span names
pub mod spans {
    pub const DELIVER_PROOF: &str = "witness.deliver_proof";
}

/// Read a remote trace context from message metadata
pub fn extract_context(metadata: &HashMap<String, String>) -> Context {
    TraceContextPropagator::new().extract(metadata)
}

/// Write `ctx` into message metadata
pub fn inject_context(metadata: &mut HashMap<String, String>, ctx: &Context) {
    TraceContextPropagator::new().inject_context(ctx, metadata);
}

/// Trace context of the current `tracing` span
pub fn current_context() -> Context {
    tracing::Span::current().context()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "anchor-witness");
        assert_eq!(config.sample_rate, 1.0);
        assert!(config.enable_console);
        assert!(!config.json_format);
    }

    #[test]
    fn test_context_round_trips_through_metadata() {
        let trace_id = TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
        let span_id = SpanId::from_hex("00f067aa0ba902b7").unwrap();
        let ctx = Context::new().with_remote_span_context(SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ));

        let mut metadata = HashMap::new();
        inject_context(&mut metadata, &ctx);
        assert_eq!(
            metadata.get("traceparent").map(String::as_str),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );

        let extracted = extract_context(&metadata);
        let span = extracted.span();
        let span_context = span.span_context();
        assert_eq!(span_context.trace_id(), trace_id);
        assert_eq!(span_context.span_id(), span_id);
        assert!(span_context.is_remote());
    }

    #[test]
    fn test_sampler_follows_rate() {
        assert!(matches!(sampler(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler(0.25), Sampler::ParentBased(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_otlp_tracer_feeds_span_context() {
        let config = TelemetryConfig {
            otlp_endpoint: Some("http://127.0.0.1:4317".to_string()),
            ..TelemetryConfig::default()
        };
        let tracer = init_tracer(&config, "http://127.0.0.1:4317").unwrap();
        let subscriber = tracing_subscriber::registry().with(OpenTelemetryLayer::new(tracer));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("deliver");
            let _entered = span.enter();
            assert!(current_context().span().span_context().is_valid());
        });
    }

    #[test]
    fn test_missing_metadata_has_no_parent() {
        let extracted = extract_context(&HashMap::new());
        assert!(!extracted.span().span_context().is_valid());
    }
}
