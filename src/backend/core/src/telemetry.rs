//! Logging, tracing and metrics setup.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry_otlp::WithExportConfig;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::ObservabilityConfig;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides `observability.log_level`. Spans are exported over
/// OTLP when an endpoint is configured.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json_logging {
        Box::new(fmt::layer().json().with_target(true))
    } else {
        Box::new(fmt::layer().pretty().with_target(true))
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                        ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter)
        .try_init()?;

    Ok(())
}

/// Flush and stop the OpenTelemetry pipeline.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Serve Prometheus metrics on `addr` and register descriptions.
pub fn install_metrics_exporter(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_metrics();
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Register all metric descriptions with the installed recorder.
fn describe_metrics() {
    // Counters
    describe_counter!("chainchat_poll_ticks_total", "Poll ticks by outcome");
    describe_counter!("chainchat_events_fetched_total", "Events returned by the source");
    describe_counter!(
        "chainchat_events_deduplicated_total",
        "Events skipped because this process already persisted them"
    );
    describe_counter!(
        "chainchat_events_undecodable_total",
        "Source events skipped because they could not be decoded"
    );
    describe_counter!("chainchat_messages_inserted_total", "New chat messages stored");
    describe_counter!(
        "chainchat_messages_duplicate_total",
        "Inserts that found the message already stored"
    );
    describe_counter!("chainchat_insert_failures_total", "Failed message inserts");
    describe_counter!(
        "chainchat_cursor_persist_failures_total",
        "Cursor writes that failed"
    );
    describe_counter!("chainchat_fanout_deliveries_total", "Subscriber callbacks invoked");
    describe_counter!(
        "chainchat_fanout_callback_panics_total",
        "Subscriber callbacks that panicked"
    );
    describe_counter!("chainchat_errors_total", "Errors by code and category");

    // Gauges
    describe_gauge!("chainchat_fanout_subscribers", "Registered fanout subscribers");

    // Histograms
    describe_histogram!(
        "chainchat_poll_tick_duration_seconds",
        "Wall time of one poll tick in seconds"
    );
}
