// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "batch-engine";

/// Install the global subscriber: JSON lines with span context, filtered by
/// `RUST_LOG` or else `log_level`, plus OTLP export when `tracing_endpoint`
/// is set. Fails if a subscriber is already installed.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    // None when no endpoint is configured
    let otel_layer = tracing_endpoint
        .map(init_tracer)
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// OTLP span exporter with service name and version as resource attributes
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the batch metrics:
/// - batch_job_completed_total / batch_job_failed_total / batch_job_stopped_total
/// - batch_job_duration_seconds
/// - batch_step_items_total
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "batch_job_completed_total",
        "Total number of job executions that completed"
    );
    describe_counter!(
        "batch_job_failed_total",
        "Total number of job executions that failed"
    );
    describe_counter!(
        "batch_job_stopped_total",
        "Total number of job executions stopped on request"
    );
    describe_histogram!(
        "batch_job_duration_seconds",
        "Duration of job executions in seconds"
    );
    describe_counter!(
        "batch_step_items_total",
        "Total number of items written by item steps"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_job_completed(job_name: &str) {
    counter!("batch_job_completed_total", "job_name" => job_name.to_string()).increment(1);
}

#[inline]
pub fn record_job_failed(job_name: &str, reason: &str) {
    counter!(
        "batch_job_failed_total",
        "job_name" => job_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_job_stopped(job_name: &str) {
    counter!("batch_job_stopped_total", "job_name" => job_name.to_string()).increment(1);
}

#[inline]
pub fn record_job_duration(job_name: &str, duration_seconds: f64) {
    histogram!("batch_job_duration_seconds", "job_name" => job_name.to_string())
        .record(duration_seconds);
}

/// Count items written by a step
#[inline]
pub fn record_step_items(step_alias: &str, count: u64) {
    counter!("batch_step_items_total", "step_alias" => step_alias.to_string()).increment(count);
}
