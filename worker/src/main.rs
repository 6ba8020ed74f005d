// Worker binary entry point
// Usage: batch-worker <job_name[=label]>...

use anyhow::{Context, Result};
use batch_common::bootstrap;
use batch_common::config::Settings;
use batch_common::engine::JobLauncher;
use batch_common::telemetry;
use batch_worker::{exit_code, parse_job_requests, run_jobs, stop_all};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!("Starting batch worker");

    let registry = Arc::new(bootstrap::load_job_registry(&settings)?);
    let measures = bootstrap::load_measure_manager(&settings)?;
    info!(families = ?measures.families(), "Measure configuration validated");

    let requests = parse_job_requests(std::env::args().skip(1))?;
    if requests.is_empty() {
        for job in registry.list() {
            info!(
                job_name = %job.name,
                connector = %job.connector,
                job_type = %job.job_type,
                steps = ?job.step_aliases(),
                "Available job"
            );
        }
        warn!("No job requested, nothing to run");
        return Ok(());
    }

    let repository = bootstrap::init_job_repository(&settings).await?;
    let services = Arc::new(bootstrap::build_service_registry(&settings)?);
    let handlers = Arc::new(bootstrap::build_handler_registry(&settings));
    let launcher = Arc::new(JobLauncher::new(registry, repository, services, handlers));

    let signal_launcher = Arc::clone(&launcher);
    let shutdown = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                let stopping = stop_all(&signal_launcher);
                info!(stopping, "Shutdown signal received, stopping after current steps");
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let outcomes = run_jobs(launcher, requests).await;
    shutdown.abort();

    let code = exit_code(&outcomes);
    info!(
        runs = outcomes.len(),
        succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
        "Batch worker finished"
    );

    telemetry::shutdown_tracer();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
