// Bootstrap utilities for binary initialization
// Builds the engine's collaborators from Settings

use crate::config::{ServiceConfig, ServiceKind, Settings};
use crate::db::repositories::{InMemoryJobRepository, JobRepository, PostgresJobRepository};
use crate::db::DbPool;
use crate::loader::{load_job_definitions, load_measure_config};
use crate::measure::MeasureManager;
use crate::registry::JobRegistry;
use crate::services::{Service, ServiceRegistry};
use crate::step::{CsvFileReader, CsvFileWriter, HandlerRegistry, PassthroughProcessor};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Initialize database pool, applying migrations when configured
///
/// # Errors
/// Returns error if no database is configured or the pool cannot connect
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    let database = settings
        .database
        .as_ref()
        .context("No database configured")?;

    info!("Initializing database pool");
    let db_pool = DbPool::new(database)
        .await
        .context("Failed to initialize database pool")?;

    if database.run_migrations {
        db_pool
            .run_migrations()
            .await
            .context("Failed to apply database migrations")?;
    }

    info!("Database pool initialized");
    Ok(db_pool)
}

/// PostgreSQL repository when a database is configured, in-memory otherwise
#[tracing::instrument(skip(settings))]
pub async fn init_job_repository(settings: &Settings) -> Result<Arc<dyn JobRepository>> {
    if settings.database.is_some() {
        let db_pool = init_database_pool(settings).await?;
        let server_version = db_pool
            .health_check()
            .await
            .context("Database health check failed")?;
        info!(server_version = %server_version, "Using PostgreSQL job repository");
        Ok(Arc::new(PostgresJobRepository::new(db_pool)))
    } else {
        info!("No database configured, using in-memory job repository");
        Ok(Arc::new(InMemoryJobRepository::new()))
    }
}

/// Load, merge and validate every module's job fragment into a frozen registry
///
/// # Errors
/// Any configuration error is fatal
#[tracing::instrument(skip(settings), fields(module_count = settings.batch.modules.len()))]
pub fn load_job_registry(settings: &Settings) -> Result<JobRegistry> {
    let definitions = load_job_definitions(&settings.batch.modules)
        .context("Failed to load job definitions")?;
    let registry =
        JobRegistry::from_definitions(definitions).context("Failed to register job definitions")?;

    info!(job_count = registry.len(), "Job registry loaded and frozen");
    Ok(registry)
}

/// Load and merge every module's measure fragment
#[tracing::instrument(skip(settings))]
pub fn load_measure_manager(settings: &Settings) -> Result<MeasureManager> {
    let config =
        load_measure_config(&settings.batch.modules).context("Failed to load measure config")?;
    let manager = MeasureManager::new(config);

    info!(family_count = manager.families().len(), "Measure families loaded");
    Ok(manager)
}

fn build_service(config: &ServiceConfig) -> Result<Service> {
    let path = || {
        config
            .path
            .clone()
            .with_context(|| format!("Service '{}' requires a path", config.id))
    };

    let service = match config.kind {
        ServiceKind::CsvReader => {
            Service::Reader(Arc::new(CsvFileReader::new(path()?, config.delimiter)))
        }
        ServiceKind::CsvWriter => {
            Service::Writer(Arc::new(CsvFileWriter::new(path()?, config.delimiter)))
        }
        ServiceKind::Passthrough => Service::Processor(Arc::new(PassthroughProcessor)),
    };
    Ok(service)
}

/// Register the collaborators declared in settings
pub fn build_service_registry(settings: &Settings) -> Result<ServiceRegistry> {
    let mut registry = ServiceRegistry::new();
    for config in &settings.services {
        registry.register(config.id.clone(), build_service(config)?);
    }

    info!(service_count = registry.len(), "Service registry built");
    Ok(registry)
}

/// Handlers known to the engine, with the configured default batch size
pub fn build_handler_registry(settings: &Settings) -> HandlerRegistry {
    HandlerRegistry::with_default_batch_size(settings.batch.default_batch_size)
}
