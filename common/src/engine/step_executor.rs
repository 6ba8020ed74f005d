// Step executor - resolves one step's collaborators, runs its handler and
// records the step's status changes

use crate::db::repositories::JobRepository;
use crate::errors::{ExecutionError, StepError};
use crate::models::{BatchStatus, StepDefinition, StepExecution};
use crate::services::ServiceLocator;
use crate::step::{HandlerRegistry, StepConfig, StepContext, StepHandler};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Executes individual job steps
pub struct StepExecutor {
    repository: Arc<dyn JobRepository>,
    locator: Arc<dyn ServiceLocator>,
    handlers: Arc<HandlerRegistry>,
}

impl StepExecutor {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        locator: Arc<dyn ServiceLocator>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            repository,
            locator,
            handlers,
        }
    }

    /// Resolve the step's service references through the locator
    pub fn resolve(&self, step: &StepDefinition) -> Result<StepConfig, ExecutionError> {
        let mut config = StepConfig::new(&step.alias);
        for (setter, reference) in &step.services {
            let service = self.locator.resolve(reference).ok_or_else(|| {
                ExecutionError::UnresolvedReference {
                    step: step.alias.clone(),
                    setter: setter.clone(),
                    reference: reference.clone(),
                }
            })?;
            config.services.insert(setter.clone(), service);
        }
        config.parameters = step.parameters.clone();
        Ok(config)
    }

    /// Build the step's handler from its resolved configuration
    pub fn build_handler(
        &self,
        step: &StepDefinition,
        config: &StepConfig,
    ) -> Result<Box<dyn StepHandler>, ExecutionError> {
        let factory =
            self.handlers
                .factory(&step.handler_ref)
                .ok_or_else(|| ExecutionError::UnknownHandler {
                    step: step.alias.clone(),
                    handler: step.handler_ref.clone(),
                })?;

        factory(config).map_err(|e| ExecutionError::InvalidStepConfiguration {
            step: step.alias.clone(),
            reason: e.to_string(),
        })
    }

    /// Run one step to a terminal status
    ///
    /// Configuration defects are returned before any StepExecution exists.
    /// Handler errors and panics produce a FAILED StepExecution; repository
    /// errors abort with `ExecutionError::Repository`.
    #[instrument(skip(self, step), fields(step_alias = %step.alias, handler = %step.handler_ref))]
    pub async fn execute(
        &self,
        job_execution_id: Uuid,
        step: &StepDefinition,
    ) -> Result<StepExecution, ExecutionError> {
        let config = self.resolve(step)?;
        let handler = self.build_handler(step, &config)?;

        let mut step_execution = StepExecution::new(job_execution_id, &step.alias);
        self.repository.update_step_execution(&step_execution).await?;

        step_execution.transition(BatchStatus::Running)?;
        self.repository.update_step_execution(&step_execution).await?;
        info!(step_execution_id = %step_execution.id, "Step started");

        let mut ctx = StepContext::new(step_execution, Arc::clone(&self.repository));
        let outcome = AssertUnwindSafe(handler.execute(&mut ctx))
            .catch_unwind()
            .await;
        let mut step_execution = ctx.into_step_execution();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(StepError::Repository(e))) => return Err(e.into()),
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(StepError::Panicked(panic_message(panic.as_ref()))),
        };

        match failure {
            None => {
                step_execution.transition(BatchStatus::Completed)?;
                info!(
                    read_count = step_execution.read_count,
                    write_count = step_execution.write_count,
                    "Step completed"
                );
            }
            Some(e) => {
                error!(error = %e, "Step failed");
                step_execution.failure = Some(e.to_string());
                step_execution.transition(BatchStatus::Failed)?;
            }
        }

        self.repository.update_step_execution(&step_execution).await?;
        Ok(step_execution)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{InMemoryJobRepository, MockJobRepository};
    use crate::errors::RepositoryError;
    use crate::models::JobInstance;
    use crate::services::{Service, ServiceRegistry};
    use crate::step::{MemoryReader, MemoryWriter};
    use async_trait::async_trait;
    use serde_json::json;

    struct Exploding;

    #[async_trait]
    impl StepHandler for Exploding {
        async fn execute(&self, _ctx: &mut StepContext) -> Result<(), StepError> {
            panic!("boom");
        }
    }

    fn services() -> Arc<ServiceRegistry> {
        Arc::new(
            ServiceRegistry::new()
                .with(
                    "acme.reader",
                    Service::Reader(Arc::new(MemoryReader::new(vec![json!(1), json!(2)]))),
                )
                .with("acme.writer", Service::Writer(Arc::new(MemoryWriter::new()))),
        )
    }

    fn handlers() -> Arc<HandlerRegistry> {
        let mut handlers = HandlerRegistry::with_defaults();
        handlers.register("exploding", |_config: &StepConfig| {
            Ok(Box::new(Exploding) as Box<dyn StepHandler>)
        });
        Arc::new(handlers)
    }

    fn item_step() -> StepDefinition {
        StepDefinition::new("import", "Import")
            .with_service("reader", "acme.reader")
            .with_service("writer", "acme.writer")
    }

    async fn running_execution(repository: &InMemoryJobRepository) -> Uuid {
        repository
            .create_job_execution(&JobInstance::new("numbers", "test"))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_item_step_completes() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let execution_id = running_execution(&repository).await;
        let executor = StepExecutor::new(repository.clone(), services(), handlers());

        let step_execution = executor.execute(execution_id, &item_step()).await.unwrap();
        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.read_count, 2);
        assert_eq!(step_execution.write_count, 2);
        assert!(step_execution.start_time.is_some());
        assert!(step_execution.end_time.is_some());
    }

    #[tokio::test]
    async fn test_unresolved_reference_creates_no_step_execution() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let execution_id = running_execution(&repository).await;
        let executor = StepExecutor::new(repository.clone(), services(), handlers());
        let step = item_step().with_service("processor", "acme.missing");

        let err = executor.execute(execution_id, &step).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::UnresolvedReference { ref setter, ref reference, .. }
                if setter == "processor" && reference == "acme.missing"
        ));
        assert!(repository.find_step_executions(execution_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let executor = StepExecutor::new(repository, services(), handlers());
        let step = StepDefinition::new("cleanup", "Cleanup").with_handler("tasklet");

        let err = executor.execute(Uuid::new_v4(), &step).await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownHandler { .. }));
    }

    #[tokio::test]
    async fn test_invalid_step_configuration() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let executor = StepExecutor::new(repository, services(), handlers());
        let step = item_step().with_parameter("batch_size", json!(0));

        let err = executor.execute(Uuid::new_v4(), &step).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidStepConfiguration { .. }));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let execution_id = running_execution(&repository).await;
        let executor = StepExecutor::new(repository.clone(), services(), handlers());
        let step = StepDefinition::new("explode", "Explode").with_handler("exploding");

        let step_execution = executor.execute(execution_id, &step).await.unwrap();
        assert_eq!(step_execution.status, BatchStatus::Failed);
        assert!(step_execution.failure.as_deref().unwrap().contains("boom"));

        let stored = repository.find_step_executions(execution_id).await.unwrap();
        assert_eq!(stored[0].status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_repository_failure_aborts() {
        let mut repository = MockJobRepository::new();
        repository
            .expect_update_step_execution()
            .returning(|_| Err(RepositoryError::ConnectionFailed("down".to_string())));
        let executor = StepExecutor::new(Arc::new(repository), services(), handlers());

        let err = executor.execute(Uuid::new_v4(), &item_step()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Repository(RepositoryError::ConnectionFailed(_))));
    }
}
