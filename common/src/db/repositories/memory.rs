// In-process job repository, used when no database is configured and in tests

use super::{check_transition, JobRepository};
use crate::errors::RepositoryError;
use crate::models::{JobExecution, JobInstance, StepExecution};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Store {
    instances: HashMap<Uuid, JobInstance>,
    executions: IndexMap<Uuid, JobExecution>,
    // step executions in creation order
    steps: IndexMap<Uuid, StepExecution>,
}

/// Job repository backed by in-memory maps
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    store: RwLock<Store>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find_job_instance(&self, id: Uuid) -> Option<JobInstance> {
        self.store.read().await.instances.get(&id).cloned()
    }

    /// All executions of a job instance, oldest first
    pub async fn executions_of(&self, job_instance_id: Uuid) -> Vec<JobExecution> {
        self.store
            .read()
            .await
            .executions
            .values()
            .filter(|execution| execution.job_instance_id == job_instance_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    #[instrument(skip(self, instance), fields(job_name = %instance.job_name))]
    async fn create_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<JobExecution, RepositoryError> {
        let execution = JobExecution::new(instance);
        let mut store = self.store.write().await;
        store
            .instances
            .entry(instance.id)
            .or_insert_with(|| instance.clone());
        store.executions.insert(execution.id, execution.clone());

        debug!(execution_id = %execution.id, "Execution created");
        Ok(execution)
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, status = %execution.status))]
    async fn update_job_execution(
        &self,
        execution: &JobExecution,
    ) -> Result<JobExecution, RepositoryError> {
        let mut store = self.store.write().await;
        let stored = store
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Execution not found: {}", execution.id)))?;
        check_transition(execution.id, stored.status, execution.status)?;

        // step executions are kept in their own table
        let mut record = execution.clone();
        record.step_executions.clear();
        *stored = record;
        Ok(execution.clone())
    }

    #[instrument(skip(self, step_execution), fields(step_execution_id = %step_execution.id, status = %step_execution.status))]
    async fn update_step_execution(
        &self,
        step_execution: &StepExecution,
    ) -> Result<StepExecution, RepositoryError> {
        let mut store = self.store.write().await;
        if !store.executions.contains_key(&step_execution.job_execution_id) {
            return Err(RepositoryError::NotFound(format!(
                "Execution not found: {}",
                step_execution.job_execution_id
            )));
        }

        if let Some(stored) = store.steps.get(&step_execution.id) {
            check_transition(step_execution.id, stored.status, step_execution.status)?;
        }
        store.steps.insert(step_execution.id, step_execution.clone());
        Ok(step_execution.clone())
    }

    async fn find_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.executions.get(&id).map(|execution| {
            let mut execution = execution.clone();
            execution.step_executions = store
                .steps
                .values()
                .filter(|step| step.job_execution_id == id)
                .cloned()
                .collect();
            execution
        }))
    }

    async fn find_step_executions(
        &self,
        job_execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        Ok(self
            .store
            .read()
            .await
            .steps
            .values()
            .filter(|step| step.job_execution_id == job_execution_id)
            .cloned()
            .collect())
    }
}
