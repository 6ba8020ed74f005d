// Persistence gateway for job, job execution and step execution records

pub mod memory;
pub mod postgres;
pub mod queries;

use crate::errors::RepositoryError;
use crate::models::{BatchStatus, JobExecution, JobInstance, StepExecution};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::InMemoryJobRepository;
pub use postgres::PostgresJobRepository;

/// Storage contract the execution engine depends on. The engine never
/// persists anything except through these calls.
///
/// Implementations must make concurrent calls safe per execution id and
/// must reject a status that moves backwards.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create and persist a new execution of `instance` in STARTING status.
    /// The record is visible to other observers before this returns.
    async fn create_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<JobExecution, RepositoryError>;

    /// Persist the current state of a job execution
    async fn update_job_execution(
        &self,
        execution: &JobExecution,
    ) -> Result<JobExecution, RepositoryError>;

    /// Persist the current state of a step execution, creating it on first call
    async fn update_step_execution(
        &self,
        step_execution: &StepExecution,
    ) -> Result<StepExecution, RepositoryError>;

    /// Load an execution with its step executions in creation order
    async fn find_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, RepositoryError>;

    async fn find_step_executions(
        &self,
        job_execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError>;
}

/// Reject a status change that moves an execution backwards
pub(crate) fn check_transition(
    id: Uuid,
    from: BatchStatus,
    to: BatchStatus,
) -> Result<(), RepositoryError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(RepositoryError::StatusRegression { id, from, to })
    }
}
