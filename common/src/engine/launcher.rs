// Job launcher - drives a job execution through its lifecycle

use super::StepExecutor;
use crate::db::repositories::JobRepository;
use crate::errors::ExecutionError;
use crate::models::{BatchStatus, JobDefinition, JobExecution, JobInstance};
use crate::registry::JobRegistry;
use crate::services::ServiceLocator;
use crate::step::HandlerRegistry;
use crate::telemetry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Cooperative stop request shared between a run and its controller
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs job instances. Steps of one run execute sequentially on the calling
/// task; distinct runs may be driven concurrently.
pub struct JobLauncher {
    registry: Arc<JobRegistry>,
    repository: Arc<dyn JobRepository>,
    step_executor: StepExecutor,
    running: Mutex<HashMap<Uuid, StopSignal>>,
}

/// Removes a run from the active set when it ends, however it ends
struct RunGuard<'a> {
    launcher: &'a JobLauncher,
    execution_id: Uuid,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.launcher.running_runs().remove(&self.execution_id);
    }
}

impl JobLauncher {
    pub fn new(
        registry: Arc<JobRegistry>,
        repository: Arc<dyn JobRepository>,
        locator: Arc<dyn ServiceLocator>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let step_executor = StepExecutor::new(Arc::clone(&repository), locator, handlers);
        Self {
            registry,
            repository,
            step_executor,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn running_runs(&self) -> MutexGuard<'_, HashMap<Uuid, StopSignal>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Execute a job instance to a terminal status
    ///
    /// Returns the final JobExecution for COMPLETED, FAILED (step failure) and
    /// STOPPED runs. Configuration defects are persisted as FAILED and
    /// returned as errors, as are unknown jobs and repository failures.
    #[instrument(skip(self, instance), fields(job_name = %instance.job_name, job_instance_id = %instance.id))]
    pub async fn start(&self, instance: &JobInstance) -> Result<JobExecution, ExecutionError> {
        let job = self.registry.get(&instance.job_name)?;

        let mut execution = self.repository.create_job_execution(instance).await?;
        if execution.status != BatchStatus::Starting {
            return Err(ExecutionError::InvalidTransition {
                from: execution.status,
                to: BatchStatus::Running,
            });
        }

        let signal = StopSignal::default();
        self.running_runs().insert(execution.id, signal.clone());
        let _guard = RunGuard {
            launcher: self,
            execution_id: execution.id,
        };

        info!(execution_id = %execution.id, step_count = job.steps.len(), "Job execution starting");

        match self.run_steps(&job, &mut execution, &signal).await {
            Ok(()) => {
                if let Some(duration) = execution.duration_seconds() {
                    telemetry::record_job_duration(&job.name, duration);
                }
                Ok(execution)
            }
            Err(e) if e.is_configuration_defect() => {
                self.fail(&mut execution, "configuration", e.to_string()).await?;
                Err(e)
            }
            Err(e) => {
                error!(execution_id = %execution.id, error = %e, "Job execution aborted");
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        job: &JobDefinition,
        execution: &mut JobExecution,
        signal: &StopSignal,
    ) -> Result<(), ExecutionError> {
        execution.transition(BatchStatus::Running)?;
        self.repository.update_job_execution(execution).await?;
        info!(execution_id = %execution.id, "Job execution running");

        for step in &job.steps {
            if signal.is_requested() {
                let description = format!("Stopped before step '{}'", step.alias);
                return self.record_stop(job, execution, description).await;
            }

            let step_execution = self.step_executor.execute(execution.id, step).await?;
            let failure = (step_execution.status == BatchStatus::Failed).then(|| {
                format!(
                    "Step '{}' failed: {}",
                    step.alias,
                    step_execution.failure.as_deref().unwrap_or("unknown error")
                )
            });
            execution.step_executions.push(step_execution);

            if let Some(description) = failure {
                self.fail(execution, "step_failed", description).await?;
                return Ok(());
            }
        }

        // A stop accepted during the last step still ends the run STOPPED
        if signal.is_requested() {
            return self
                .record_stop(job, execution, "Stopped after the last step".to_string())
                .await;
        }

        execution.transition(BatchStatus::Completed)?;
        self.repository.update_job_execution(execution).await?;
        info!(execution_id = %execution.id, "Job execution completed");
        telemetry::record_job_completed(&job.name);
        Ok(())
    }

    async fn record_stop(
        &self,
        job: &JobDefinition,
        execution: &mut JobExecution,
        description: String,
    ) -> Result<(), ExecutionError> {
        warn!(execution_id = %execution.id, description = %description, "Job execution stopped");
        execution.exit_description = Some(description);
        execution.transition(BatchStatus::Stopped)?;
        self.repository.update_job_execution(execution).await?;
        telemetry::record_job_stopped(&job.name);
        Ok(())
    }

    async fn fail(
        &self,
        execution: &mut JobExecution,
        reason: &str,
        description: String,
    ) -> Result<(), ExecutionError> {
        error!(execution_id = %execution.id, reason, description = %description, "Job execution failed");
        telemetry::record_job_failed(&execution.job_name, reason);
        execution.exit_description = Some(description);
        execution.transition(BatchStatus::Failed)?;
        self.repository.update_job_execution(execution).await?;
        Ok(())
    }

    /// Request a graceful stop. The step in flight finishes and the run is
    /// recorded STOPPED instead of starting another step, or instead of
    /// COMPLETED when that step was the last. Returns false if no such run
    /// is active.
    pub fn stop(&self, execution_id: Uuid) -> bool {
        match self.running_runs().get(&execution_id) {
            Some(signal) => {
                info!(execution_id = %execution_id, "Stop requested");
                signal.request();
                true
            }
            None => false,
        }
    }

    /// Executions currently in flight
    pub fn running(&self) -> Vec<Uuid> {
        self.running_runs().keys().copied().collect()
    }
}
