// Worker run loop: parse job requests and drive them through the launcher

use anyhow::{bail, Result};
use batch_common::engine::JobLauncher;
use batch_common::errors::ExecutionError;
use batch_common::models::{BatchStatus, JobExecution, JobInstance};
use futures::future::join_all;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

/// Label used when a request does not name one
pub const DEFAULT_LABEL: &str = "manual";

/// One job to run, given on the command line as `job_name` or
/// `job_name=label`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_name: String,
    pub label: String,
}

impl FromStr for JobRequest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (job_name, label) = match s.split_once('=') {
            Some((job_name, label)) => (job_name.trim(), label.trim()),
            None => (s.trim(), DEFAULT_LABEL),
        };

        if job_name.is_empty() {
            bail!("Invalid job request '{}': job name is empty", s);
        }
        if label.is_empty() {
            bail!("Invalid job request '{}': label is empty", s);
        }

        Ok(Self {
            job_name: job_name.to_string(),
            label: label.to_string(),
        })
    }
}

pub fn parse_job_requests<I>(args: I) -> Result<Vec<JobRequest>>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter().map(|arg| arg.parse()).collect()
}

/// Result of one requested run
#[derive(Debug)]
pub struct RunOutcome {
    pub request: JobRequest,
    pub result: Result<JobExecution, ExecutionError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(execution) if execution.status == BatchStatus::Completed)
    }
}

/// Run every request concurrently; each run's steps stay sequential
pub async fn run_jobs(launcher: Arc<JobLauncher>, requests: Vec<JobRequest>) -> Vec<RunOutcome> {
    let runs = requests.into_iter().map(|request| {
        let launcher = Arc::clone(&launcher);
        async move {
            let instance = JobInstance::new(&request.job_name, &request.label);
            let result = launcher.start(&instance).await;
            match &result {
                Ok(execution) => info!(
                    job_name = %request.job_name,
                    execution_id = %execution.id,
                    status = %execution.status,
                    exit_description = execution.exit_description.as_deref(),
                    "Job run finished"
                ),
                Err(e) => error!(job_name = %request.job_name, error = %e, "Job run failed"),
            }
            RunOutcome { request, result }
        }
    });

    join_all(runs).await
}

/// Process exit code: 0 when every run completed
pub fn exit_code(outcomes: &[RunOutcome]) -> i32 {
    if outcomes.iter().all(RunOutcome::is_success) {
        0
    } else {
        1
    }
}

/// Ask every in-flight run to stop after its current step
pub fn stop_all(launcher: &JobLauncher) -> usize {
    launcher
        .running()
        .into_iter()
        .filter(|execution_id| launcher.stop(*execution_id))
        .count()
}
