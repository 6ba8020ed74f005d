use crate::errors::ExecutionError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Handler used by steps that do not name one
pub const DEFAULT_STEP_HANDLER: &str = "item_step";

// ============================================================================
// Definition Models
// ============================================================================

/// JobType is the enumerated kind of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Import,
    Export,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Import => write!(f, "import"),
            JobType::Export => write!(f, "export"),
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(JobType::Import),
            "export" => Ok(JobType::Export),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// JobDefinition is a named, ordered sequence of steps loaded from a
/// connector's job fragment. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDefinition {
    /// Name of the fragment (connector) that declared the job
    pub connector: String,
    pub name: String,
    pub title: String,
    pub job_type: JobType,
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn step(&self, alias: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.alias == alias)
    }

    pub fn step_aliases(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.alias.as_str()).collect()
    }
}

/// StepDefinition describes one unit of work within a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    pub alias: String,
    pub title: String,
    pub handler_ref: String,
    /// setter name -> collaborator reference id
    pub services: IndexMap<String, String>,
    /// setter name -> scalar value
    pub parameters: IndexMap<String, serde_json::Value>,
}

impl StepDefinition {
    /// Create a step bound to the default item handler
    pub fn new(alias: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            title: title.into(),
            handler_ref: DEFAULT_STEP_HANDLER.to_string(),
            services: IndexMap::new(),
            parameters: IndexMap::new(),
        }
    }

    pub fn with_handler(mut self, handler_ref: impl Into<String>) -> Self {
        self.handler_ref = handler_ref.into();
        self
    }

    pub fn with_service(mut self, setter: impl Into<String>, reference: impl Into<String>) -> Self {
        self.services.insert(setter.into(), reference.into());
        self
    }

    pub fn with_parameter(mut self, setter: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(setter.into(), value);
        self
    }
}

// ============================================================================
// Execution Models
// ============================================================================

/// BatchStatus is shared by job and step executions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }

    /// Forward-only transitions. Re-saving the same status is allowed so
    /// that repeated updates stay idempotent.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (BatchStatus::Starting, BatchStatus::Running)
                | (BatchStatus::Starting, BatchStatus::Failed)
                | (BatchStatus::Running, BatchStatus::Completed)
                | (BatchStatus::Running, BatchStatus::Failed)
                | (BatchStatus::Running, BatchStatus::Stopped)
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Starting => write!(f, "STARTING"),
            BatchStatus::Running => write!(f, "RUNNING"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
            BatchStatus::Failed => write!(f, "FAILED"),
            BatchStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(BatchStatus::Starting),
            "RUNNING" => Ok(BatchStatus::Running),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            "STOPPED" => Ok(BatchStatus::Stopped),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

impl TryFrom<String> for BatchStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// JobInstance is a configured, runnable reference to a job definition.
/// Each run produces a new JobExecution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInstance {
    pub id: Uuid,
    pub job_name: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl JobInstance {
    pub fn new(job_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            label: label.into(),
            created_at: Utc::now(),
        }
    }
}

/// JobExecution is one timed run of a job instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_instance_id: Uuid,
    pub job_name: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_description: Option<String>,
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    /// Create a new execution in STARTING status
    pub fn new(instance: &JobInstance) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_instance_id: instance.id,
            job_name: instance.job_name.clone(),
            status: BatchStatus::Starting,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            exit_description: None,
            step_executions: Vec::new(),
        }
    }

    /// Move to `next`, stamping start/end times
    pub fn transition(&mut self, next: BatchStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == BatchStatus::Running && self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    pub fn step_execution(&self, alias: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|step| step.step_alias == alias)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// StepExecution holds persisted status and counters for one step of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepExecution {
    pub id: Uuid,
    pub job_execution_id: Uuid,
    pub step_alias: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub error_count: u64,
    pub warnings: Vec<String>,
    pub failure: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(job_execution_id: Uuid, step_alias: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_execution_id,
            step_alias: step_alias.into(),
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            error_count: 0,
            warnings: Vec::new(),
            failure: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn transition(&mut self, next: BatchStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == BatchStatus::Running && self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Record a skipped item
    pub fn add_warning(&mut self, reason: impl Into<String>) {
        self.error_count += 1;
        self.warnings.push(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_display() {
        for status in [
            BatchStatus::Starting,
            BatchStatus::Running,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Stopped,
        ] {
            assert_eq!(BatchStatus::from_str(&status.to_string()), Ok(status));
        }
    }

    #[test]
    fn test_terminal_statuses_do_not_resurrect() {
        for terminal in [BatchStatus::Completed, BatchStatus::Failed, BatchStatus::Stopped] {
            assert!(!terminal.can_transition_to(BatchStatus::Running));
            assert!(!terminal.can_transition_to(BatchStatus::Starting));
            assert!(terminal.can_transition_to(terminal));
        }
    }

    #[test]
    fn test_stop_only_from_running() {
        assert!(!BatchStatus::Starting.can_transition_to(BatchStatus::Stopped));
        assert!(BatchStatus::Running.can_transition_to(BatchStatus::Stopped));
    }

    #[test]
    fn test_job_execution_stamps_times() {
        let instance = JobInstance::new("product_import", "nightly");
        let mut execution = JobExecution::new(&instance);
        assert_eq!(execution.status, BatchStatus::Starting);
        assert!(execution.start_time.is_none());

        execution.transition(BatchStatus::Running).unwrap();
        assert!(execution.start_time.is_some());
        assert!(execution.end_time.is_none());

        execution.transition(BatchStatus::Completed).unwrap();
        assert!(execution.end_time.is_some());
        assert!(execution.duration_seconds().is_some());

        let err = execution.transition(BatchStatus::Running).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_step_builder_defaults_to_item_step() {
        let step = StepDefinition::new("import", "Import products")
            .with_service("reader", "acme.reader")
            .with_parameter("batch_size", serde_json::json!(50));
        assert_eq!(step.handler_ref, DEFAULT_STEP_HANDLER);
        assert_eq!(step.services.get("reader").map(String::as_str), Some("acme.reader"));
    }

    #[test]
    fn test_add_warning_counts_errors() {
        let mut step = StepExecution::new(Uuid::new_v4(), "import");
        step.add_warning("sku missing");
        assert_eq!(step.error_count, 1);
        assert_eq!(step.warnings, vec!["sku missing".to_string()]);
    }
}
