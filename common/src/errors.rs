// Error handling framework
// One enum per concern, converted at the seams with `From`

use crate::models::BatchStatus;
use thiserror::Error;
use uuid::Uuid;

/// Load-time configuration errors. These are fatal: the process must not
/// start with an invalid job configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Configuration conflict: '{key}' is declared by both '{first}' and '{second}'")]
    ConfigConflict {
        key: String,
        first: String,
        second: String,
    },

    #[error("Schema validation failed at '{path}': {reason}")]
    SchemaValidation { path: String, reason: String },
}

impl ConfigError {
    pub fn schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::SchemaValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Job definition registry misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Registry is frozen, cannot register job: {0}")]
    RegistryFrozen(String),
}

/// Persistence gateway errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Execution {id} cannot move from {from} to {to}")]
    StatusRegression {
        id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    },
}

/// Errors raised by a step handler or one of its collaborators
#[derive(Error, Debug)]
pub enum StepError {
    /// The item is rejected but the step goes on
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Missing service for setter '{0}'")]
    MissingService(String),

    #[error("Service '{setter}' has the wrong capability, expected {expected}")]
    WrongCapability { setter: String, expected: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Step handler panicked: {0}")]
    Panicked(String),

    #[error("Step failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Run-time job execution errors surfaced to the caller of the launcher
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Step '{step}' references unknown collaborator '{reference}' for setter '{setter}'")]
    UnresolvedReference {
        step: String,
        setter: String,
        reference: String,
    },

    #[error("Step '{step}' uses unknown handler '{handler}'")]
    UnknownHandler { step: String, handler: String },

    #[error("Step '{step}' is misconfigured: {reason}")]
    InvalidStepConfiguration { step: String, reason: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl ExecutionError {
    /// Configuration defects discovered at run time. They fail the run and
    /// are returned to the caller instead of being recorded as step failures.
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            ExecutionError::UnresolvedReference { .. }
                | ExecutionError::UnknownHandler { .. }
                | ExecutionError::InvalidStepConfiguration { .. }
        )
    }
}

/// Unit-of-measure lookups
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasureError {
    #[error("Undefined measure family \"{0}\"")]
    UndefinedFamily(String),

    #[error("Undefined unit \"{unit}\" in measure family \"{family}\"")]
    UndefinedUnit { family: String, unit: String },
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => RepositoryError::DuplicateKey(db_err.message().to_string()),
                        _ => RepositoryError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    RepositoryError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => RepositoryError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for RepositoryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RepositoryError::MigrationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_path() {
        let err = ConfigError::schema("acme.jobs.import.steps[0].title", "missing required field");
        assert!(err.to_string().contains("acme.jobs.import.steps[0].title"));
    }

    #[test]
    fn test_conflict_names_both_modules() {
        let err = ConfigError::ConfigConflict {
            key: "product_import".to_string(),
            first: "catalog".to_string(),
            second: "erp".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("catalog"));
        assert!(msg.contains("erp"));
    }

    #[test]
    fn test_configuration_defects() {
        let unresolved = ExecutionError::UnresolvedReference {
            step: "import".to_string(),
            setter: "reader".to_string(),
            reference: "acme.reader".to_string(),
        };
        assert!(unresolved.is_configuration_defect());

        let missing = ExecutionError::Registry(RegistryError::NotFound("x".to_string()));
        assert!(!missing.is_configuration_defect());
    }

    #[test]
    fn test_status_regression_display() {
        let err = RepositoryError::StatusRegression {
            id: Uuid::nil(),
            from: BatchStatus::Completed,
            to: BatchStatus::Running,
        };
        assert!(err.to_string().contains("COMPLETED"));
    }
}
