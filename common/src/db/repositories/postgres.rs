// PostgreSQL job repository
// Status checks run under a row lock so concurrent updates of one execution
// are serialized by the database.

use super::queries::{job_execution_queries, job_instance_queries, step_execution_queries};
use super::{check_transition, JobRepository};
use crate::db::DbPool;
use crate::errors::RepositoryError;
use crate::models::{BatchStatus, JobExecution, JobInstance, StepExecution};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

/// Job repository persisting to the `job_instances`, `job_executions` and
/// `step_executions` tables
pub struct PostgresJobRepository {
    pool: DbPool,
}

impl PostgresJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn locked_status(
        tx: &mut Transaction<'_, Postgres>,
        query: &str,
        id: Uuid,
    ) -> Result<Option<BatchStatus>, RepositoryError> {
        let row = sqlx::query(query).bind(id).fetch_optional(&mut **tx).await?;
        row.map(|row| parse_status(row.try_get("status")?))
            .transpose()
    }
}

fn parse_status(value: String) -> Result<BatchStatus, RepositoryError> {
    BatchStatus::from_str(&value).map_err(RepositoryError::QueryFailed)
}

fn job_execution_from_row(row: &PgRow) -> Result<JobExecution, RepositoryError> {
    Ok(JobExecution {
        id: row.try_get("id")?,
        job_instance_id: row.try_get("job_instance_id")?,
        job_name: row.try_get("job_name")?,
        status: parse_status(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        exit_description: row.try_get("exit_description")?,
        step_executions: Vec::new(),
    })
}

fn step_execution_from_row(row: &PgRow) -> Result<StepExecution, RepositoryError> {
    let warnings: serde_json::Value = row.try_get("warnings")?;
    let warnings: Vec<String> = serde_json::from_value(warnings)
        .map_err(|e| RepositoryError::QueryFailed(format!("Failed to parse warnings: {}", e)))?;
    let count = |column: &str| -> Result<u64, RepositoryError> {
        let value: i64 = row.try_get(column)?;
        Ok(value.max(0) as u64)
    };

    Ok(StepExecution {
        id: row.try_get("id")?,
        job_execution_id: row.try_get("job_execution_id")?,
        step_alias: row.try_get("step_alias")?,
        status: parse_status(row.try_get("status")?)?,
        read_count: count("read_count")?,
        write_count: count("write_count")?,
        filter_count: count("filter_count")?,
        error_count: count("error_count")?,
        warnings,
        failure: row.try_get("failure")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
    })
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self, instance), fields(job_name = %instance.job_name))]
    async fn create_job_execution(
        &self,
        instance: &JobInstance,
    ) -> Result<JobExecution, RepositoryError> {
        let execution = JobExecution::new(instance);
        let mut tx = self.pool.pool().begin().await?;

        sqlx::query(job_instance_queries::INSERT_IF_ABSENT)
            .bind(instance.id)
            .bind(&instance.job_name)
            .bind(&instance.label)
            .bind(instance.created_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(job_execution_queries::INSERT)
            .bind(execution.id)
            .bind(execution.job_instance_id)
            .bind(&execution.job_name)
            .bind(execution.status.to_string())
            .bind(execution.created_at)
            .bind(execution.start_time)
            .bind(execution.end_time)
            .bind(&execution.exit_description)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(execution_id = %execution.id, "Execution created");
        Ok(execution)
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, status = %execution.status))]
    async fn update_job_execution(
        &self,
        execution: &JobExecution,
    ) -> Result<JobExecution, RepositoryError> {
        let mut tx = self.pool.pool().begin().await?;

        let current = Self::locked_status(&mut tx, job_execution_queries::LOCK_STATUS, execution.id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Execution not found: {}", execution.id)))?;
        check_transition(execution.id, current, execution.status)?;

        sqlx::query(job_execution_queries::UPDATE)
            .bind(execution.id)
            .bind(execution.status.to_string())
            .bind(execution.start_time)
            .bind(execution.end_time)
            .bind(&execution.exit_description)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Execution updated");
        Ok(execution.clone())
    }

    #[instrument(skip(self, step_execution), fields(step_execution_id = %step_execution.id, status = %step_execution.status))]
    async fn update_step_execution(
        &self,
        step_execution: &StepExecution,
    ) -> Result<StepExecution, RepositoryError> {
        let mut tx = self.pool.pool().begin().await?;

        if let Some(current) =
            Self::locked_status(&mut tx, step_execution_queries::LOCK_STATUS, step_execution.id).await?
        {
            check_transition(step_execution.id, current, step_execution.status)?;
        }

        let warnings = serde_json::to_value(&step_execution.warnings)
            .map_err(|e| RepositoryError::QueryFailed(format!("Failed to encode warnings: {}", e)))?;

        sqlx::query(step_execution_queries::UPSERT)
            .bind(step_execution.id)
            .bind(step_execution.job_execution_id)
            .bind(&step_execution.step_alias)
            .bind(step_execution.status.to_string())
            .bind(step_execution.read_count as i64)
            .bind(step_execution.write_count as i64)
            .bind(step_execution.filter_count as i64)
            .bind(step_execution.error_count as i64)
            .bind(warnings)
            .bind(&step_execution.failure)
            .bind(step_execution.start_time)
            .bind(step_execution.end_time)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Step execution updated");
        Ok(step_execution.clone())
    }

    #[instrument(skip(self))]
    async fn find_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM job_executions WHERE id = $1",
            job_execution_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        match row {
            Some(row) => {
                let mut execution = job_execution_from_row(&row)?;
                execution.step_executions = self.find_step_executions(id).await?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_step_executions(
        &self,
        job_execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM step_executions WHERE job_execution_id = $1 ORDER BY seq",
            step_execution_queries::SELECT_ALL_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(job_execution_id)
            .fetch_all(self.pool.pool())
            .await?;

        rows.iter().map(step_execution_from_row).collect()
    }
}
