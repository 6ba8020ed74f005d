// SQL query constants for the batch repository

/// SQL for job_executions
pub mod job_execution_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, job_instance_id, job_name, status,
        created_at, start_time, end_time, exit_description"#;

    pub const INSERT: &str = r#"
        INSERT INTO job_executions (
            id, job_instance_id, job_name, status,
            created_at, start_time, end_time, exit_description
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

    pub const LOCK_STATUS: &str = "SELECT status FROM job_executions WHERE id = $1 FOR UPDATE";

    pub const UPDATE: &str = r#"
        UPDATE job_executions
        SET status = $2,
            start_time = $3,
            end_time = $4,
            exit_description = $5
        WHERE id = $1
        "#;
}

/// SQL for job_instances
pub mod job_instance_queries {
    pub const INSERT_IF_ABSENT: &str = r#"
        INSERT INTO job_instances (id, job_name, label, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO NOTHING
        "#;
}

/// SQL for step_executions. Rows are ordered by `seq`, the insertion order.
pub mod step_execution_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, job_execution_id, step_alias, status,
        read_count, write_count, filter_count, error_count,
        COALESCE(warnings, '[]'::jsonb) as warnings,
        failure, start_time, end_time"#;

    pub const LOCK_STATUS: &str = "SELECT status FROM step_executions WHERE id = $1 FOR UPDATE";

    pub const UPSERT: &str = r#"
        INSERT INTO step_executions (
            id, job_execution_id, step_alias, status,
            read_count, write_count, filter_count, error_count,
            warnings, failure, start_time, end_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            read_count = EXCLUDED.read_count,
            write_count = EXCLUDED.write_count,
            filter_count = EXCLUDED.filter_count,
            error_count = EXCLUDED.error_count,
            warnings = EXCLUDED.warnings,
            failure = EXCLUDED.failure,
            start_time = EXCLUDED.start_time,
            end_time = EXCLUDED.end_time
        "#;
}
