//! Repository for the `execution_logs` table.

use scriptd_core::scripting::status::ExecutionStatus;
use scriptd_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::execution_log::{ExecutionLog, FinishLog};

/// Column list for `execution_logs` queries.
const COLUMNS: &str = "\
    id, script_id, started_at, ended_at, exit_code, \
    output, status, duration_ms, error_message";

/// Provides query operations for execution logs.
pub struct ExecutionLogRepo;

impl ExecutionLogRepo {
    /// Create a log row with status `running`.
    pub async fn create(
        pool: &PgPool,
        script_id: DbId,
        started_at: Timestamp,
    ) -> Result<ExecutionLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO execution_logs (script_id, started_at, status) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExecutionLog>(&query)
            .bind(script_id)
            .bind(started_at)
            .bind(ExecutionStatus::Running.as_str())
            .fetch_one(pool)
            .await
    }

    /// Write the terminal values of a run.
    ///
    /// Only a row still in `running` is updated; returns whether it was.
    pub async fn finish(pool: &PgPool, id: DbId, finish: &FinishLog) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE execution_logs SET \
                status = $2, \
                exit_code = $3, \
                output = $4, \
                duration_ms = $5, \
                error_message = $6, \
                ended_at = $7 \
             WHERE id = $1 AND status = $8",
        )
        .bind(id)
        .bind(finish.status.as_str())
        .bind(finish.exit_code)
        .bind(&finish.output)
        .bind(finish.duration_ms)
        .bind(&finish.error_message)
        .bind(finish.ended_at)
        .bind(ExecutionStatus::Running.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Find a log by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ExecutionLog>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM execution_logs WHERE id = $1");
        sqlx::query_as::<_, ExecutionLog>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List logs for a script, newest first, paginated.
    pub async fn list_by_script(
        pool: &PgPool,
        script_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM execution_logs \
             WHERE script_id = $1 \
             ORDER BY started_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ExecutionLog>(&query)
            .bind(script_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Count logs for a script.
    pub async fn count_by_script(pool: &PgPool, script_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM execution_logs WHERE script_id = $1")
            .bind(script_id)
            .fetch_one(pool)
            .await
    }

    /// Delete a log. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM execution_logs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every `running` row as `failed` with `message`.
    ///
    /// Returns the number of rows updated.
    pub async fn fail_running(
        pool: &PgPool,
        message: &str,
        ended_at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE execution_logs SET \
                status = $1, \
                error_message = $2, \
                ended_at = $3 \
             WHERE status = $4",
        )
        .bind(ExecutionStatus::Failed.as_str())
        .bind(message)
        .bind(ended_at)
        .bind(ExecutionStatus::Running.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
