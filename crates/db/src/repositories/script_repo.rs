//! Repository for the `scripts` table.

use scriptd_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::script::{CreateScript, Script, ScriptFilter, UpdateScript};

/// Column list for `scripts` queries.
const COLUMNS: &str = "\
    id, name, code, language, cron_expression, \
    variables, packages, is_enabled, \
    shared_script_id, library_id, timeout_secs, \
    created_at, updated_at";

/// Provides CRUD operations for scripts.
pub struct ScriptRepo;

impl ScriptRepo {
    /// Insert a new script, returning the created row.
    pub async fn create(pool: &PgPool, dto: &CreateScript) -> Result<Script, sqlx::Error> {
        let query = format!(
            "INSERT INTO scripts \
                (name, code, language, cron_expression, variables, packages, \
                 is_enabled, shared_script_id, library_id, timeout_secs) \
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, true), $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Script>(&query)
            .bind(&dto.name)
            .bind(&dto.code)
            .bind(dto.language.as_str())
            .bind(&dto.cron_expression)
            .bind(Json(&dto.variables))
            .bind(Json(&dto.packages))
            .bind(dto.is_enabled)
            .bind(dto.shared_script_id)
            .bind(dto.library_id)
            .bind(dto.timeout_secs)
            .fetch_one(pool)
            .await
    }

    /// Find a script by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Script>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scripts WHERE id = $1");
        sqlx::query_as::<_, Script>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List scripts matching `filter`, ordered by ID.
    pub async fn list(pool: &PgPool, filter: ScriptFilter) -> Result<Vec<Script>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM scripts \
             WHERE ($1::boolean IS NULL OR is_enabled = $1) \
             ORDER BY id"
        );
        sqlx::query_as::<_, Script>(&query)
            .bind(filter.enabled())
            .fetch_all(pool)
            .await
    }

    /// Update a script. Only non-`None` fields in the DTO are applied.
    ///
    /// Returns `None` if no row with the given ID exists.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        dto: &UpdateScript,
    ) -> Result<Option<Script>, sqlx::Error> {
        let query = format!(
            "UPDATE scripts SET \
                name = COALESCE($2, name), \
                code = COALESCE($3, code), \
                language = COALESCE($4, language), \
                cron_expression = COALESCE($5, cron_expression), \
                variables = COALESCE($6, variables), \
                packages = COALESCE($7, packages), \
                is_enabled = COALESCE($8, is_enabled), \
                shared_script_id = COALESCE($9, shared_script_id), \
                library_id = COALESCE($10, library_id), \
                timeout_secs = COALESCE($11, timeout_secs), \
                updated_at = now() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Script>(&query)
            .bind(id)
            .bind(&dto.name)
            .bind(&dto.code)
            .bind(dto.language.map(|l| l.as_str()))
            .bind(&dto.cron_expression)
            .bind(dto.variables.as_ref().map(Json))
            .bind(dto.packages.as_ref().map(Json))
            .bind(dto.is_enabled)
            .bind(dto.shared_script_id)
            .bind(dto.library_id)
            .bind(dto.timeout_secs)
            .fetch_optional(pool)
            .await
    }

    /// Enable or disable a script. Returns `None` if it does not exist.
    pub async fn set_enabled(
        pool: &PgPool,
        id: DbId,
        enabled: bool,
    ) -> Result<Option<Script>, sqlx::Error> {
        let query = format!(
            "UPDATE scripts SET is_enabled = $2, updated_at = now() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Script>(&query)
            .bind(id)
            .bind(enabled)
            .fetch_optional(pool)
            .await
    }
}
