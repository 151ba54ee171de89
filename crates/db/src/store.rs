//! The storage seam consumed by the engine.
//!
//! [`ScriptStore`] abstracts script and execution-log persistence so the
//! engine can run against Postgres ([`PgScriptStore`]) or in memory
//! ([`MemoryScriptStore`](crate::memory::MemoryScriptStore)).

use async_trait::async_trait;
use scriptd_core::scripting::status::ExecutionStatus;
use scriptd_core::types::{DbId, Timestamp};

use crate::error::StoreError;
use crate::models::execution_log::{ExecutionLog, FinishLog};
use crate::models::script::{CreateScript, Script, ScriptFilter, UpdateScript};
use crate::repositories::{ExecutionLogRepo, ScriptRepo};
use crate::DbPool;

#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn find_script(&self, id: DbId) -> Result<Option<Script>, StoreError>;

    async fn list_scripts(&self, filter: ScriptFilter) -> Result<Vec<Script>, StoreError>;

    async fn create_script(&self, dto: &CreateScript) -> Result<Script, StoreError>;

    /// Returns `None` if the script does not exist.
    async fn update_script(
        &self,
        id: DbId,
        dto: &UpdateScript,
    ) -> Result<Option<Script>, StoreError>;

    /// Returns `None` if the script does not exist.
    async fn set_enabled(&self, id: DbId, enabled: bool) -> Result<Option<Script>, StoreError>;

    /// Insert a `running` log for a newly admitted execution.
    async fn create_log(
        &self,
        script_id: DbId,
        started_at: Timestamp,
    ) -> Result<ExecutionLog, StoreError>;

    /// Apply the terminal update. Returns `false` if the log was not `running`;
    /// a non-terminal `finish.status` is a validation error.
    async fn finish_log(&self, id: DbId, finish: &FinishLog) -> Result<bool, StoreError>;

    async fn find_log(&self, id: DbId) -> Result<Option<ExecutionLog>, StoreError>;

    /// Logs for a script, newest first.
    async fn list_logs(
        &self,
        script_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>, StoreError>;

    async fn count_logs(&self, script_id: DbId) -> Result<i64, StoreError>;

    async fn delete_log(&self, id: DbId) -> Result<bool, StoreError>;

    /// Mark logs left `running` by a previous process as `failed`.
    async fn fail_interrupted(&self, message: &str, at: Timestamp) -> Result<u64, StoreError>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgScriptStore {
    pool: DbPool,
}

impl PgScriptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ScriptStore for PgScriptStore {
    async fn find_script(&self, id: DbId) -> Result<Option<Script>, StoreError> {
        Ok(ScriptRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_scripts(&self, filter: ScriptFilter) -> Result<Vec<Script>, StoreError> {
        Ok(ScriptRepo::list(&self.pool, filter).await?)
    }

    async fn create_script(&self, dto: &CreateScript) -> Result<Script, StoreError> {
        Ok(ScriptRepo::create(&self.pool, dto).await?)
    }

    async fn update_script(
        &self,
        id: DbId,
        dto: &UpdateScript,
    ) -> Result<Option<Script>, StoreError> {
        Ok(ScriptRepo::update(&self.pool, id, dto).await?)
    }

    async fn set_enabled(&self, id: DbId, enabled: bool) -> Result<Option<Script>, StoreError> {
        Ok(ScriptRepo::set_enabled(&self.pool, id, enabled).await?)
    }

    async fn create_log(
        &self,
        script_id: DbId,
        started_at: Timestamp,
    ) -> Result<ExecutionLog, StoreError> {
        Ok(ExecutionLogRepo::create(&self.pool, script_id, started_at).await?)
    }

    async fn finish_log(&self, id: DbId, finish: &FinishLog) -> Result<bool, StoreError> {
        ExecutionStatus::Running.validate_transition(finish.status)?;
        Ok(ExecutionLogRepo::finish(&self.pool, id, finish).await?)
    }

    async fn find_log(&self, id: DbId) -> Result<Option<ExecutionLog>, StoreError> {
        Ok(ExecutionLogRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_logs(
        &self,
        script_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        Ok(ExecutionLogRepo::list_by_script(&self.pool, script_id, limit, offset).await?)
    }

    async fn count_logs(&self, script_id: DbId) -> Result<i64, StoreError> {
        Ok(ExecutionLogRepo::count_by_script(&self.pool, script_id).await?)
    }

    async fn delete_log(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(ExecutionLogRepo::delete(&self.pool, id).await?)
    }

    async fn fail_interrupted(&self, message: &str, at: Timestamp) -> Result<u64, StoreError> {
        Ok(ExecutionLogRepo::fail_running(&self.pool, message, at).await?)
    }
}
