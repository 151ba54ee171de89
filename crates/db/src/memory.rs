//! In-memory [`ScriptStore`] for tests and embedding.
//!
//! Mirrors the Postgres semantics the engine relies on: finish only applies
//! to `running` logs, listings are ordered, and logs require their script.
//! Like the Postgres store, input is stored as given; callers validate DTOs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use scriptd_core::error::CoreError;
use scriptd_core::scripting::status::ExecutionStatus;
use scriptd_core::types::{DbId, Timestamp};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::execution_log::{ExecutionLog, FinishLog};
use crate::models::script::{CreateScript, Script, ScriptFilter, UpdateScript};
use crate::store::ScriptStore;

#[derive(Default)]
struct Tables {
    scripts: BTreeMap<DbId, Script>,
    logs: BTreeMap<DbId, ExecutionLog>,
    next_script_id: DbId,
    next_log_id: DbId,
}

#[derive(Default)]
pub struct MemoryScriptStore {
    tables: RwLock<Tables>,
}

impl MemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScriptStore for MemoryScriptStore {
    async fn find_script(&self, id: DbId) -> Result<Option<Script>, StoreError> {
        Ok(self.tables.read().await.scripts.get(&id).cloned())
    }

    async fn list_scripts(&self, filter: ScriptFilter) -> Result<Vec<Script>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .scripts
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn create_script(&self, dto: &CreateScript) -> Result<Script, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_script_id += 1;
        let now = Utc::now();
        let script = Script {
            id: tables.next_script_id,
            name: dto.name.clone(),
            code: dto.code.clone(),
            language: dto.language,
            cron_expression: dto.cron_expression.clone(),
            variables: dto.variables.clone(),
            packages: dto.packages.clone(),
            is_enabled: dto.is_enabled.unwrap_or(true),
            shared_script_id: dto.shared_script_id,
            library_id: dto.library_id,
            timeout_secs: dto.timeout_secs,
            created_at: now,
            updated_at: now,
        };
        tables.scripts.insert(script.id, script.clone());
        Ok(script)
    }

    async fn update_script(
        &self,
        id: DbId,
        dto: &UpdateScript,
    ) -> Result<Option<Script>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(script) = tables.scripts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &dto.name {
            script.name = name.clone();
        }
        if let Some(code) = &dto.code {
            script.code = code.clone();
        }
        if let Some(language) = dto.language {
            script.language = language;
        }
        if let Some(expr) = &dto.cron_expression {
            script.cron_expression = Some(expr.clone());
        }
        if let Some(variables) = &dto.variables {
            script.variables = variables.clone();
        }
        if let Some(packages) = &dto.packages {
            script.packages = packages.clone();
        }
        if let Some(enabled) = dto.is_enabled {
            script.is_enabled = enabled;
        }
        if dto.shared_script_id.is_some() {
            script.shared_script_id = dto.shared_script_id;
        }
        if dto.library_id.is_some() {
            script.library_id = dto.library_id;
        }
        if dto.timeout_secs.is_some() {
            script.timeout_secs = dto.timeout_secs;
        }
        script.updated_at = Utc::now();
        Ok(Some(script.clone()))
    }

    async fn set_enabled(&self, id: DbId, enabled: bool) -> Result<Option<Script>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.scripts.get_mut(&id).map(|script| {
            script.is_enabled = enabled;
            script.updated_at = Utc::now();
            script.clone()
        }))
    }

    async fn create_log(
        &self,
        script_id: DbId,
        started_at: Timestamp,
    ) -> Result<ExecutionLog, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.scripts.contains_key(&script_id) {
            return Err(CoreError::not_found("script", script_id).into());
        }
        tables.next_log_id += 1;
        let log = ExecutionLog {
            id: tables.next_log_id,
            script_id,
            started_at,
            ended_at: None,
            exit_code: None,
            output: String::new(),
            status: ExecutionStatus::Running,
            duration_ms: None,
            error_message: None,
        };
        tables.logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn finish_log(&self, id: DbId, finish: &FinishLog) -> Result<bool, StoreError> {
        ExecutionStatus::Running.validate_transition(finish.status)?;
        let mut tables = self.tables.write().await;
        match tables.logs.get_mut(&id) {
            Some(log) if log.status.can_transition(finish.status) => {
                log.status = finish.status;
                log.exit_code = finish.exit_code;
                log.output = finish.output.clone();
                log.duration_ms = Some(finish.duration_ms);
                log.error_message = finish.error_message.clone();
                log.ended_at = Some(finish.ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_log(&self, id: DbId) -> Result<Option<ExecutionLog>, StoreError> {
        Ok(self.tables.read().await.logs.get(&id).cloned())
    }

    async fn list_logs(
        &self,
        script_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        let tables = self.tables.read().await;
        let mut logs: Vec<ExecutionLog> = tables
            .logs
            .values()
            .filter(|l| l.script_id == script_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(logs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_logs(&self, script_id: DbId) -> Result<i64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.logs.values().filter(|l| l.script_id == script_id).count() as i64)
    }

    async fn delete_log(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.logs.remove(&id).is_some())
    }

    async fn fail_interrupted(&self, message: &str, at: Timestamp) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut failed = 0;
        for log in tables.logs.values_mut() {
            if log.status == ExecutionStatus::Running {
                log.status = ExecutionStatus::Failed;
                log.error_message = Some(message.to_string());
                log.ended_at = Some(at);
                failed += 1;
            }
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
