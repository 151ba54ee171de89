#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scriptd_core::script_types::ScriptLanguage;
use scriptd_core::types::{DbId, Timestamp};
use scriptd_db::models::execution_log::{ExecutionLog, FinishLog};
use scriptd_db::models::script::{CreateScript, Script, ScriptFilter, UpdateScript};
use scriptd_db::{MemoryScriptStore, ScriptStore, StoreError};
use scriptd_engine::{EngineConfig, ScriptEngine};
use scriptd_events::bus::{ExecutionEvent, EXECUTION_FINISHED};
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn config(dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        grace_period: Duration::from_secs(1),
        work_dir: dir.join("work"),
        venv_dir: dir.join("venvs"),
        ..EngineConfig::default()
    }
}

pub fn engine(dir: &std::path::Path) -> (ScriptEngine, Arc<MemoryScriptStore>) {
    let store = Arc::new(MemoryScriptStore::new());
    let engine = ScriptEngine::new(store.clone(), config(dir));
    (engine, store)
}

pub async fn shell_script(store: &dyn ScriptStore, name: &str, code: &str) -> Script {
    store
        .create_script(&CreateScript::new(name, ScriptLanguage::Shell, code))
        .await
        .expect("create script")
}

pub async fn python_script(store: &dyn ScriptStore, name: &str, packages: &[&str]) -> Script {
    let mut dto = CreateScript::new(name, ScriptLanguage::Python, "print('never')\n");
    dto.packages = packages.iter().map(|p| p.to_string()).collect();
    store.create_script(&dto).await.expect("create script")
}

/// Interpreter whose `-m venv` step hangs, so preparation never finishes.
pub fn hanging_python(dir: &std::path::Path) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("hanging-python");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").expect("write fake python");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path.to_string_lossy().into_owned()
}

/// Engine whose package installs hang.
pub fn engine_with_hanging_installs(
    dir: &std::path::Path,
) -> (ScriptEngine, Arc<MemoryScriptStore>) {
    let store = Arc::new(MemoryScriptStore::new());
    let config = EngineConfig {
        python_bin: hanging_python(dir),
        ..config(dir)
    };
    (ScriptEngine::new(store.clone(), config), store)
}

/// Wait for `event_type` about `execution_id`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<ExecutionEvent>,
    event_type: &str,
    execution_id: DbId,
) -> ExecutionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event)
                    if event.event_type == event_type && event.execution_id == execution_id =>
                {
                    return event;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {event_type} event for execution {execution_id}"))
}

pub async fn wait_finished(
    events: &mut broadcast::Receiver<ExecutionEvent>,
    execution_id: DbId,
) -> ExecutionEvent {
    wait_for(events, EXECUTION_FINISHED, execution_id).await
}

/// Wait until the script's running process has a pid.
pub async fn wait_for_pid(engine: &ScriptEngine, script_id: DbId) -> u32 {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(pid) = engine.registry().lookup(script_id).and_then(|h| h.pid) {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process never spawned")
}

/// Store whose first `failures` finish updates fail.
pub struct FlakyStore {
    pub inner: MemoryScriptStore,
    pub failures: AtomicU32,
    pub finish_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryScriptStore::new(),
            failures: AtomicU32::new(failures),
            finish_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ScriptStore for FlakyStore {
    async fn find_script(&self, id: DbId) -> Result<Option<Script>, StoreError> {
        self.inner.find_script(id).await
    }

    async fn list_scripts(&self, filter: ScriptFilter) -> Result<Vec<Script>, StoreError> {
        self.inner.list_scripts(filter).await
    }

    async fn create_script(&self, dto: &CreateScript) -> Result<Script, StoreError> {
        self.inner.create_script(dto).await
    }

    async fn update_script(
        &self,
        id: DbId,
        dto: &UpdateScript,
    ) -> Result<Option<Script>, StoreError> {
        self.inner.update_script(id, dto).await
    }

    async fn set_enabled(&self, id: DbId, enabled: bool) -> Result<Option<Script>, StoreError> {
        self.inner.set_enabled(id, enabled).await
    }

    async fn create_log(
        &self,
        script_id: DbId,
        started_at: Timestamp,
    ) -> Result<ExecutionLog, StoreError> {
        self.inner.create_log(script_id, started_at).await
    }

    async fn finish_log(&self, id: DbId, finish: &FinishLog) -> Result<bool, StoreError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.finish_log(id, finish).await
    }

    async fn find_log(&self, id: DbId) -> Result<Option<ExecutionLog>, StoreError> {
        self.inner.find_log(id).await
    }

    async fn list_logs(
        &self,
        script_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        self.inner.list_logs(script_id, limit, offset).await
    }

    async fn count_logs(&self, script_id: DbId) -> Result<i64, StoreError> {
        self.inner.count_logs(script_id).await
    }

    async fn delete_log(&self, id: DbId) -> Result<bool, StoreError> {
        self.inner.delete_log(id).await
    }

    async fn fail_interrupted(&self, message: &str, at: Timestamp) -> Result<u64, StoreError> {
        self.inner.fail_interrupted(message, at).await
    }
}
