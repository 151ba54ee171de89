//! The engine facade consumed by the transport layer and the scheduler.
//!
//! [`ScriptEngine`] is cheap to clone; all clones share one registry,
//! streamer, event bus and package cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scriptd_core::error::{CoreError, CoreResult};
use scriptd_core::scripting::packages::PackagePreparer;
use scriptd_core::scripting::subprocess::ProcessRunner;
use scriptd_core::scripting::variables::Variables;
use scriptd_core::types::DbId;
use scriptd_db::models::script::{CreateScript, Script, UpdateScript};
use scriptd_db::ScriptStore;
use scriptd_events::bus::{EventBus, ExecutionEvent};
use scriptd_events::stream::{LogStreamer, Subscription};
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::monitor;
use crate::registry::ExecutionRegistry;
use crate::scheduler::ScheduleManager;

/// Message recorded on logs left `running` by a previous process.
const INTERRUPTED_MESSAGE: &str = "Execution interrupted by engine restart";

pub(crate) struct EngineInner {
    pub(crate) store: Arc<dyn ScriptStore>,
    pub(crate) registry: Arc<ExecutionRegistry>,
    pub(crate) streamer: Arc<LogStreamer>,
    pub(crate) bus: EventBus,
    pub(crate) runner: ProcessRunner,
    pub(crate) preparer: PackagePreparer,
    pub(crate) config: EngineConfig,
}

#[derive(Clone)]
pub struct ScriptEngine {
    inner: Arc<EngineInner>,
}

impl ScriptEngine {
    pub fn new(store: Arc<dyn ScriptStore>, config: EngineConfig) -> Self {
        let inner = EngineInner {
            store,
            registry: Arc::new(ExecutionRegistry::new()),
            streamer: Arc::new(LogStreamer::new(config.subscriber_capacity)),
            bus: EventBus::default(),
            runner: ProcessRunner::new(config.runner_config()),
            preparer: PackagePreparer::new(config.python_bin.clone(), config.venv_dir.clone()),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn store(&self) -> &Arc<dyn ScriptStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// A scheduler driving this engine at the configured tick interval.
    pub fn schedule_manager(&self) -> ScheduleManager {
        ScheduleManager::new(self.clone(), self.inner.config.tick_interval)
    }

    /// Validate and store a new script.
    pub async fn create_script(&self, dto: &CreateScript) -> CoreResult<Script> {
        dto.validate()?;
        Ok(self.inner.store.create_script(dto).await?)
    }

    /// Validate and apply a script update. Takes effect on the next tick.
    pub async fn update_script(&self, id: DbId, dto: &UpdateScript) -> CoreResult<Script> {
        dto.validate()?;
        self.inner
            .store
            .update_script(id, dto)
            .await?
            .ok_or(CoreError::not_found("script", id))
    }

    /// Admit and launch a run of `script`.
    ///
    /// Returns the new execution id once the log row exists and the monitor
    /// task is spawned; it never waits for the process.
    pub async fn start_execution(&self, script: Script, overrides: Variables) -> CoreResult<DbId> {
        let admission = self.inner.registry.try_admit(script.id).ok_or_else(|| {
            CoreError::Conflict(format!(
                "script {} already has a running execution",
                script.id
            ))
        })?;

        let log = self
            .inner
            .store
            .create_log(script.id, Utc::now())
            .await
            .map_err(|e| {
                CoreError::Infrastructure(format!("failed to create execution log: {e}"))
            })?;
        admission.bind_execution(log.id);
        self.inner.streamer.open(log.id);

        tracing::info!(
            script_id = script.id,
            execution_id = log.id,
            script = %script.name,
            language = %script.language,
            "Execution started",
        );
        self.inner.bus.publish(ExecutionEvent::started(script.id, log.id));

        tokio::spawn(monitor::run(
            Arc::clone(&self.inner),
            admission,
            script,
            overrides,
            log.id,
        ));
        Ok(log.id)
    }

    /// Fetch a script and start it.
    pub async fn run_script(&self, script_id: DbId, overrides: Variables) -> CoreResult<DbId> {
        let script = self
            .inner
            .store
            .find_script(script_id)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("script {script_id} does not exist")))?;

        if !script.is_enabled {
            return Err(CoreError::Validation(format!(
                "script '{}' is disabled",
                script.name
            )));
        }

        self.start_execution(script, overrides).await
    }

    /// Request cancellation of the script's running execution.
    pub fn cancel_execution(&self, script_id: DbId) -> CoreResult<()> {
        let handle = self
            .inner
            .registry
            .lookup(script_id)
            .ok_or(CoreError::not_found("running execution", script_id))?;
        tracing::info!(
            script_id,
            execution_id = handle.execution_id,
            "Cancellation requested",
        );
        handle.cancel.cancel();
        Ok(())
    }

    /// Attach to a live execution's output, backlog first.
    pub fn subscribe(&self, execution_id: DbId) -> CoreResult<Subscription> {
        self.inner
            .streamer
            .subscribe(execution_id)
            .ok_or(CoreError::not_found("live execution", execution_id))
    }

    /// Lifecycle events for every execution.
    pub fn events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.bus.subscribe()
    }

    /// Fail logs left `running` by a previous process. Call before any run.
    pub async fn recover(&self) -> CoreResult<u64> {
        let failed = self
            .inner
            .store
            .fail_interrupted(INTERRUPTED_MESSAGE, Utc::now())
            .await?;
        if failed > 0 {
            tracing::warn!(count = failed, "Marked interrupted executions as failed");
        }
        Ok(failed)
    }

    /// Cancel every running execution and wait for them to finish.
    ///
    /// Returns `false` if some were still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let cancelled = self.inner.registry.cancel_all();
        if cancelled > 0 {
            tracing::info!(count = cancelled, "Cancelling running executions");
        }
        let drained = self.inner.registry.wait_idle(timeout).await;
        if !drained {
            tracing::warn!(
                remaining = self.inner.registry.len(),
                "Shutdown timed out with executions still running",
            );
        }
        drained
    }
}
