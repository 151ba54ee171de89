//! Per-execution monitor task.
//!
//! Owns the child process from launch to terminal persistence. The log row is
//! only ever finished here, and the registry slot is released (by dropping the
//! [`Admission`]) only after that write.
//!
//! Package preparation races the cancellation token and the deadline; a run
//! stopped there is recorded as `cancelled` and never launched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use scriptd_core::scripting::executor::RunRequest;
use scriptd_core::scripting::packages::PreparedEnv;
use scriptd_core::scripting::status::ExecutionStatus;
use scriptd_core::scripting::variables::{self, Variables};
use scriptd_core::types::DbId;
use scriptd_db::models::execution_log::FinishLog;
use scriptd_db::models::script::Script;
use scriptd_db::{ScriptStore, StoreError};
use scriptd_events::bus::ExecutionEvent;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineInner;
use crate::registry::Admission;

/// Attempts at the terminal log update before giving up.
const FINISH_ATTEMPTS: u32 = 2;

const FINISH_RETRY_DELAY: Duration = Duration::from_millis(250);

pub(crate) async fn run(
    inner: Arc<EngineInner>,
    admission: Admission,
    script: Script,
    overrides: Variables,
    execution_id: DbId,
) {
    let script_id = script.id;
    let started = Instant::now();
    let cancel = admission.cancel_token();

    // The deadline covers preparation as well as the process itself.
    let deadline = script
        .timeout_secs
        .and_then(|secs| u64::try_from(secs).ok())
        .map(Duration::from_secs)
        .or(inner.config.default_timeout)
        .map(|limit| tokio::time::Instant::now() + limit);

    let prepared = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = deadline_elapsed(deadline) => None,
        request = build_request(&inner, &script, &overrides, execution_id) => Some(request),
    };

    let mut finish = match prepared {
        None => {
            tracing::info!(script_id, execution_id, "Execution stopped before launch");
            terminal(ExecutionStatus::Cancelled, None, started.elapsed(), None)
        }
        Some(mut request) => {
            request.timeout =
                deadline.map(|at| at.saturating_duration_since(tokio::time::Instant::now()));
            launch(&inner, &admission, request, cancel, started).await
        }
    };
    finish.output = inner.streamer.transcript(execution_id).unwrap_or_default();

    persist_finish(inner.store.as_ref(), execution_id, &finish).await;
    drop(admission);
    inner.streamer.close(execution_id);

    tracing::info!(
        script_id,
        execution_id,
        status = %finish.status,
        exit_code = finish.exit_code,
        duration_ms = finish.duration_ms,
        "Execution finished",
    );
    inner.bus.publish(ExecutionEvent::finished(
        script_id,
        execution_id,
        finish.status,
        finish.exit_code,
    ));

    if finish.status == ExecutionStatus::Succeeded {
        if let Some(library_id) = script.library_id {
            tracing::debug!(script_id, library_id, "Requesting library re-index");
            inner.bus.publish(ExecutionEvent::reindex_requested(
                script_id,
                execution_id,
                library_id,
            ));
        }
    }
}

async fn deadline_elapsed(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Prepare packages and compose the source. The timeout is filled in by
/// the caller.
async fn build_request(
    inner: &EngineInner,
    script: &Script,
    overrides: &Variables,
    execution_id: DbId,
) -> RunRequest {
    let prepared = match inner
        .preparer
        .prepare(script.language, &script.packages)
        .await
    {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(
                script_id = script.id,
                execution_id,
                error = %e,
                "Package preparation failed, running with system interpreter",
            );
            PreparedEnv::default()
        }
    };

    RunRequest {
        script_id: script.id,
        execution_id,
        language: script.language,
        source: compose_source(inner.store.as_ref(), script).await,
        variables: variables::resolve(&script.variables, overrides),
        interpreter: prepared.interpreter,
        timeout: None,
    }
}

/// Spawn the process and wait for it, mapping the outcome to a terminal row.
async fn launch(
    inner: &EngineInner,
    admission: &Admission,
    request: RunRequest,
    cancel: CancellationToken,
    started: Instant,
) -> FinishLog {
    let (script_id, execution_id) = (request.script_id, request.execution_id);
    let process = match inner
        .runner
        .start(request, inner.streamer.sink(execution_id), cancel)
        .await
    {
        Ok(process) => process,
        Err(e) => {
            tracing::error!(
                script_id,
                execution_id,
                error = %e,
                "Failed to launch script",
            );
            let message = Some(e.to_string());
            return terminal(ExecutionStatus::Failed, None, started.elapsed(), message);
        }
    };

    admission.set_pid(process.pid());
    match process.wait().await {
        Ok(outcome) => terminal(
            outcome.status(),
            outcome.exit_code,
            outcome.duration,
            None,
        ),
        Err(e) => {
            tracing::error!(
                script_id,
                execution_id,
                error = %e,
                "Lost track of script process",
            );
            let message = Some(e.to_string());
            terminal(ExecutionStatus::Failed, None, started.elapsed(), message)
        }
    }
}

fn terminal(
    status: ExecutionStatus,
    exit_code: Option<i32>,
    duration: Duration,
    error_message: Option<String>,
) -> FinishLog {
    FinishLog {
        status,
        exit_code,
        output: String::new(),
        duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        error_message,
        ended_at: Utc::now(),
    }
}

/// The script's code, preceded by its shared fragment when one applies.
async fn compose_source(store: &dyn ScriptStore, script: &Script) -> String {
    let Some(shared_id) = script.shared_script_id else {
        return script.code.clone();
    };

    match store.find_script(shared_id).await {
        Ok(Some(shared)) if shared.language == script.language => {
            format!("{}\n{}", shared.code, script.code)
        }
        Ok(Some(shared)) => {
            tracing::warn!(
                script_id = script.id,
                shared_script_id = shared_id,
                shared_language = %shared.language,
                "Shared script language differs, ignoring it",
            );
            script.code.clone()
        }
        Ok(None) => {
            tracing::warn!(
                script_id = script.id,
                shared_script_id = shared_id,
                "Shared script not found, ignoring it",
            );
            script.code.clone()
        }
        Err(e) => {
            tracing::warn!(
                script_id = script.id,
                shared_script_id = shared_id,
                error = %e,
                "Failed to load shared script, ignoring it",
            );
            script.code.clone()
        }
    }
}

/// Write the terminal update, retrying once after a short delay.
async fn persist_finish(store: &dyn ScriptStore, execution_id: DbId, finish: &FinishLog) {
    for attempt in 1..=FINISH_ATTEMPTS {
        match store.finish_log(execution_id, finish).await {
            Ok(true) => return,
            Ok(false) => {
                tracing::warn!(execution_id, "Execution log already terminal, update skipped");
                return;
            }
            Err(StoreError::Core(e)) => {
                tracing::error!(execution_id, error = %e, "Finish update rejected");
                return;
            }
            Err(e) if attempt < FINISH_ATTEMPTS => {
                tracing::warn!(
                    execution_id,
                    attempt,
                    error = %e,
                    "Failed to finish execution log, retrying",
                );
                tokio::time::sleep(FINISH_RETRY_DELAY).await;
            }
            Err(e) => {
                tracing::error!(
                    execution_id,
                    status = %finish.status,
                    error = %e,
                    "Failed to finish execution log",
                );
            }
        }
    }
}
