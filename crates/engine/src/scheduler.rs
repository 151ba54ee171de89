//! Cron-driven triggering of enabled scripts.
//!
//! [`ScheduleManager`] runs as a background task. Each tick lists enabled
//! scripts and starts those whose cron expression fires in the window since
//! the previous tick, through the same admission path as manual runs.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use scriptd_core::error::{CoreError, CoreResult};
use scriptd_core::schedule::{fires_between, parse_cron};
use scriptd_core::scripting::variables::Variables;
use scriptd_core::types::{DbId, Timestamp};
use scriptd_db::models::script::ScriptFilter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::ScriptEngine;

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Scripts whose start was requested.
    pub triggered: Vec<DbId>,
    /// Scripts skipped because their expression does not parse.
    pub invalid: Vec<DbId>,
}

pub struct ScheduleManager {
    engine: ScriptEngine,
    interval: Duration,
    warned: Mutex<HashSet<String>>,
}

impl ScheduleManager {
    pub fn new(engine: ScriptEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Run the tick loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Utc::now();

        tracing::info!(interval_secs = self.interval.as_secs(), "Schedule manager started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Schedule manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let now = Utc::now();
                    match self.tick(last_tick, now).await {
                        Ok(report) => {
                            if !report.triggered.is_empty() {
                                tracing::debug!(
                                    triggered = ?report.triggered,
                                    "Scheduled scripts triggered",
                                );
                            }
                            last_tick = now;
                        }
                        // The window is kept so the next tick covers it.
                        Err(e) => tracing::error!(error = %e, "Schedule tick failed"),
                    }
                }
            }
        }
    }

    /// Trigger every enabled script firing in `(from, to]`.
    ///
    /// Starts are spawned; the report lists what was requested, not what
    /// was admitted.
    pub async fn tick(&self, from: Timestamp, to: Timestamp) -> CoreResult<TickReport> {
        let scripts = self
            .engine
            .store()
            .list_scripts(ScriptFilter::Enabled)
            .await?;

        let mut report = TickReport::default();
        for script in scripts {
            let Some(expr) = script.schedule() else {
                continue;
            };
            let schedule = match parse_cron(expr) {
                Ok(schedule) => schedule,
                Err(e) => {
                    self.warn_invalid(script.id, expr, &e);
                    report.invalid.push(script.id);
                    continue;
                }
            };
            if !fires_between(&schedule, from, to) {
                continue;
            }

            report.triggered.push(script.id);
            let engine = self.engine.clone();
            tokio::spawn(async move {
                let script_id = script.id;
                match engine.start_execution(script, Variables::new()).await {
                    Ok(execution_id) => {
                        tracing::debug!(script_id, execution_id, "Scheduled run started");
                    }
                    Err(CoreError::Conflict(_)) => {
                        tracing::info!(script_id, "Previous run still active, skipping");
                    }
                    Err(e) => {
                        tracing::error!(script_id, error = %e, "Failed to start scheduled run");
                    }
                }
            });
        }
        Ok(report)
    }

    fn warn_invalid(&self, script_id: DbId, expr: &str, err: &CoreError) {
        let first = self
            .warned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(expr.to_string());
        if first {
            tracing::warn!(
                script_id,
                expression = expr,
                error = %err,
                "Skipping invalid cron expression",
            );
        }
    }
}
