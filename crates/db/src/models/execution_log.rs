//! Execution log model.
//!
//! One row per run. Created as `running` at admission and finished exactly
//! once; the finish update only applies while the row is still `running`.

use scriptd_core::scripting::status::ExecutionStatus;
use scriptd_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A persisted execution record.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExecutionLog {
    pub id: DbId,
    pub script_id: DbId,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    /// Null while running, or when the process died from a signal or never spawned.
    pub exit_code: Option<i32>,
    pub output: String,
    #[sqlx(try_from = "String")]
    pub status: ExecutionStatus,
    pub duration_ms: Option<i64>,
    /// Set when the engine itself could not run the process.
    pub error_message: Option<String>,
}

/// Terminal values written by the finish update.
#[derive(Debug, Clone)]
pub struct FinishLog {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub output: String,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub ended_at: Timestamp,
}
