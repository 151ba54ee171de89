//! Cron expression parsing and fire-window evaluation.
//!
//! Scripts store classic 5-field expressions (`min hour dom month dow`); the
//! `cron` crate expects a leading seconds field, so expressions are
//! normalized before parsing. 6- and 7-field expressions are passed through.

use std::str::FromStr;

use cron::Schedule;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Normalize a cron expression to the seconds-first form `cron` parses.
pub fn normalize_cron(expr: &str) -> Result<String, CoreError> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.len() {
        5 => Ok(format!("0 {}", parts.join(" "))),
        6 | 7 => Ok(parts.join(" ")),
        n => Err(CoreError::Validation(format!(
            "invalid cron expression '{expr}': expected 5 fields, got {n}"
        ))),
    }
}

/// Parse a (possibly 5-field) cron expression.
pub fn parse_cron(expr: &str) -> Result<Schedule, CoreError> {
    let normalized = normalize_cron(expr)?;
    Schedule::from_str(&normalized)
        .map_err(|e| CoreError::Validation(format!("invalid cron expression '{expr}': {e}")))
}

/// Whether `schedule` has a fire time in the half-open window `(from, to]`.
pub fn fires_between(schedule: &Schedule, from: Timestamp, to: Timestamp) -> bool {
    if to <= from {
        return false;
    }
    next_fire(schedule, from).is_some_and(|next| next <= to)
}

/// Next fire time strictly after `after`, if any.
pub fn next_fire(schedule: &Schedule, after: Timestamp) -> Option<Timestamp> {
    schedule.after(&after).next()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
