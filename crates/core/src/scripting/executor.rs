//! Shared types for running a script process.
//!
//! Defines [`RunRequest`], [`ProcessOutcome`], [`ScriptError`] and the
//! [`OutputSink`] seam through which captured lines leave the runner.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::script_types::ScriptLanguage;
use crate::scripting::status::ExecutionStatus;
use crate::scripting::variables::Variables;
use crate::types::DbId;

/// Everything the runner needs to launch one execution.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub script_id: DbId,
    pub execution_id: DbId,
    pub language: ScriptLanguage,
    /// Fully composed source (shared fragment already prepended).
    pub source: String,
    /// Effective variables, injected into the process environment.
    pub variables: Variables,
    /// Interpreter override, e.g. a prepared venv's `bin/python`.
    pub interpreter: Option<PathBuf>,
    /// Hard deadline; `None` means unbounded.
    pub timeout: Option<Duration>,
}

/// Receives every captured output line in the order the process wrote it.
///
/// stdout and stderr share one pipe, so lines are not tagged by stream.
/// Implementations must not block: the call happens on the reader task.
pub trait OutputSink: Send + Sync {
    fn line(&self, line: String);
}

/// How a process reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own.
    Exited,
    /// A cancellation request stopped it.
    Cancelled,
    /// The deadline elapsed and it was stopped.
    DeadlineExceeded,
}

/// Result of waiting on a [`RunningProcess`](super::subprocess::RunningProcess).
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code, or `None` when the process died from a signal.
    pub exit_code: Option<i32>,
    pub termination: Termination,
    /// True if the grace window elapsed and the group was SIGKILLed.
    pub escalated: bool,
    pub duration: Duration,
}

impl ProcessOutcome {
    /// Terminal status for the execution log.
    pub fn status(&self) -> ExecutionStatus {
        match self.termination {
            Termination::Exited if self.exit_code == Some(0) => ExecutionStatus::Succeeded,
            Termination::Exited => ExecutionStatus::Failed,
            Termination::Cancelled | Termination::DeadlineExceeded => ExecutionStatus::Cancelled,
        }
    }
}

/// Errors raised while preparing or launching a script process.
#[derive(Debug)]
pub enum ScriptError {
    /// The interpreter could not be spawned.
    Spawn(std::io::Error),
    /// Writing the script file or waiting on the child failed.
    Io(std::io::Error),
    /// A dependency installation step exited unsuccessfully.
    InstallFailed {
        step: &'static str,
        exit_code: i32,
        stderr: String,
    },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "Failed to spawn script process: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::InstallFailed {
                step,
                exit_code,
                stderr,
            } => write!(f, "{step} failed with exit code {exit_code}: {stderr}"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) | Self::Io(err) => Some(err),
            Self::InstallFailed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: Option<i32>, termination: Termination) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            termination,
            escalated: false,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn zero_exit_succeeds() {
        assert_eq!(
            outcome(Some(0), Termination::Exited).status(),
            ExecutionStatus::Succeeded
        );
    }

    #[test]
    fn nonzero_or_signal_exit_fails() {
        assert_eq!(
            outcome(Some(2), Termination::Exited).status(),
            ExecutionStatus::Failed
        );
        assert_eq!(
            outcome(None, Termination::Exited).status(),
            ExecutionStatus::Failed
        );
    }

    #[test]
    fn cancellation_wins_over_exit_code() {
        assert_eq!(
            outcome(Some(0), Termination::Cancelled).status(),
            ExecutionStatus::Cancelled
        );
        assert_eq!(
            outcome(None, Termination::DeadlineExceeded).status(),
            ExecutionStatus::Cancelled
        );
    }

    #[test]
    fn display_install_failed() {
        let err = ScriptError::InstallFailed {
            step: "pip install",
            exit_code: 1,
            stderr: "no matching distribution".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "pip install failed with exit code 1: no matching distribution"
        );
    }

    #[test]
    fn error_source_io() {
        let err = ScriptError::Spawn(std::io::Error::other("boom"));
        assert!(std::error::Error::source(&err).is_some());
        let err = ScriptError::InstallFailed {
            step: "venv",
            exit_code: 1,
            stderr: String::new(),
        };
        assert!(std::error::Error::source(&err).is_none());
    }
}
