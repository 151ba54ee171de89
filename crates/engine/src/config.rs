use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use scriptd_core::error::CoreError;
use scriptd_core::scripting::subprocess::RunnerConfig;
use scriptd_events::stream::DEFAULT_SUBSCRIBER_CAPACITY;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Schedule Manager tick period (default: 60 s).
    pub tick_interval: Duration,
    /// Time between `SIGTERM` and `SIGKILL` on cancellation (default: 5 s).
    pub grace_period: Duration,
    /// Deadline for scripts without `timeout_secs` (default: unbounded).
    pub default_timeout: Option<Duration>,
    /// Per-subscriber output buffer, in lines (default: 256).
    pub subscriber_capacity: usize,
    /// Where script files are written and processes run.
    pub work_dir: PathBuf,
    /// Where python venvs are created.
    pub venv_dir: PathBuf,
    pub shell_bin: String,
    pub python_bin: String,
    /// How long shutdown waits for running executions (default: 30 s).
    pub shutdown_timeout: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default            |
    /// |-------------------------------|--------------------|
    /// | `SCRIPT_TICK_INTERVAL_SECS`   | `60`               |
    /// | `SCRIPT_GRACE_PERIOD_SECS`    | `5`                |
    /// | `SCRIPT_DEFAULT_TIMEOUT_SECS` | unset (unbounded)  |
    /// | `SCRIPT_SUBSCRIBER_CAPACITY`  | `256`              |
    /// | `SCRIPT_WORK_DIR`             | `<tmp>/scriptd`    |
    /// | `SCRIPT_VENV_DIR`             | `<work_dir>/venvs` |
    /// | `SCRIPT_SHELL_BIN`            | `bash`             |
    /// | `SCRIPT_PYTHON_BIN`           | `python3`          |
    /// | `SHUTDOWN_TIMEOUT_SECS`       | `30`               |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let work_dir = lookup("SCRIPT_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);
        let venv_dir = lookup("SCRIPT_VENV_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("venvs"));

        let tick_secs: u64 = parse(&lookup, "SCRIPT_TICK_INTERVAL_SECS")?.unwrap_or(60);
        if tick_secs == 0 {
            return Err(CoreError::Validation(
                "SCRIPT_TICK_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            tick_interval: Duration::from_secs(tick_secs),
            grace_period: parse(&lookup, "SCRIPT_GRACE_PERIOD_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.grace_period),
            default_timeout: parse(&lookup, "SCRIPT_DEFAULT_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            subscriber_capacity: parse(&lookup, "SCRIPT_SUBSCRIBER_CAPACITY")?
                .unwrap_or(defaults.subscriber_capacity),
            work_dir,
            venv_dir,
            shell_bin: lookup("SCRIPT_SHELL_BIN").unwrap_or(defaults.shell_bin),
            python_bin: lookup("SCRIPT_PYTHON_BIN").unwrap_or(defaults.python_bin),
            shutdown_timeout: parse(&lookup, "SHUTDOWN_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            work_dir: self.work_dir.clone(),
            shell_bin: self.shell_bin.clone(),
            python_bin: self.python_bin.clone(),
            grace_period: self.grace_period,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let work_dir = std::env::temp_dir().join("scriptd");
        Self {
            tick_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(5),
            default_timeout: None,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            venv_dir: work_dir.join("venvs"),
            work_dir,
            shell_bin: "bash".into(),
            python_bin: "python3".into(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Parse an optional variable; blank counts as unset.
fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, CoreError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map(Some).map_err(|_| {
            CoreError::Validation(format!("{key} must be a valid number, got '{raw}'"))
        }),
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, CoreError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.default_timeout, None);
        assert_eq!(config.subscriber_capacity, 256);
        assert_eq!(config.shell_bin, "bash");
        assert_eq!(config.venv_dir, config.work_dir.join("venvs"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("SCRIPT_TICK_INTERVAL_SECS", "15"),
            ("SCRIPT_DEFAULT_TIMEOUT_SECS", "600"),
            ("SCRIPT_WORK_DIR", "/srv/scriptd"),
            ("SCRIPT_PYTHON_BIN", "/usr/bin/python3.12"),
        ])
        .expect("config");
        assert_eq!(config.tick_interval, Duration::from_secs(15));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.venv_dir, PathBuf::from("/srv/scriptd/venvs"));
        assert_eq!(config.runner_config().python_bin, "/usr/bin/python3.12");
    }

    #[test]
    fn invalid_number_is_validation_error() {
        assert_matches!(
            load(&[("SCRIPT_GRACE_PERIOD_SECS", "soon")]),
            Err(CoreError::Validation(msg)) if msg.contains("SCRIPT_GRACE_PERIOD_SECS")
        );
        assert_matches!(
            load(&[("SCRIPT_TICK_INTERVAL_SECS", "0")]),
            Err(CoreError::Validation(_))
        );
    }
}
