//! Script entity model and DTOs.
//!
//! Maps to the `scripts` table. `variables` and `packages` are JSONB columns.

use scriptd_core::error::CoreError;
use scriptd_core::schedule::parse_cron;
use scriptd_core::script_types::ScriptLanguage;
use scriptd_core::scripting::variables::Variables;
use scriptd_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored automation script.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Script {
    pub id: DbId,
    pub name: String,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub language: ScriptLanguage,
    /// Empty or absent means manual-only.
    pub cron_expression: Option<String>,
    #[sqlx(json)]
    pub variables: Variables,
    #[sqlx(json)]
    pub packages: Vec<String>,
    pub is_enabled: bool,
    /// Fragment whose code is prepended before running.
    pub shared_script_id: Option<DbId>,
    /// Library re-indexed after a successful run.
    pub library_id: Option<DbId>,
    /// Per-script deadline, overriding the engine default.
    pub timeout_secs: Option<i32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Script {
    /// The trimmed cron expression, if the script is scheduled.
    pub fn schedule(&self) -> Option<&str> {
        self.cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// DTO for inserting a new script.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScript {
    pub name: String,
    pub code: String,
    pub language: ScriptLanguage,
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub packages: Vec<String>,
    pub is_enabled: Option<bool>,
    pub shared_script_id: Option<DbId>,
    pub library_id: Option<DbId>,
    pub timeout_secs: Option<i32>,
}

impl CreateScript {
    /// Minimal DTO: enabled, manual-only, no variables or packages.
    pub fn new(name: impl Into<String>, language: ScriptLanguage, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            language,
            cron_expression: None,
            variables: Variables::new(),
            packages: Vec::new(),
            is_enabled: None,
            shared_script_id: None,
            library_id: None,
            timeout_secs: None,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("script name must not be empty".into()));
        }
        validate_cron(self.cron_expression.as_deref())?;
        validate_timeout(self.timeout_secs)
    }
}

/// DTO for updating an existing script. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateScript {
    pub name: Option<String>,
    pub code: Option<String>,
    pub language: Option<ScriptLanguage>,
    pub cron_expression: Option<String>,
    pub variables: Option<Variables>,
    pub packages: Option<Vec<String>>,
    pub is_enabled: Option<bool>,
    pub shared_script_id: Option<DbId>,
    pub library_id: Option<DbId>,
    pub timeout_secs: Option<i32>,
}

impl UpdateScript {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(CoreError::Validation("script name must not be empty".into()));
        }
        validate_cron(self.cron_expression.as_deref())?;
        validate_timeout(self.timeout_secs)
    }
}

/// Which scripts a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptFilter {
    #[default]
    All,
    Enabled,
    Disabled,
}

impl ScriptFilter {
    pub fn matches(self, script: &Script) -> bool {
        match self {
            Self::All => true,
            Self::Enabled => script.is_enabled,
            Self::Disabled => !script.is_enabled,
        }
    }

    /// `is_enabled` bind value, `None` for no filter.
    pub fn enabled(self) -> Option<bool> {
        match self {
            Self::All => None,
            Self::Enabled => Some(true),
            Self::Disabled => Some(false),
        }
    }
}

fn validate_cron(expr: Option<&str>) -> Result<(), CoreError> {
    match expr.map(str::trim) {
        Some(expr) if !expr.is_empty() => parse_cron(expr).map(|_| ()),
        _ => Ok(()),
    }
}

fn validate_timeout(timeout_secs: Option<i32>) -> Result<(), CoreError> {
    match timeout_secs {
        Some(secs) if secs <= 0 => Err(CoreError::Validation(format!(
            "timeout_secs must be positive, got {secs}"
        ))),
        _ => Ok(()),
    }
}
