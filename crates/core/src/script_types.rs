//! Script runtime languages.
//!
//! The stored `language` column holds the lowercase tag returned by
//! [`ScriptLanguage::as_str`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Shell runtime (executed via `bash`).
pub const SCRIPT_TYPE_SHELL: &str = "shell";

/// Python runtime (executed via `python3`, with optional venv isolation).
pub const SCRIPT_TYPE_PYTHON: &str = "python";

/// The closed set of languages a script may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Shell,
    Python,
}

impl ScriptLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => SCRIPT_TYPE_SHELL,
            Self::Python => SCRIPT_TYPE_PYTHON,
        }
    }

    /// File extension used when the source is materialized on disk.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Shell => "sh",
            Self::Python => "py",
        }
    }
}

impl fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptLanguage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            SCRIPT_TYPE_SHELL | "sh" | "bash" => Ok(Self::Shell),
            SCRIPT_TYPE_PYTHON | "py" => Ok(Self::Python),
            other => Err(CoreError::Validation(format!(
                "unknown script language '{other}' (expected \"shell\" or \"python\")"
            ))),
        }
    }
}

impl TryFrom<String> for ScriptLanguage {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
