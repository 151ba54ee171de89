//! Python runtime with virtual environment isolation.
//!
//! Venvs live at `{venv_base_dir}/venv_{key}` where `key` identifies the
//! package set. An existing venv is reused only if its `.prepared` marker is
//! present, so a half-built venv from an interrupted install is rebuilt.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::process::Command;

use super::executor::ScriptError;

/// Marker written after a successful install.
const PREPARED_MARKER: &str = ".prepared";

/// Build the command that runs `script` with `interpreter`.
///
/// Output is unbuffered so lines reach subscribers as they are printed.
pub fn command(interpreter: &OsStr, script: &Path) -> Command {
    let mut cmd = Command::new(interpreter);
    cmd.arg(script).env("PYTHONUNBUFFERED", "1");
    cmd
}

/// Directory of the venv for package set `key`.
pub fn venv_dir(venv_base_dir: &Path, key: &str) -> PathBuf {
    venv_base_dir.join(format!("venv_{key}"))
}

/// Interpreter inside a venv.
pub fn venv_python(venv: &Path) -> PathBuf {
    venv.join("bin").join("python")
}

/// Ensure a venv with `packages` installed exists at `venv`.
///
/// On failure the partially created venv is removed. Dropping the future
/// kills the running install step; the venv is then left without its marker
/// and rebuilt by the next call.
pub async fn ensure_venv(
    python_bin: &str,
    venv: &Path,
    packages: &[String],
) -> Result<(), ScriptError> {
    if fs::metadata(venv.join(PREPARED_MARKER)).await.is_ok() {
        return Ok(());
    }

    if let Some(parent) = venv.parent() {
        fs::create_dir_all(parent).await.map_err(ScriptError::Io)?;
    }

    let create = Command::new(python_bin)
        .args([OsStr::new("-m"), OsStr::new("venv"), venv.as_os_str()])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ScriptError::Io)?;
    if !create.status.success() {
        let _ = fs::remove_dir_all(venv).await;
        return Err(ScriptError::InstallFailed {
            step: "venv creation",
            exit_code: create.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&create.stderr).into_owned(),
        });
    }

    let install = Command::new(venv.join("bin").join("pip"))
        .arg("install")
        .args(packages)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ScriptError::Io)?;
    if !install.status.success() {
        let _ = fs::remove_dir_all(venv).await;
        return Err(ScriptError::InstallFailed {
            step: "pip install",
            exit_code: install.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&install.stderr).into_owned(),
        });
    }

    fs::write(venv.join(PREPARED_MARKER), packages.join("\n"))
        .await
        .map_err(ScriptError::Io)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_unbuffered() {
        let cmd = command(OsStr::new("python3"), Path::new("/w/script_3_9.py"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "python3");
        let unbuffered = std_cmd
            .get_envs()
            .any(|(k, v)| k == "PYTHONUNBUFFERED" && v == Some(OsStr::new("1")));
        assert!(unbuffered);
    }

    #[test]
    fn venv_layout() {
        let venv = venv_dir(Path::new("/var/venvs"), "abc123");
        assert_eq!(venv, Path::new("/var/venvs/venv_abc123"));
        assert_eq!(venv_python(&venv), Path::new("/var/venvs/venv_abc123/bin/python"));
    }

    #[tokio::test]
    async fn prepared_venv_is_reused_without_spawning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let venv = venv_dir(dir.path(), "k");
        std::fs::create_dir_all(&venv).expect("mkdir");
        std::fs::write(venv.join(PREPARED_MARKER), "requests").expect("marker");

        ensure_venv("/nonexistent/python3", &venv, &["requests".to_string()])
            .await
            .expect("reuse");
    }
}
