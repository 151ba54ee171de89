//! Package preparation with a per-package-set cache.
//!
//! Python scripts with packages get a venv keyed by a SHA-256 of the
//! language and the normalized package list. Concurrent requests for the
//! same key share one install; failures are not cached, so the next run
//! retries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use super::executor::ScriptError;
use super::python;
use crate::hashing::digest_fields;
use crate::script_types::ScriptLanguage;

/// Environment produced by preparation, consumed by the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedEnv {
    /// Interpreter to run the script with instead of the default.
    pub interpreter: Option<PathBuf>,
}

/// Trim, drop blanks, sort and de-duplicate a package list.
pub fn normalize_packages(packages: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = packages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Cache key for a normalized package set.
pub fn cache_key(language: ScriptLanguage, packages: &[String]) -> String {
    digest_fields(std::iter::once(language.as_str()).chain(packages.iter().map(String::as_str)))
}

pub struct PackagePreparer {
    python_bin: String,
    venv_base_dir: PathBuf,
    venvs: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
}

impl PackagePreparer {
    pub fn new(python_bin: impl Into<String>, venv_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            python_bin: python_bin.into(),
            venv_base_dir: venv_base_dir.into(),
            venvs: Mutex::new(HashMap::new()),
        }
    }

    /// Make `packages` available to a script in `language`.
    ///
    /// Shell scripts have no package manager; their packages are ignored.
    pub async fn prepare(
        &self,
        language: ScriptLanguage,
        packages: &[String],
    ) -> Result<PreparedEnv, ScriptError> {
        let packages = normalize_packages(packages);
        if packages.is_empty() {
            return Ok(PreparedEnv::default());
        }
        if language == ScriptLanguage::Shell {
            tracing::debug!(count = packages.len(), "Ignoring packages for shell script");
            return Ok(PreparedEnv::default());
        }

        let key = cache_key(language, &packages);
        let cell = {
            let mut venvs = self.venvs.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(venvs.entry(key.clone()).or_default())
        };

        let venv = cell
            .get_or_try_init(|| async {
                let venv = python::venv_dir(&self.venv_base_dir, &key);
                tracing::info!(
                    venv = %venv.display(),
                    packages = ?packages,
                    "Preparing python environment",
                );
                python::ensure_venv(&self.python_bin, &venv, &packages).await?;
                Ok::<_, ScriptError>(venv)
            })
            .await?;

        Ok(PreparedEnv {
            interpreter: Some(python::venv_python(venv)),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use assert_matches::assert_matches;

    use super::*;

    /// Stand-in for `python3 -m venv <dir>` that creates a `bin/pip` which
    /// appends its arguments to `<base>/installs.log` and exits `pip_exit`.
    fn fake_python(dir: &Path, pip_exit: i32) -> String {
        let path = dir.join("fake-python");
        let body = format!(
            r#"#!/bin/sh
venv="$3"
mkdir -p "$venv/bin"
cat > "$venv/bin/pip" <<PIP
#!/bin/sh
echo "\$@" >> "$venv/../installs.log"
exit {pip_exit}
PIP
chmod +x "$venv/bin/pip"
"#
        );
        std::fs::write(&path, body).expect("write fake python");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        path.to_string_lossy().into_owned()
    }

    fn installs(base: &Path) -> Vec<String> {
        std::fs::read_to_string(base.join("installs.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn pkgs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization_sorts_and_dedups() {
        assert_eq!(
            normalize_packages(&pkgs(&[" requests", "", "numpy", "requests"])),
            pkgs(&["numpy", "requests"])
        );
    }

    #[test]
    fn cache_key_depends_on_language_and_set() {
        let a = cache_key(ScriptLanguage::Python, &pkgs(&["numpy"]));
        assert_eq!(a, cache_key(ScriptLanguage::Python, &pkgs(&["numpy"])));
        assert_ne!(a, cache_key(ScriptLanguage::Shell, &pkgs(&["numpy"])));
        assert_ne!(a, cache_key(ScriptLanguage::Python, &pkgs(&["pandas"])));
    }

    #[tokio::test]
    async fn empty_or_shell_packages_are_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let preparer = PackagePreparer::new("/nonexistent/python3", dir.path());
        let env = preparer
            .prepare(ScriptLanguage::Python, &[])
            .await
            .expect("empty");
        assert_eq!(env, PreparedEnv::default());
        let env = preparer
            .prepare(ScriptLanguage::Shell, &pkgs(&["jq"]))
            .await
            .expect("shell");
        assert_eq!(env, PreparedEnv::default());
    }

    #[tokio::test]
    async fn same_set_installs_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("venvs");
        let preparer = PackagePreparer::new(fake_python(dir.path(), 0), &base);

        let first = preparer
            .prepare(ScriptLanguage::Python, &pkgs(&["requests", "numpy"]))
            .await
            .expect("first");
        let second = preparer
            .prepare(ScriptLanguage::Python, &pkgs(&["numpy", "requests"]))
            .await
            .expect("second");

        assert_eq!(first, second);
        let interpreter = first.interpreter.expect("venv interpreter");
        assert!(interpreter.ends_with("bin/python"));
        assert_eq!(installs(&base), vec!["install numpy requests"]);
    }

    #[tokio::test]
    async fn concurrent_requests_share_install() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("venvs");
        let preparer = Arc::new(PackagePreparer::new(fake_python(dir.path(), 0), &base));

        let tasks = (0..4).map(|_| {
            let preparer = Arc::clone(&preparer);
            async move {
                preparer
                    .prepare(ScriptLanguage::Python, &pkgs(&["requests"]))
                    .await
            }
        });
        for result in futures::future::join_all(tasks).await {
            result.expect("prepare");
        }
        assert_eq!(installs(&base).len(), 1);
    }

    #[tokio::test]
    async fn failed_install_is_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("venvs");
        let preparer = PackagePreparer::new(fake_python(dir.path(), 1), &base);

        let result = preparer
            .prepare(ScriptLanguage::Python, &pkgs(&["nope"]))
            .await;
        assert_matches!(
            result,
            Err(ScriptError::InstallFailed { step: "pip install", exit_code: 1, .. })
        );
        let key = cache_key(ScriptLanguage::Python, &pkgs(&["nope"]));
        assert!(!python::venv_dir(&base, &key).exists());

        let _ = preparer
            .prepare(ScriptLanguage::Python, &pkgs(&["nope"]))
            .await;
        assert_eq!(installs(&base).len(), 2);
    }
}
