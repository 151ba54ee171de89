//! Shell runtime: scripts run as `bash <path>`.

use std::path::Path;

use tokio::process::Command;

/// Build the command that runs `script` with `shell_bin`.
pub fn command(shell_bin: &str, script: &Path) -> Command {
    let mut cmd = Command::new(shell_bin);
    cmd.arg(script);
    cmd
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
