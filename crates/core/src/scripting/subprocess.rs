//! Script process lifecycle: materialize, spawn, stream, terminate.
//!
//! Each run gets its own process group so that cancellation reaches any
//! children the script forks. Stopping a group sends `SIGTERM`, waits the
//! grace period, then sends `SIGKILL`. Whatever is left in the group once the
//! leader is reaped is killed as well.
//!
//! stdout and stderr are the same pipe, so captured lines keep the exact
//! order in which the process wrote them. Unix only.

use std::ffi::OsStr;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::{OutputSink, ProcessOutcome, RunRequest, ScriptError, Termination};
use super::{python, shell};
use crate::script_types::ScriptLanguage;

/// How long the reader may keep draining the pipe after the child exits.
///
/// A process that left the group can inherit the pipe and hold it open;
/// once this elapses the reader is aborted.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Static settings shared by every run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory where script files are materialized and processes run.
    pub work_dir: PathBuf,
    /// Shell interpreter binary.
    pub shell_bin: String,
    /// Python interpreter used when no venv is prepared.
    pub python_bin: String,
    /// Time between `SIGTERM` and `SIGKILL`.
    pub grace_period: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("scriptd"),
            shell_bin: "bash".to_string(),
            python_bin: "python3".to_string(),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Launches script processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Path the source for `request` is written to.
    pub fn script_path(&self, request: &RunRequest) -> PathBuf {
        self.config.work_dir.join(format!(
            "script_{}_{}.{}",
            request.script_id,
            request.execution_id,
            request.language.extension()
        ))
    }

    /// Write the source to disk and spawn the interpreter.
    ///
    /// Output lines are forwarded to `sink` as they arrive. Triggering
    /// `cancel` stops the process group; see [`RunningProcess::wait`].
    pub async fn start(
        &self,
        request: RunRequest,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Result<RunningProcess, ScriptError> {
        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(ScriptError::Io)?;

        let script_path = self.script_path(&request);
        tokio::fs::write(&script_path, request.source.as_bytes())
            .await
            .map_err(ScriptError::Io)?;

        let (output, output_writer) = match output_pipe() {
            Ok(pipe) => pipe,
            Err(e) => {
                remove_script_file(&script_path).await;
                return Err(ScriptError::Io(e));
            }
        };

        let mut cmd = match request.language {
            ScriptLanguage::Shell => shell::command(&self.config.shell_bin, &script_path),
            ScriptLanguage::Python => {
                let interpreter = request
                    .interpreter
                    .as_deref()
                    .map(Path::as_os_str)
                    .unwrap_or_else(|| OsStr::new(&self.config.python_bin));
                python::command(interpreter, &script_path)
            }
        };

        cmd.envs(&request.variables)
            .env("SCRIPT_ID", request.script_id.to_string())
            .env("EXECUTION_ID", request.execution_id.to_string())
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(output_writer.stdout)
            .stderr(output_writer.stderr)
            .kill_on_drop(true)
            .process_group(0);

        let started = Instant::now();
        let spawned = cmd.spawn();
        // The command owns the parent's copies of the write end; the reader
        // only sees EOF once they are closed.
        drop(cmd);
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                remove_script_file(&script_path).await;
                return Err(ScriptError::Spawn(e));
            }
        };

        let pid = child.id();
        tracing::debug!(
            script_id = request.script_id,
            execution_id = request.execution_id,
            pid,
            language = %request.language,
            "Script process spawned",
        );

        Ok(RunningProcess {
            child,
            pid,
            script_path,
            reader: spawn_reader(output, sink),
            cancel,
            timeout: request.timeout,
            grace_period: self.config.grace_period,
            started,
        })
    }
}

/// A spawned script process that has not been waited on yet.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    script_path: PathBuf,
    reader: JoinHandle<()>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    grace_period: Duration,
    started: Instant,
}

impl RunningProcess {
    /// OS process id (also the process group id).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to end, stopping it on cancellation or deadline.
    ///
    /// A natural exit observed before the stop request wins. Once the leader
    /// is reaped the rest of its group is killed, captured output is drained
    /// into the sink, and the script file is removed.
    pub async fn wait(self) -> Result<ProcessOutcome, ScriptError> {
        let Self {
            mut child,
            pid,
            script_path,
            reader,
            cancel,
            timeout,
            grace_period,
            started,
        } = self;

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let waited = tokio::select! {
            biased;
            status = child.wait() => status.map(|s| (s, Termination::Exited, false)),
            _ = cancel.cancelled() => stop_group(&mut child, pid, grace_period)
                .await
                .map(|(s, escalated)| (s, Termination::Cancelled, escalated)),
            _ = &mut deadline => stop_group(&mut child, pid, grace_period)
                .await
                .map(|(s, escalated)| (s, Termination::DeadlineExceeded, escalated)),
        };
        let duration = started.elapsed();

        if let Some(pid) = pid {
            sweep_group(pid);
        }
        drain_reader(reader).await;
        remove_script_file(&script_path).await;

        let (status, termination, escalated) = waited.map_err(ScriptError::Io)?;
        if termination != Termination::Exited {
            tracing::info!(
                pid,
                ?termination,
                escalated,
                "Script process stopped",
            );
        }

        Ok(ProcessOutcome {
            exit_code: status.code(),
            termination,
            escalated,
            duration,
        })
    }
}

/// Write ends handed to the child for stdout and stderr.
struct OutputWriter {
    stdout: Stdio,
    stderr: Stdio,
}

/// One pipe carrying both output streams, with an async read end.
fn output_pipe() -> std::io::Result<(pipe::Receiver, OutputWriter)> {
    let (reader, writer) = std::io::pipe()?;
    let stdout = Stdio::from(writer.try_clone()?);
    let stderr = Stdio::from(writer);
    let reader = pipe::Receiver::from_file(std::fs::File::from(OwnedFd::from(reader)))?;
    Ok((reader, OutputWriter { stdout, stderr }))
}

/// Send `SIGTERM` to the group, then `SIGKILL` once `grace` elapses.
///
/// Returns the exit status and whether the kill had to escalate.
async fn stop_group(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
) -> std::io::Result<(ExitStatus, bool)> {
    let Some(pid) = pid else {
        return child.wait().await.map(|s| (s, false));
    };

    if let Err(e) = signal_group(pid, Signal::Term) {
        tracing::debug!(pid, error = %e, "Failed to signal process group");
    }
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status.map(|s| (s, false));
    }

    tracing::warn!(
        pid,
        grace_ms = grace.as_millis() as u64,
        "Grace period elapsed, killing process group",
    );
    if let Err(e) = signal_group(pid, Signal::Kill) {
        tracing::debug!(pid, error = %e, "Failed to signal process group");
    }
    child.wait().await.map(|s| (s, true))
}

/// Kill whatever is left in the group after the leader was reaped.
fn sweep_group(pid: u32) {
    match signal_group(pid, Signal::Kill) {
        Ok(()) => tracing::debug!(pid, "Killed processes left in the group"),
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
        Err(e) => tracing::debug!(pid, error = %e, "Failed to sweep process group"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

fn signal_group(pid: u32, signal: Signal) -> std::io::Result<()> {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the group created by `process_group(0)` at spawn.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signo) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Forward each line of `reader` to `sink` until EOF.
///
/// Invalid UTF-8 is replaced rather than aborting the stream.
fn spawn_reader<R>(reader: R, sink: Arc<dyn OutputSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    sink.line(String::from_utf8_lossy(&buf).into_owned());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Output read failed");
                    break;
                }
            }
        }
    })
}

async fn drain_reader(mut reader: JoinHandle<()>) {
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        tracing::warn!("Output pipe still open after exit, abandoning reader");
        reader.abort();
    }
}

async fn remove_script_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove script file");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
