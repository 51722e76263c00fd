//! Command executor - runs an already-resolved shell line
//! - spawns `shell -c line` in its own process group
//! - captures stdout and stderr separately, each capped at max_output_bytes
//! - on timeout kills the whole group and keeps whatever output was captured
//! - dropping the future kills the group as well
//!
//! The line is never parsed or escaped here.

use crate::command::{Command, ExecutionResult};
use serde::{Deserialize, Serialize};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as ProcessCommand;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit code reported when a command was killed for running too long
pub const TIMEOUT_EXIT_CODE: i32 = -1;
/// Exit code reported when the shell could not be spawned at all
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;
/// Exit code reported when the child was spawned but its status could not be collected
pub const WAIT_FAILURE_EXIT_CODE: i32 = -2;

const TRUNCATED_MARKER: &str = "\n...[truncated]";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Shell invoked as `shell -c line`
    pub shell: String,
    /// Used when a command carries no timeout of its own
    pub default_timeout_ms: u64,
    /// Per stream; extra bytes are drained and dropped
    pub max_output_bytes: usize,
    /// How long to wait for pipes to drain after a kill
    pub kill_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            default_timeout_ms: 30_000,
            max_output_bytes: 1024 * 1024,
            kill_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Timeout applied to `command`: its own, else the configured default
    pub fn timeout_for(&self, command: &Command) -> Duration {
        command
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.config.default_timeout_ms))
    }

    /// Run a command to completion or timeout. Never fails: spawn errors and
    /// non-zero exits come back as an ordinary result.
    pub async fn execute(&self, command: &Command) -> ExecutionResult {
        let limit = self.timeout_for(command);
        let grace = Duration::from_millis(self.config.kill_grace_ms);
        let started = Instant::now();

        let mut cmd = ProcessCommand::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&command.line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(line = %command.line, timeout_ms = limit.as_millis() as u64, "spawning command");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(shell = %self.config.shell, error = %e, "failed to spawn command");
                return ExecutionResult {
                    stdout: String::new(),
                    stderr: format!("failed to spawn '{}': {}", self.config.shell, e),
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timed_out: false,
                };
            }
        };

        let mut group = ProcessGroupGuard::new(child.id());
        let stdout_buf = Arc::new(Mutex::new(Captured::default()));
        let stderr_buf = Arc::new(Mutex::new(Captured::default()));
        let max = self.config.max_output_bytes;
        let mut stdout_task = spawn_reader(child.stdout.take(), stdout_buf.clone(), max);
        let mut stderr_task = spawn_reader(child.stderr.take(), stderr_buf.clone(), max);

        // The command is finished once it has exited and both pipes are closed;
        // a background job still holding a pipe keeps it running.
        let finished = timeout(limit, async {
            let status = child.wait().await;
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
            status
        })
        .await;

        let (exit_code, timed_out) = match finished {
            Ok(Ok(status)) => {
                group.disarm();
                (exit_code_of(status), false)
            }
            Ok(Err(e)) => {
                group.kill();
                wait_failure(&e, &stderr_buf)
            }
            Err(_) => {
                warn!(line = %command.line, timeout_ms = limit.as_millis() as u64, "command timed out, killing process group");
                group.kill();
                let _ = child.start_kill();
                let _ = timeout(grace, child.wait()).await;
                let _ = timeout(grace, async {
                    let _ = (&mut stdout_task).await;
                    let _ = (&mut stderr_task).await;
                })
                .await;
                (TIMEOUT_EXIT_CODE, true)
            }
        };
        stdout_task.abort();
        stderr_task.abort();

        let result = ExecutionResult {
            stdout: take_output(&stdout_buf),
            stderr: take_output(&stderr_buf),
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out,
        };
        debug!(
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            timed_out = result.timed_out,
            "command finished"
        );
        result
    }
}

/// Run `command` with default settings and an explicit timeout
pub async fn execute(command: &Command, timeout_ms: u64) -> ExecutionResult {
    let command = command.clone().with_timeout(Duration::from_millis(timeout_ms));
    Executor::default().execute(&command).await
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(TIMEOUT_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(TIMEOUT_EXIT_CODE)
}

/// Bytes read from one stream, capped
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn push(&mut self, chunk: &[u8], cap: usize) {
        let room = cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATED_MARKER);
        }
        text
    }
}

fn spawn_reader<R>(stream: Option<R>, sink: Arc<Mutex<Captured>>, cap: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return;
        };
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut captured) = sink.lock() {
                        captured.push(&buf[..n], cap);
                    }
                }
            }
        }
    })
}

fn take_output(sink: &Arc<Mutex<Captured>>) -> String {
    sink.lock()
        .map(|mut captured| std::mem::take(&mut *captured).into_string())
        .unwrap_or_default()
}

/// Outcome for a child whose exit status was lost. The group has already
/// been killed by the caller.
fn wait_failure(error: &std::io::Error, stderr: &Arc<Mutex<Captured>>) -> (i32, bool) {
    warn!(error = %error, "failed waiting for command");
    push_note(stderr, &format!("failed waiting for command: {}", error));
    (WAIT_FAILURE_EXIT_CODE, false)
}

fn push_note(sink: &Arc<Mutex<Captured>>, note: &str) {
    if let Ok(mut captured) = sink.lock() {
        if !captured.bytes.is_empty() && !captured.bytes.ends_with(b"\n") {
            captured.bytes.push(b'\n');
        }
        captured.bytes.extend_from_slice(note.as_bytes());
    }
}

/// Kills the child's process group when dropped while still armed, so an
/// aborted request never leaves descendants behind.
struct ProcessGroupGuard {
    pgid: Option<u32>,
    armed: bool,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid, armed: true }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
        self.armed = false;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if self.armed {
            self.kill();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SAFETY: killpg only sends a signal; a stale group id yields ESRCH.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}
