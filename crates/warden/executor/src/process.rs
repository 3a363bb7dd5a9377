//! Bounded child-process execution.
//!
//! Output is read concurrently from both pipes into capped buffers so a
//! chatty tool cannot exhaust memory before its deadline. On timeout the child
//! is killed and reaped before returning; dropping the future mid-run kills it
//! through `kill_on_drop`.
//!
//! On unix the child leads its own process group. Whatever it started (build
//! backends, compilers) is killed with the group once the child is done, times
//! out or is dropped, so nothing outlives the call.

use crate::error::{ExecutorError, ExecutorResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Per-stream output cap.
pub const DEFAULT_MAX_STREAM_BYTES: usize = 512 * 1024;

/// How long to wait for pipe readers after the child is gone. A grandchild
/// holding the pipe open must not stall the caller.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub max_stream_bytes: usize,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            max_stream_bytes: DEFAULT_MAX_STREAM_BYTES,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn display_program(&self) -> String {
        self.program.display().to_string()
    }
}

/// Kills the child's process group when released or dropped.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        // Nothing left in the group.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// What came back from a child that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub pid: Option<u32>,
}

impl ProcessOutput {
    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        combine(&self.stdout, &self.stderr)
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr),
    }
}

async fn read_bounded<R>(mut stream: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    let mut truncated = false;

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                if n > room {
                    buf.extend_from_slice(&chunk[..room]);
                    truncated = true;
                    // Keep draining so the child never blocks on a full pipe.
                    continue;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

async fn collect(handle: Option<JoinHandle<String>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) | Err(_) => String::new(),
    }
}

/// Run a child to completion or until its deadline.
///
/// A nonzero exit is not an error here; callers decide what it means.
#[tracing::instrument(skip(spec), fields(program = %spec.program.display(), timeout_secs = spec.timeout.as_secs()))]
pub async fn run(spec: &ProcessSpec) -> ExecutorResult<ProcessOutput> {
    let started = Instant::now();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
        program: spec.display_program(),
        source,
    })?;
    let pid = child.id();
    // With process_group(0) the group id is the child's pid.
    let mut group = ProcessGroup::new(pid);
    tracing::debug!(pid = ?pid, args = ?spec.args, "Spawned child process");

    let limit = spec.max_stream_bytes;
    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_bounded(pipe, limit)));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_bounded(pipe, limit)));

    match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            group.kill();
            let stdout = collect(stdout).await;
            let stderr = collect(stderr).await;
            let duration = started.elapsed();
            tracing::debug!(
                code = ?status.code(),
                duration_ms = duration.as_millis() as u64,
                "Child process exited"
            );
            Ok(ProcessOutput {
                code: status.code(),
                success: status.success(),
                stdout,
                stderr,
                duration,
                pid,
            })
        }
        Ok(Err(e)) => {
            group.kill();
            let _ = child.kill().await;
            Err(ExecutorError::Io(e))
        }
        Err(_) => {
            group.kill();
            // kill() sends SIGKILL and waits, so the child is reaped here.
            if let Err(e) = child.kill().await {
                tracing::warn!(pid = ?pid, error = %e, "Failed to kill timed-out child");
            }
            let stdout = collect(stdout).await;
            let stderr = collect(stderr).await;
            tracing::warn!(pid = ?pid, "Child process timed out and was killed");
            Err(ExecutorError::Timeout {
                program: spec.display_program(),
                limit: spec.timeout,
                partial_output: combine(&stdout, &stderr),
            })
        }
    }
}
