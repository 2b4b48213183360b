//! # Command Execution Module / 命令执行模块
//!
//! Spawns one child process, captures its stdout and stderr, and bounds it by
//! an optional timeout and a cancellation token. Each child gets its own
//! process group so that a timeout or Ctrl-C kills everything it started.
//!
//! 派生单个子进程，捕获其 stdout 和 stderr，并受可选超时和取消令牌约束。
//! 每个子进程拥有独立的进程组，超时或 Ctrl-C 时会杀死它启动的所有进程。

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lines of captured output kept in result details.
pub const OUTPUT_SNIPPET_LINES: usize = 50;

/// How long to wait for pipe readers after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to run one attempt.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    /// Layered over the inherited environment.
    pub env: &'a [(String, String)],
    pub timeout: Option<Duration>,
    pub stdin: Option<&'a [u8]>,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    Exited(i32),
    /// Terminated by a signal without an exit code.
    Signaled,
    TimedOut,
    Interrupted,
    SpawnFailed(String),
}

/// Outcome of a single attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub argv: Vec<String>,
    pub status: AttemptStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Exited(0)
    }

    pub fn timed_out(&self) -> bool {
        self.status == AttemptStatus::TimedOut
    }

    pub fn interrupted(&self) -> bool {
        self.status == AttemptStatus::Interrupted
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            AttemptStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Human-readable account of a failed attempt with trimmed output.
    pub fn describe(&self) -> String {
        let command = self.argv.join(" ");
        let mut text = match &self.status {
            AttemptStatus::Exited(code) => format!("command '{command}' exited with code {code}"),
            AttemptStatus::Signaled => format!("command '{command}' was killed by a signal"),
            AttemptStatus::TimedOut => format!(
                "command '{command}' timed out after {:.1}s",
                self.duration.as_secs_f64()
            ),
            AttemptStatus::Interrupted => format!("command '{command}' was interrupted"),
            AttemptStatus::SpawnFailed(reason) => {
                format!("command '{command}' could not be started: {reason}")
            }
        };
        for (label, output) in [("stderr", &self.stderr), ("stdout", &self.stdout)] {
            if !output.trim().is_empty() {
                text.push_str(&format!("\n--- {label} ---\n{}", summarize_output(output)));
            }
        }
        text
    }
}

/// Keeps the last `OUTPUT_SNIPPET_LINES` lines of a captured stream.
pub fn summarize_output(raw_output: &str) -> String {
    let lines: Vec<&str> = raw_output.trim_end().lines().collect();
    if lines.len() <= OUTPUT_SNIPPET_LINES {
        return lines.join("\n");
    }
    let skipped = lines.len() - OUTPUT_SNIPPET_LINES;
    format!(
        "... ({skipped} earlier lines omitted)\n{}",
        lines[skipped..].join("\n")
    )
}

enum Ended {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs one attempt to completion, timeout or cancellation.
///
/// 运行一次尝试，直到完成、超时或被取消。
pub async fn run_attempt(spec: &CommandSpec<'_>, cancel: &CancellationToken) -> AttemptRecord {
    let start = Instant::now();
    let argv = spec.argv.to_vec();
    let finish = |status, stdout, stderr| AttemptRecord {
        argv: argv.clone(),
        status,
        stdout,
        stderr,
        duration: start.elapsed(),
    };

    let Some((program, args)) = spec.argv.split_first() else {
        return finish(
            AttemptStatus::SpawnFailed("empty command".to_string()),
            String::new(),
            String::new(),
        );
    };
    if cancel.is_cancelled() {
        return finish(AttemptStatus::Interrupted, String::new(), String::new());
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return finish(AttemptStatus::SpawnFailed(e.to_string()), String::new(), String::new());
        }
    };
    tracing::debug!(pid = ?child.id(), command = %spec.argv.join(" "), "spawned child");

    if let (Some(mut pipe), Some(data)) = (child.stdin.take(), spec.stdin) {
        let data = data.to_vec();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&data).await {
                tracing::debug!("failed to write child stdin: {e}");
            }
        });
    }
    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_stream(s)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_stream(s)));

    let ended = tokio::select! {
        res = child.wait() => Ended::Exited(res),
        _ = deadline(spec.timeout) => Ended::TimedOut,
        _ = cancel.cancelled() => Ended::Cancelled,
    };

    let status = match ended {
        Ended::Exited(Ok(status)) => match status.code() {
            Some(code) => AttemptStatus::Exited(code),
            None => AttemptStatus::Signaled,
        },
        Ended::Exited(Err(e)) => AttemptStatus::SpawnFailed(e.to_string()),
        Ended::TimedOut => {
            terminate(&mut child).await;
            AttemptStatus::TimedOut
        }
        Ended::Cancelled => {
            terminate(&mut child).await;
            AttemptStatus::Interrupted
        }
    };

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;
    finish(status, stdout, stderr)
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!("stopped reading child output: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(task: Option<JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::debug!("output reader task failed: {e}");
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// Kills the child's whole process group, then reaps the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, "killpg failed: {e}");
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!("kill failed: {e}");
    }
    if let Err(e) = child.wait().await {
        tracing::debug!("wait after kill failed: {e}");
    }
}
