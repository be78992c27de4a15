//! Subprocess supervision: streaming output, bounded tail, deadline.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use q4d_core::JobKey;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{TransferError, TransferResult};

/// How long output readers may run on once the tool has exited or been
/// killed. Descendants of the tool can hold the pipes open indefinitely.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Result of one supervised tool invocation.
#[derive(Debug)]
pub(crate) struct RunReport {
    /// Exit code, `None` when killed by a signal or by the deadline.
    pub(crate) exit_code: Option<i32>,
    /// Whether the deadline expired and the child was killed.
    pub(crate) timed_out: bool,
    /// Last captured output lines (stdout then stderr).
    pub(crate) tail: Vec<String>,
}

impl RunReport {
    pub(crate) const fn succeeded(&self) -> bool {
        !self.timed_out && matches!(self.exit_code, Some(0))
    }
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Spawn `command`, forward its output to tracing line by line, and wait
/// for exit or `deadline`, whichever comes first.
pub(crate) async fn run_streaming(
    mut command: Command,
    program: &str,
    key: &JobKey,
    deadline: Option<Instant>,
    tail_lines: usize,
) -> TransferResult<RunReport> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| TransferError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(TransferError::Pipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(TransferError::Pipe { stream: "stderr" })?;

    let stdout_task = tokio::spawn(pump(stdout, OutputStream::Stdout, key.clone(), tail_lines));
    let stderr_task = tokio::spawn(pump(stderr, OutputStream::Stderr, key.clone(), tail_lines));

    let (exit_code, timed_out) = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => (status.map_err(|source| TransferError::Wait { source })?.code(), false),
            Err(_) => {
                warn!(job_key = %key, program, "Transfer deadline reached; killing tool");
                if let Err(err) = child.kill().await {
                    warn!(job_key = %key, error = %err, "Failed to kill transfer tool");
                }
                (None, true)
            }
        },
        None => (
            child
                .wait()
                .await
                .map_err(|source| TransferError::Wait { source })?
                .code(),
            false,
        ),
    };

    let drain_until = Instant::now() + OUTPUT_DRAIN;
    let mut tail = drain(stdout_task, drain_until, key, OutputStream::Stdout).await;
    tail.extend(drain(stderr_task, drain_until, key, OutputStream::Stderr).await);
    debug!(job_key = %key, program, exit_code, timed_out, "Transfer tool exited");

    Ok(RunReport {
        exit_code,
        timed_out,
        tail,
    })
}

/// Collect a reader's tail, abandoning it if the pipe is still open at `until`.
async fn drain(
    mut task: JoinHandle<Vec<String>>,
    until: Instant,
    key: &JobKey,
    stream: OutputStream,
) -> Vec<String> {
    match tokio::time::timeout_at(until, &mut task).await {
        Ok(tail) => tail.unwrap_or_default(),
        Err(_) => {
            task.abort();
            warn!(
                job_key = %key,
                stream = stream.as_str(),
                "Transfer output still open after the tool ended; reader detached"
            );
            Vec::new()
        }
    }
}

async fn pump<R>(reader: R, stream: OutputStream, key: JobKey, tail_lines: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(tail_lines);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                match stream {
                    OutputStream::Stdout => {
                        debug!(job_key = %key, stream = stream.as_str(), line = %line, "transfer output");
                    }
                    OutputStream::Stderr => {
                        info!(job_key = %key, stream = stream.as_str(), line = %line, "transfer output");
                    }
                }
                if tail.len() == tail_lines {
                    tail.pop_front();
                }
                if tail_lines > 0 {
                    tail.push_back(line);
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(job_key = %key, stream = stream.as_str(), error = %err, "Stopped reading transfer output");
                break;
            }
        }
    }
    tail.into()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    #[serial]
    async fn captures_tail_from_both_streams() -> TransferResult<()> {
        let key = JobKey::from("k");
        let report = run_streaming(
            shell("echo one; echo two; echo three; echo oops >&2; exit 3"),
            "sh",
            &key,
            None,
            2,
        )
        .await?;
        assert_eq!(report.exit_code, Some(3));
        assert!(!report.succeeded());
        assert_eq!(report.tail, vec!["two", "three", "oops"]);
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn deadline_kills_the_child() -> TransferResult<()> {
        let key = JobKey::from("k");
        let started = std::time::Instant::now();
        let report = run_streaming(
            shell("exec sleep 5"),
            "sh",
            &key,
            Some(Instant::now() + Duration::from_millis(200)),
            4,
        )
        .await?;
        assert!(report.timed_out);
        assert!(report.exit_code.is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn deadline_is_not_held_up_by_descendants_keeping_pipes_open() -> TransferResult<()> {
        let key = JobKey::from("k");
        let started = std::time::Instant::now();
        let report = run_streaming(
            shell("sleep 8; echo late"),
            "sh",
            &key,
            Some(Instant::now() + Duration::from_millis(200)),
            4,
        )
        .await?;
        assert!(report.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn missing_program_is_a_spawn_error() {
        let key = JobKey::from("k");
        let result = run_streaming(
            Command::new("/nonexistent/q4d-tool"),
            "/nonexistent/q4d-tool",
            &key,
            None,
            4,
        )
        .await;
        assert!(matches!(result, Err(TransferError::Spawn { .. })));
    }
}
