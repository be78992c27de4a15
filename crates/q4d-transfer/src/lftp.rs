//! `lftp`-backed transfer executor.
//!
//! # Design
//! - Directory payloads are fetched with `mirror`; when that fails the path
//!   is retried once as a single file with `pget`.
//! - The tool runs with the destination directory as its working directory.
//! - Classification uses the output of the last command that ran.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use q4d_core::{TransferExecutor, TransferOutcome, TransferRequest};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::classify::classify;
use crate::error::TransferError;
use crate::permissions::{landed_path, normalise};
use crate::runner::{RunReport, run_streaming};

/// Accept unknown SFTP host keys so unattended runs do not stall.
const HOST_KEY_FIX: &str = "set sftp:auto-confirm yes";

/// Output lines kept per stream for classification.
const DEFAULT_TAIL_LINES: usize = 20;

/// Settings for [`LftpExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LftpConfig {
    /// Program to run (normally `lftp`).
    pub program: String,
    /// Seedbox SFTP host.
    pub host: String,
    /// `user:password` passed to `-u`.
    pub creds: String,
    /// Parallel file count for `mirror`.
    pub threads: NonZeroU32,
    /// Optional wall-clock limit per job, covering both commands.
    pub job_timeout: Option<Duration>,
    /// Output lines kept per stream for classification.
    pub tail_lines: usize,
}

impl LftpConfig {
    /// Settings with the default program and tail size.
    #[must_use]
    pub fn new(host: impl Into<String>, creds: impl Into<String>, threads: NonZeroU32) -> Self {
        Self {
            program: "lftp".to_string(),
            host: host.into(),
            creds: creds.into(),
            threads,
            job_timeout: None,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Mirror,
    Pget,
}

impl Step {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Mirror => "mirror",
            Self::Pget => "pget",
        }
    }
}

/// Runs transfers through `lftp` over SFTP.
#[derive(Debug, Clone)]
pub struct LftpExecutor {
    config: LftpConfig,
}

impl LftpExecutor {
    /// Build an executor from its settings.
    #[must_use]
    pub const fn new(config: LftpConfig) -> Self {
        Self { config }
    }

    fn script(&self, step: Step, request: &TransferRequest) -> String {
        let target = quote(&request.source_path);
        match step {
            Step::Mirror => format!(
                "{HOST_KEY_FIX}; mirror -c --parallel={} --use-pget-n={} {target} ;quit",
                self.config.threads, request.segments
            ),
            Step::Pget => format!(
                "{HOST_KEY_FIX}; pget -n {} {target} ;quit",
                request.segments
            ),
        }
    }

    fn command(&self, step: Step, request: &TransferRequest) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .arg("-u")
            .arg(&self.config.creds)
            .arg(format!("sftp://{}/", self.config.host))
            .arg("-e")
            .arg(self.script(step, request))
            .current_dir(&request.destination_dir);
        command
    }

    async fn run(
        &self,
        step: Step,
        request: &TransferRequest,
        deadline: Option<Instant>,
    ) -> Result<RunReport, TransferError> {
        info!(
            job_id = %request.job_id,
            job_key = %request.key,
            attempt = request.attempt,
            step = step.as_str(),
            source = %request.source_path,
            destination = %request.destination_dir.display(),
            "Running transfer command"
        );
        run_streaming(
            self.command(step, request),
            &self.config.program,
            &request.key,
            deadline,
            self.config.tail_lines,
        )
        .await
    }

    async fn finish(request: &TransferRequest) -> TransferOutcome {
        if let Some(path) = landed_path(&request.destination_dir, &request.source_path) {
            normalise(&path).await;
        }
        TransferOutcome::Success
    }

    fn timed_out(&self) -> TransferOutcome {
        let limit = self.config.job_timeout.unwrap_or_default();
        TransferOutcome::TransientFailure(format!("timed out after {limit:?}"))
    }
}

#[async_trait]
impl TransferExecutor for LftpExecutor {
    async fn execute(&self, request: &TransferRequest) -> TransferOutcome {
        if let Err(source) = tokio::fs::create_dir_all(&request.destination_dir).await {
            return TransferError::Destination {
                path: request.destination_dir.clone(),
                source,
            }
            .into_outcome();
        }

        let deadline = self.config.job_timeout.map(|limit| Instant::now() + limit);

        let mirror = match self.run(Step::Mirror, request, deadline).await {
            Ok(report) => report,
            Err(err) => return err.into_outcome(),
        };
        if mirror.succeeded() {
            return Self::finish(request).await;
        }
        if mirror.timed_out {
            return self.timed_out();
        }
        info!(
            job_key = %request.key,
            exit_code = mirror.exit_code,
            "Mirror failed; retrying as a single file"
        );

        let pget = match self.run(Step::Pget, request, deadline).await {
            Ok(report) => report,
            Err(err) => return err.into_outcome(),
        };
        if pget.succeeded() {
            return Self::finish(request).await;
        }
        if pget.timed_out {
            return self.timed_out();
        }
        let outcome = classify(pget.exit_code, &pget.tail);
        warn!(job_key = %request.key, outcome = ?outcome, "Transfer failed");
        outcome
    }
}

/// Double-quote a path for an lftp command script.
fn quote(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for ch in path.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use q4d_core::JobKey;
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    fn threads(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
    }

    fn request(source: &str, destination: &Path) -> TransferRequest {
        TransferRequest {
            job_id: Uuid::new_v4(),
            key: JobKey::from("abc"),
            attempt: 1,
            source_path: source.to_string(),
            destination_dir: destination.to_path_buf(),
            segments: threads(3),
        }
    }

    #[test]
    fn quote_escapes_quotes_and_backslashes() {
        assert_eq!(quote("/d/My \"Show\""), "\"/d/My \\\"Show\\\"\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn scripts_carry_parallelism_settings() {
        let executor = LftpExecutor::new(LftpConfig::new("seedbox", "me:pw", threads(5)));
        let request = request("/downloads/Show", Path::new("/media/tv"));
        assert_eq!(
            executor.script(Step::Mirror, &request),
            "set sftp:auto-confirm yes; mirror -c --parallel=5 --use-pget-n=3 \"/downloads/Show\" ;quit"
        );
        assert_eq!(
            executor.script(Step::Pget, &request),
            "set sftp:auto-confirm yes; pget -n 3 \"/downloads/Show\" ;quit"
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use serial_test::serial;
        use std::error::Error;
        use std::os::unix::fs::PermissionsExt;

        /// Install a stand-in for lftp that runs `body` with the `-e` script in `$5`.
        fn fake_tool(dir: &Path, body: &str) -> Result<PathBuf, Box<dyn Error>> {
            let path = dir.join("fake-lftp");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
            Ok(path)
        }

        fn executor(program: &Path, timeout: Option<Duration>) -> LftpExecutor {
            let mut config = LftpConfig::new("seedbox", "me:pw", threads(2));
            config.program = program.display().to_string();
            config.job_timeout = timeout;
            LftpExecutor::new(config)
        }

        #[tokio::test]
        #[serial]
        async fn mirror_success_creates_destination_and_fixes_modes() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let media = tempfile::tempdir()?;
            let tool = fake_tool(tools.path(), "mkdir Show && chmod 700 Show && exit 0")?;
            let destination = media.path().join("tv");

            let outcome = executor(&tool, None)
                .execute(&request("/downloads/Show", &destination))
                .await;

            assert_eq!(outcome, TransferOutcome::Success);
            let mode = std::fs::metadata(destination.join("Show"))?.permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn mirror_failure_falls_back_to_pget() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let media = tempfile::tempdir()?;
            let tool = fake_tool(
                tools.path(),
                r#"case "$5" in
  *mirror*) echo "mirror: Access failed: Not a directory" >&2; exit 1 ;;
  *pget*) echo data > film.mkv; exit 0 ;;
esac
exit 9"#,
            )?;

            let outcome = executor(&tool, None)
                .execute(&request("/downloads/film.mkv", media.path()))
                .await;

            assert_eq!(outcome, TransferOutcome::Success);
            let mode = std::fs::metadata(media.path().join("film.mkv"))?.permissions().mode();
            assert_eq!(mode & 0o777, 0o666);
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn missing_remote_path_is_permanent() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let media = tempfile::tempdir()?;
            let tool = fake_tool(
                tools.path(),
                r#"echo "Access failed: No such file or directory (/downloads/gone)" >&2; exit 1"#,
            )?;

            let outcome = executor(&tool, None)
                .execute(&request("/downloads/gone", media.path()))
                .await;

            assert!(matches!(outcome, TransferOutcome::PermanentFailure(_)));
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn unrecognised_failure_is_transient() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let media = tempfile::tempdir()?;
            let tool = fake_tool(tools.path(), "echo 'weird' >&2; exit 42")?;

            let outcome = executor(&tool, None)
                .execute(&request("/downloads/x", media.path()))
                .await;

            assert!(matches!(
                outcome,
                TransferOutcome::TransientFailure(reason) if reason.contains("42")
            ));
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn timeout_kills_tool_and_is_transient() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let media = tempfile::tempdir()?;
            let tool = fake_tool(tools.path(), "exec sleep 10")?;
            let started = std::time::Instant::now();

            let outcome = executor(&tool, Some(Duration::from_millis(300)))
                .execute(&request("/downloads/slow", media.path()))
                .await;

            assert!(matches!(outcome, TransferOutcome::TransientFailure(_)));
            assert!(started.elapsed() < Duration::from_secs(5));
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn timeout_bounds_tools_that_fork() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let media = tempfile::tempdir()?;
            let tool = fake_tool(tools.path(), "sleep 8\necho late")?;
            let started = std::time::Instant::now();

            let outcome = executor(&tool, Some(Duration::from_millis(300)))
                .execute(&request("/downloads/slow", media.path()))
                .await;

            assert_eq!(
                outcome,
                TransferOutcome::TransientFailure("timed out after 300ms".to_string())
            );
            assert!(started.elapsed() < Duration::from_secs(5));
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn missing_tool_is_permanent() -> Result<(), Box<dyn Error>> {
            let media = tempfile::tempdir()?;
            let outcome = executor(Path::new("/nonexistent/lftp"), None)
                .execute(&request("/downloads/x", media.path()))
                .await;
            assert!(matches!(
                outcome,
                TransferOutcome::PermanentFailure(reason) if reason.contains("not found")
            ));
            Ok(())
        }

        #[tokio::test]
        #[serial]
        async fn unwritable_destination_is_permanent() -> Result<(), Box<dyn Error>> {
            let tools = tempfile::tempdir()?;
            let tool = fake_tool(tools.path(), "exit 0")?;
            let blocker = tools.path().join("file");
            std::fs::write(&blocker, b"x")?;

            let outcome = executor(&tool, None)
                .execute(&request("/downloads/x", &blocker.join("sub")))
                .await;

            assert!(matches!(outcome, TransferOutcome::PermanentFailure(_)));
            Ok(())
        }
    }
}
