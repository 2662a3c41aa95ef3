//! Run code as a separate OS process with a hard wall-clock limit.
//!
//! Each execution:
//! - Writes prelude + code to a temporary file (removed on every path)
//! - Starts `<interpreter> <file>` in its own process group, stdin closed
//! - Captures stdout/stderr up to `max_output_bytes` each
//! - Optionally caps the child's address space (`RLIMIT_AS`, Linux)
//! - On timeout, SIGKILLs the whole process group and reports a timeout
//!   outcome without any partial output

use std::io::Write;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use byteme_core::{ExecutionLimits, ExecutionOutcome};

use super::{CodeExecutor, ExecutorError, Prelude};

/// Appended to a stream whose output exceeded the capture cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    interpreter: String,
    prelude: Prelude,
    suffix: String,
}

impl SubprocessExecutor {
    pub fn new(interpreter: impl Into<String>, prelude: Prelude) -> Self {
        Self {
            interpreter: interpreter.into(),
            prelude,
            suffix: ".py".to_string(),
        }
    }

    /// File extension of the materialized unit (default `.py`).
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    fn materialize(&self, code: &str) -> Result<tempfile::NamedTempFile, ExecutorError> {
        let mut unit = tempfile::Builder::new()
            .prefix("byteme-")
            .suffix(&self.suffix)
            .tempfile()
            .map_err(|e| ExecutorError::Materialize(e.to_string()))?;
        unit.write_all(self.prelude.wrap(code).as_bytes())
            .and_then(|_| unit.flush())
            .map_err(|e| ExecutorError::Materialize(e.to_string()))?;
        Ok(unit)
    }

    fn command(&self, unit: &tempfile::NamedTempFile, limits: &ExecutionLimits) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(unit.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(target_os = "linux")]
        if let Some(bytes) = limits.memory_bytes {
            // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || limit_address_space(bytes));
            }
        }
        #[cfg(not(target_os = "linux"))]
        if limits.memory_bytes.is_some() {
            warn!("memory limit requested but not supported on this platform");
        }

        cmd
    }
}

#[async_trait]
impl CodeExecutor for SubprocessExecutor {
    async fn run(&self, code: &str, limits: &ExecutionLimits) -> Result<ExecutionOutcome, ExecutorError> {
        let unit = self.materialize(code)?;

        let mut child = self
            .command(&unit, limits)
            .spawn()
            .map_err(|e| ExecutorError::Spawn(format!("{}: {e}", self.interpreter)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = limits.max_output_bytes;

        let collect = async {
            let (status, out, err) = tokio::join!(
                child.wait(),
                read_capped(stdout, cap),
                read_capped(stderr, cap)
            );
            Ok::<_, std::io::Error>((status?, out?, err?))
        };
        let finished = tokio::time::timeout(limits.wall_clock, collect).await;

        match finished {
            Ok(Ok((status, stdout, stderr))) => {
                let returncode = exit_code(status);
                debug!(returncode, stdout_bytes = stdout.len(), stderr_bytes = stderr.len(), "process exited");
                Ok(ExecutionOutcome::new(stdout, stderr, returncode))
            }
            Ok(Err(e)) => {
                terminate(&mut child).await;
                Err(ExecutorError::Io(e.to_string()))
            }
            Err(_) => {
                warn!(limit_ms = limits.wall_clock.as_millis() as u64, "execution timed out; killing process group");
                terminate(&mut child).await;
                Ok(ExecutionOutcome::timed_out(limits.wall_clock))
            }
        }
        // `unit` is dropped here, removing the temporary file.
    }
}

/// Read a stream to its end, keeping at most `cap` bytes.
///
/// The rest is drained (not kept) so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    Ok(text)
}

/// Kill the child's whole process group, then reap the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain kill(2) on the group we created with process_group(0).
        let ret = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if ret != 0 {
            debug!(pid, error = %std::io::Error::last_os_error(), "process group kill failed");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already gone");
    }
}

/// Exit code, or minus the signal number when the child was killed.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    byteme_core::outcome::SYNTHETIC_FAILURE_CODE
}

#[cfg(target_os = "linux")]
fn limit_address_space(bytes: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn shell() -> SubprocessExecutor {
        SubprocessExecutor::new("sh", Prelude::none()).with_suffix(".sh")
    }

    fn limits(wall_clock: Duration) -> ExecutionLimits {
        ExecutionLimits::default().with_wall_clock(wall_clock)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = shell().run("echo hi", &limits(Duration::from_secs(10))).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::new("hi\n", "", 0));
    }

    #[tokio::test]
    async fn captures_stderr_and_nonzero_exit() {
        let outcome = shell()
            .run("echo oops >&2; exit 3", &limits(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "");
        assert_eq!(outcome.stderr, "oops\n");
        assert_eq!(outcome.returncode, 3);
    }

    #[tokio::test]
    async fn timeout_kills_and_discards_partial_output() {
        let started = Instant::now();
        let outcome = shell()
            .run("echo partial; sleep 30 & sleep 30", &limits(Duration::from_millis(300)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.stdout, "");
        assert_eq!(outcome.returncode, 1);
        assert!(outcome.stderr.starts_with("Execution timed out after"));
    }

    #[tokio::test]
    async fn output_beyond_cap_is_truncated() {
        let capped = limits(Duration::from_secs(10)).with_max_output_bytes(1000);
        let outcome = shell()
            .run("i=0; while [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done", &capped)
            .await
            .unwrap();

        assert_eq!(outcome.returncode, 0);
        assert!(outcome.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(outcome.stdout.len(), 1000 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn prelude_runs_before_code() {
        let executor = SubprocessExecutor::new("sh", Prelude::text("GREETING=hello")).with_suffix(".sh");
        let outcome = executor
            .run("echo $GREETING", &limits(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "hello\n");
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_harness_error() {
        let executor = SubprocessExecutor::new("/nonexistent/byteme-interpreter", Prelude::none());
        let err = executor
            .run("print(1)", &limits(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn(_)));
    }

    #[tokio::test]
    async fn killed_process_reports_negative_signal() {
        let outcome = shell()
            .run("kill -9 $$", &limits(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(outcome.returncode, -9);
    }
}
