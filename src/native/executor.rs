use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::{fs, process::Command};

use crate::core::{
    domain::{ExecutionLimits, ExecutionResult, FailureKind, SubmissionCode},
    traits::executor::Executor,
};
use crate::synth::Synthesizer;
use crate::synth::protocol::{extract_error, extract_state};

/// Runs synthesized sandbox scripts with a python interpreter.
///
/// Every script lives in a uniquely named file under `dir` that is removed
/// when the run ends, whatever the outcome.
#[derive(Clone, Debug)]
pub struct PythonExecutor {
    dir: PathBuf,
    python_path: PathBuf,
}

impl PythonExecutor {
    pub fn new<T, U>(dir: T, python_path: U) -> Self
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        PythonExecutor {
            dir: dir.as_ref().into(),
            python_path: python_path.as_ref().into(),
        }
    }
}

#[async_trait::async_trait]
impl Executor for PythonExecutor {
    #[tracing::instrument(skip(self, code, limits))]
    async fn run(
        &self,
        code: &SubmissionCode,
        label: &str,
        limits: &ExecutionLimits,
    ) -> ExecutionResult {
        let started = Instant::now();

        let script = match Synthesizer::new(limits.settle_delay).synthesize(code) {
            Ok(script) => script,
            Err(e) => {
                tracing::warn!(%e, "synthesis failed");
                return ExecutionResult::failed(FailureKind::Synthesis, started.elapsed(), e.to_string());
            }
        };

        if let Err(e) = fs::create_dir_all(&self.dir).await {
            tracing::error!(%e, dir = %self.dir.display(), "cannot create scratch directory");
            return ExecutionResult::failed(FailureKind::Launch, started.elapsed(), e.to_string());
        }
        // Dropping the handle deletes the file, so every return below cleans up.
        let file = match tempfile::Builder::new()
            .prefix("turtlegrade-")
            .suffix(".py")
            .tempfile_in(&self.dir)
        {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(%e, "cannot create script file");
                return ExecutionResult::failed(FailureKind::Launch, started.elapsed(), e.to_string());
            }
        };
        if let Err(e) = fs::write(file.path(), &script.text).await {
            tracing::error!(%e, "cannot write script file");
            return ExecutionResult::failed(FailureKind::Launch, started.elapsed(), e.to_string());
        }
        tracing::debug!(path = %file.path().display(), instances = ?script.instances, "script written");

        let outcome = run_process(
            &self.python_path,
            &interpreter_args(file.path()),
            limits.timeout,
            limits.stdout_limit_bytes,
        )
        .await;
        drop(file);

        let elapsed = started.elapsed();
        let result = interpret(outcome, elapsed, limits.timeout);
        tracing::info!(
            success = result.success,
            failure = ?result.failure,
            ?elapsed,
            "execution finished"
        );
        result
    }
}

/// Isolated mode ignores `PYTHON*` variables, so UTF-8 stdio is forced with `-X utf8`.
fn interpreter_args(script: &Path) -> [&OsStr; 4] {
    [
        OsStr::new("-I"),
        OsStr::new("-X"),
        OsStr::new("utf8"),
        script.as_os_str(),
    ]
}

#[derive(Debug)]
pub(crate) enum ProcessOutcome {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    OutputLimit,
    TimedOut,
    LaunchFailed(std::io::Error),
}

/// Spawns `program` with an argument array and waits for it under `timeout`.
/// The child is killed when the timeout fires or stdout outgrows `stdout_limit`.
pub(crate) async fn run_process(
    program: &Path,
    args: &[&OsStr],
    timeout: Duration,
    stdout_limit: u64,
) -> ProcessOutcome {
    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => return ProcessOutcome::LaunchFailed(e),
    };
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return ProcessOutcome::LaunchFailed(std::io::Error::other("child pipes unavailable"));
    };

    let collect = async move {
        let stderr_task = tokio::spawn(read_limited(stderr, stdout_limit));
        let (out, exceeded) = read_limited(stdout, stdout_limit).await?;
        if exceeded {
            let _ = child.start_kill();
        }
        let status = child.wait().await?;
        let (err, _) = stderr_task.await.map_err(std::io::Error::other)??;
        if exceeded {
            return Ok(ProcessOutcome::OutputLimit);
        }
        Ok::<_, std::io::Error>(ProcessOutcome::Exited {
            status,
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
        })
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => ProcessOutcome::LaunchFailed(e),
        Err(_) => ProcessOutcome::TimedOut,
    }
}

async fn read_limited<R: AsyncRead + Unpin>(reader: R, limit: u64) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut buf).await?;
    let exceeded = buf.len() as u64 > limit;
    if exceeded {
        buf.truncate(limit as usize);
    }
    Ok((buf, exceeded))
}

fn interpret(outcome: ProcessOutcome, elapsed: Duration, timeout: Duration) -> ExecutionResult {
    match outcome {
        ProcessOutcome::LaunchFailed(e) => {
            tracing::error!(%e, "interpreter could not be run");
            ExecutionResult::failed(FailureKind::Launch, elapsed, e.to_string())
        }
        ProcessOutcome::TimedOut => ExecutionResult::failed(
            FailureKind::Timeout,
            elapsed,
            format!("Execution timed out after {} seconds", timeout.as_secs_f64()),
        ),
        ProcessOutcome::OutputLimit => ExecutionResult::failed(
            FailureKind::OutputLimit,
            elapsed,
            "Standard output exceeded the size limit",
        ),
        ProcessOutcome::Exited {
            status,
            stdout,
            stderr,
        } => {
            if let Some(state) = extract_state(&stdout) {
                if !status.success() {
                    tracing::warn!(?status, "state captured but interpreter exited with failure");
                }
                return ExecutionResult::succeeded(elapsed, state);
            }
            if let Some(error) = extract_error(&stdout) {
                return ExecutionResult::failed(FailureKind::Runtime, elapsed, error);
            }
            if !status.success() {
                let stderr = stderr.trim();
                let captured = if stderr.is_empty() {
                    format!("Interpreter exited with {}", status)
                } else {
                    stderr.to_string()
                };
                return ExecutionResult::failed(FailureKind::Runtime, elapsed, captured);
            }
            ExecutionResult::failed(
                FailureKind::MissingState,
                elapsed,
                "Program finished without reporting its drawing state",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};

    use super::*;

    fn python_path() -> PathBuf {
        std::env::var(crate::constants::PYTHON_ENV_VAR)
            .unwrap_or_else(|_| crate::constants::DEFAULT_PYTHON.to_string())
            .into()
    }

    fn python_available() -> bool {
        std::process::Command::new(python_path())
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    /// Turtle needs a working Tk display; headless machines skip these tests.
    fn turtle_available() -> bool {
        std::process::Command::new(python_path())
            .args(["-c", "import turtle; turtle.Screen(); turtle.bye()"])
            .output()
            .is_ok_and(|o| o.status.success())
    }

    /// Writes an executable shell script standing in for the interpreter.
    fn fake_interpreter(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-python");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    fn limits(timeout: Duration) -> ExecutionLimits {
        ExecutionLimits {
            timeout,
            settle_delay: Duration::from_millis(10),
            ..ExecutionLimits::default()
        }
    }

    #[tokio::test]
    async fn test_process_timeout_kills_child() {
        let started = Instant::now();
        let outcome = run_process(
            Path::new("/bin/sh"),
            &[OsStr::new("-c"), OsStr::new("while :; do :; done")],
            Duration::from_millis(300),
            1024,
        )
        .await;
        assert!(matches!(outcome, ProcessOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_process_output_limit() {
        let outcome = run_process(
            Path::new("/bin/sh"),
            &[OsStr::new("-c"), OsStr::new("while :; do echo spam; done")],
            Duration::from_secs(10),
            4096,
        )
        .await;
        assert!(matches!(outcome, ProcessOutcome::OutputLimit));
    }

    #[tokio::test]
    async fn test_process_missing_program() {
        let outcome = run_process(Path::new("/nonexistent/python"), &[], Duration::from_secs(1), 1024).await;
        assert!(matches!(outcome, ProcessOutcome::LaunchFailed(_)));
    }

    #[test]
    fn test_interpret_prefers_state_then_error_then_stderr() {
        use std::os::unix::process::ExitStatusExt;
        let exited = |code: i32, stdout: &str, stderr: &str| ProcessOutcome::Exited {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        let t = Duration::from_secs(1);

        let state = format!(
            "noise\n{}\nNumber of turtles: 1\n{}\n",
            crate::constants::STATE_BEGIN_MARKER,
            crate::constants::STATE_END_MARKER
        );
        let ok = interpret(exited(0, &state, ""), t, t);
        assert!(ok.success);
        assert_eq!(ok.captured, "Number of turtles: 1");

        let error = format!(
            "{}\nERROR: boom\n{}\n",
            crate::constants::ERROR_BEGIN_MARKER,
            crate::constants::ERROR_END_MARKER
        );
        let failed = interpret(exited(1, &error, ""), t, t);
        assert_eq!(failed.failure, Some(FailureKind::Runtime));
        assert_eq!(failed.captured, "ERROR: boom");

        let crashed = interpret(exited(1, "", "  SyntaxError: invalid syntax\n"), t, t);
        assert_eq!(crashed.captured, "SyntaxError: invalid syntax");

        let silent = interpret(exited(0, "hello\n", ""), t, t);
        assert_eq!(silent.failure, Some(FailureKind::MissingState));
    }

    #[tokio::test]
    async fn test_synthesis_failure_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let executor = PythonExecutor::new(dir.path(), python_path());
        let result = executor
            .run(&SubmissionCode::python("   \n"), "submission", &limits(Duration::from_secs(5)))
            .await;
        assert_eq!(result.failure, Some(FailureKind::Synthesis));
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn test_hung_interpreter_times_out_and_cleans_up() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let fake = fake_interpreter(bin.path(), "exec sleep 30");
        let executor = PythonExecutor::new(scratch.path(), &fake);

        let started = Instant::now();
        let result = executor
            .run(
                &SubmissionCode::python("forward(100)\n"),
                "submission",
                &limits(Duration::from_millis(500)),
            )
            .await;

        assert!(result.timed_out(), "{:?}", result);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn test_reported_state_is_captured_with_utf8_flags() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let body = format!(
            "echo 'stray output'\necho '{}'\necho 'Number of turtles: 1'\necho \"Args: $1 $2 $3\"\necho '{}'",
            crate::constants::STATE_BEGIN_MARKER,
            crate::constants::STATE_END_MARKER
        );
        let fake = fake_interpreter(bin.path(), &body);
        let executor = PythonExecutor::new(scratch.path(), &fake);

        let result = executor
            .run(
                &SubmissionCode::python("forward(100)\n"),
                "reference",
                &limits(Duration::from_secs(10)),
            )
            .await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.captured, "Number of turtles: 1\nArgs: -I -X utf8");
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn test_syntax_error_is_a_runtime_failure() {
        if !python_available() {
            eprintln!("python not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let executor = PythonExecutor::new(dir.path(), python_path());
        let result = executor
            .run(
                &SubmissionCode::python("t.forward(100\nt.left(90)\n"),
                "submission",
                &limits(Duration::from_secs(20)),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Runtime));
        assert!(!result.captured.is_empty());
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn test_square_produces_state() {
        if !turtle_available() {
            eprintln!("turtle display not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let executor = PythonExecutor::new(dir.path(), python_path());
        let result = executor
            .run(
                &SubmissionCode::python("from turtle import *\nfor _ in range(4):\n    forward(100)\n    left(90)\n"),
                "reference",
                &limits(Duration::from_secs(30)),
            )
            .await;
        assert!(result.success, "{}", result.captured);
        assert!(result.captured.starts_with("Number of turtles: 1"));
        assert!(result.captured.contains("Position: 0.00, 0.00"));
        assert!(is_empty_dir(dir.path()));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_and_cleans_up() {
        if !turtle_available() {
            eprintln!("turtle display not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let executor = PythonExecutor::new(dir.path(), python_path());
        let started = Instant::now();
        let result = executor
            .run(
                &SubmissionCode::python("while True:\n    pass\n"),
                "submission",
                &limits(Duration::from_secs(2)),
            )
            .await;
        assert!(result.timed_out());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(is_empty_dir(dir.path()));
    }
}
