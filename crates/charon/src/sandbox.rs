//! Confined subprocess execution via nsjail.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use olympus_common::AppError as JudgeError;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::process::Command;

/// Outcome of one sandboxed run.
#[derive(Debug, Clone)]
pub enum RunResult {
    Completed {
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        elapsed: Duration,
    },
    /// The child died from an uncaught signal (SIGSEGV, SIGABRT, SIGFPE, ...) rather than
    /// exiting normally. nsjail's `--rlimit_as` kill is indistinguishable from an ordinary crash
    /// at this layer, so this is *not* assumed to be an OOM kill; callers route it the same way
    /// as a non-zero exit.
    Signaled {
        signal: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        elapsed: Duration,
    },
    Timeout,
    MemoryExceeded,
    SandboxFailure {
        message: String,
    },
}

/// Name of a POSIX signal, for error messages. Falls back to the raw number for anything nix
/// doesn't recognize.
pub fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signal}"))
}

/// nsjail's own ETIME status, surfaced as a plain process exit code.
const NSJAIL_TIME_LIMIT_EXIT_CODE: i32 = 1000 + 10;

/// Something that can run a confined command. Generic rather than a trait object so tests can
/// swap in a spy without paying for dynamic dispatch in the real path.
pub trait SandboxRunner: Send + Sync {
    fn run(
        &self,
        argv: &[String],
        workspace: &Path,
        stdin_bytes: &[u8],
        wall_time_limit: Duration,
        memory_limit_kb: u64,
    ) -> impl std::future::Future<Output = Result<RunResult, JudgeError>> + Send;
}

/// Runs commands under `nsjail`, matching the invocation shape the reference grading server uses.
pub struct NsjailRunner {
    binary: std::path::PathBuf,
    /// Extra read-only directories bind-mounted alongside the toolchain roots, for languages
    /// whose runtime lives outside the standard `/usr`, `/lib` set (e.g. a Go or Rust toolchain
    /// installed under `/opt`).
    extra_ro_mounts: Vec<std::path::PathBuf>,
}

impl NsjailRunner {
    pub fn new(binary: std::path::PathBuf) -> Self {
        Self {
            binary,
            extra_ro_mounts: Vec::new(),
        }
    }

    pub fn with_extra_mounts(mut self, mounts: Vec<std::path::PathBuf>) -> Self {
        self.extra_ro_mounts = mounts;
        self
    }

    fn build_argv(&self, argv: &[String], workspace: &Path, wall_time_limit: Duration, memory_limit_kb: u64) -> Vec<String> {
        let mut cmd = vec![
            self.binary.to_string_lossy().into_owned(),
            "--mode".into(),
            "o".into(),
            "--quiet".into(),
            "--log".into(),
            "/dev/null".into(),
            "--time_limit".into(),
            wall_time_limit.as_secs().to_string(),
            "--rlimit_as".into(),
            (memory_limit_kb / 1024).max(1).to_string(),
            "--disable_clone_newnet".into(),
        ];

        for root in ["/usr/bin", "/usr/lib", "/lib", "/lib64"] {
            cmd.push("--bindmount".into());
            cmd.push(format!("{root}:{root}"));
        }
        for extra in &self.extra_ro_mounts {
            let p = extra.to_string_lossy();
            cmd.push("--bindmount".into());
            cmd.push(format!("{p}:{p}"));
        }

        cmd.push("--bindmount".into());
        cmd.push(format!("{}:/app", workspace.display()));
        cmd.push("--cwd".into());
        cmd.push("/app".into());
        cmd.push("--".into());
        cmd.extend(argv.iter().cloned());
        cmd
    }
}

/// Ensures stdin ends with exactly one trailing newline, matching the reference server's
/// normalization: strip any trailing CR/LF, then append one `\n`.
fn normalize_stdin(input: &[u8]) -> Vec<u8> {
    let mut trimmed = input;
    while let Some(&last) = trimmed.last() {
        if last == b'\n' || last == b'\r' {
            trimmed = &trimmed[..trimmed.len() - 1];
        } else {
            break;
        }
    }
    let mut out = trimmed.to_vec();
    out.push(b'\n');
    out
}

impl SandboxRunner for NsjailRunner {
    async fn run(
        &self,
        argv: &[String],
        workspace: &Path,
        stdin_bytes: &[u8],
        wall_time_limit: Duration,
        memory_limit_kb: u64,
    ) -> Result<RunResult, JudgeError> {
        let full_argv = self.build_argv(argv, workspace, wall_time_limit, memory_limit_kb);
        let stdin_bytes = normalize_stdin(stdin_bytes);

        let mut child = Command::new(&full_argv[0])
            .args(&full_argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // Puts nsjail and everything it forks into a fresh process group, so a timeout kill
            // can take out the whole tree with one killpg instead of leaking jailed descendants.
            .process_group(0)
            .spawn()
            .map_err(|e| JudgeError::SandboxError(format!("failed to launch sandbox: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| JudgeError::SandboxError("sandbox stdin not piped".to_string()))?;
        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| JudgeError::SandboxError("sandbox stdout not piped".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| JudgeError::SandboxError("sandbox stderr not piped".to_string()))?;

        let pid = child.id();

        let start = Instant::now();
        // Outer fence: one second past the requested limit, so nsjail's own timeout fires first
        // and yields its distinguishable exit status rather than us racing it.
        let outer_fence = wall_time_limit + Duration::from_secs(1);

        let run_fut = async {
            stdin
                .write_all(&stdin_bytes)
                .await
                .map_err(|e| JudgeError::SandboxError(format!("stdin write failed: {e}")))?;
            drop(stdin);

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let (stdout_res, stderr_res) = tokio::join!(
                stdout_pipe.read_to_end(&mut stdout),
                stderr_pipe.read_to_end(&mut stderr),
            );
            stdout_res.map_err(|e| JudgeError::SandboxError(format!("stdout read failed: {e}")))?;
            stderr_res.map_err(|e| JudgeError::SandboxError(format!("stderr read failed: {e}")))?;

            let status = child
                .wait()
                .await
                .map_err(|e| JudgeError::SandboxError(format!("wait failed: {e}")))?;

            Ok::<_, JudgeError>((status, stdout, stderr))
        };

        match tokio::time::timeout(outer_fence, run_fut).await {
            Ok(Ok((status, stdout, stderr))) => {
                let elapsed = start.elapsed();
                let code = status.code();
                match code {
                    Some(NSJAIL_TIME_LIMIT_EXIT_CODE) => Ok(RunResult::Timeout),
                    Some(code) => Ok(RunResult::Completed {
                        exit_code: code,
                        stdout,
                        stderr,
                        elapsed,
                    }),
                    None => {
                        // Killed by a signal rather than exiting normally. nsjail's own
                        // rlimit_as kill lands here too, indistinguishable from an ordinary
                        // SIGSEGV/SIGABRT/SIGFPE crash at this layer, so this is not assumed to
                        // be an OOM kill; the Grader defaults signal deaths to Runtime Error.
                        let signal = status.signal().unwrap_or(0);
                        Ok(RunResult::Signaled {
                            signal,
                            stdout,
                            stderr,
                            elapsed,
                        })
                    }
                }
            }
            Ok(Err(e)) => Ok(RunResult::SandboxFailure {
                message: e.to_string(),
            }),
            Err(_) => {
                if let Some(pid) = pid {
                    let _ = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                Ok(RunResult::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_stdin_appends_single_newline() {
        assert_eq!(normalize_stdin(b"hello"), b"hello\n");
        assert_eq!(normalize_stdin(b"hello\n"), b"hello\n");
        assert_eq!(normalize_stdin(b"hello\r\n"), b"hello\n");
        assert_eq!(normalize_stdin(b"hello\n\n\r"), b"hello\n");
    }

    #[test]
    fn build_argv_places_workspace_at_app() {
        let runner = NsjailRunner::new("/usr/local/bin/nsjail".into());
        let argv = runner.build_argv(
            &["python3".into(), "solution.py".into()],
            Path::new("/tmp/ws-1"),
            Duration::from_secs(2),
            262144,
        );
        assert!(argv.contains(&"--cwd".to_string()));
        assert!(argv.iter().any(|a| a == "/tmp/ws-1:/app"));
        assert_eq!(argv.last(), Some(&"solution.py".to_string()));
    }
}
