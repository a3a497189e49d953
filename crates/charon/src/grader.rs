//! The per-Job state machine: lookup language, load problem, compile, run every case, verdict.

use std::time::Duration;

use olympus_common::AppError as JudgeError;
use tempfile::TempDir;

use crate::config::ExecutionConfig;
use crate::error::fault_to_verdict;
use crate::language::{self, LanguageConfig};
use crate::repository::{decode_payload, Problem, ProblemRepository, TestCaseRow};
use crate::sandbox::{RunResult, SandboxRunner};
use crate::types::{Job, Verdict};

pub struct Grader<R: SandboxRunner> {
    sandbox: R,
    repository: ProblemRepository,
    workspace_base: std::path::PathBuf,
    execution: ExecutionConfig,
}

impl<R: SandboxRunner> Grader<R> {
    pub fn new(
        sandbox: R,
        repository: ProblemRepository,
        workspace_base: std::path::PathBuf,
        execution: ExecutionConfig,
    ) -> Self {
        Self {
            sandbox,
            repository,
            workspace_base,
            execution,
        }
    }

    pub async fn grade(&self, job: &Job) -> Verdict {
        let lang = match language::lookup(&job.language) {
            Some(lang) => lang,
            None => {
                return fault_to_verdict(JudgeError::UnsupportedLanguage(job.language.clone()));
            }
        };

        let problem = match self.repository.load_problem(job.problem_id).await {
            Ok(p) => p,
            Err(e) => return fault_to_verdict(e),
        };

        // Hard lifetime ceiling: sum of every case's wall limit plus the compile limit and a
        // slack margin, so a hung sandbox or broker call can never pin this Job's worker slot
        // forever. Per-case timeouts inside the sandbox fire well before this, in the normal case.
        let ceiling = Duration::from_millis(
            self.execution.default_time_limit_ms * problem.test_cases.len() as u64
                + if lang.is_compiled() {
                    self.execution.compile_time_limit_ms
                } else {
                    0
                }
                + self.execution.hard_ceiling_slack_ms,
        );

        match tokio::time::timeout(ceiling, self.grade_with_language(job, lang, &problem)).await {
            Ok(verdict) => verdict,
            Err(_) => fault_to_verdict(JudgeError::InternalError(
                "job exceeded its hard lifetime ceiling".to_string(),
            )),
        }
    }

    async fn grade_with_language(
        &self,
        job: &Job,
        lang: &LanguageConfig,
        problem: &Problem,
    ) -> Verdict {
        let workspace = match tempfile::Builder::new()
            .prefix("charon-")
            .tempdir_in(&self.workspace_base)
        {
            Ok(dir) => dir,
            Err(e) => {
                return fault_to_verdict(JudgeError::FileError(format!(
                    "could not create workspace: {e}"
                )));
            }
        };

        if let Err(e) =
            tokio::fs::write(workspace.path().join(lang.source_filename), &job.code).await
        {
            return fault_to_verdict(JudgeError::FileError(format!(
                "could not write source: {e}"
            )));
        }

        if let Some(compile_argv) = lang.compile_command {
            if let Some(verdict) = self.compile(&workspace, compile_argv).await {
                return verdict;
            }
        }

        self.run_loop(job, &workspace, lang, problem).await

        // `workspace` (a `tempfile::TempDir`) removes its directory on drop here, on every
        // return path above including early returns and panics during unwind.
    }

    async fn compile(&self, workspace: &TempDir, argv: &[&'static str]) -> Option<Verdict> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let result = self
            .sandbox
            .run(
                &argv,
                workspace.path(),
                b"",
                Duration::from_millis(self.execution.compile_time_limit_ms),
                self.execution.max_memory_limit_kb,
            )
            .await;

        match result {
            Ok(RunResult::Completed {
                exit_code: 0, ..
            }) => None,
            Ok(RunResult::Completed { stderr, .. }) => {
                Some(Verdict::CompileError {
                    message: truncate_utf8(&stderr, self.execution.compile_stderr_limit_bytes),
                })
            }
            Ok(RunResult::Timeout) => Some(Verdict::CompileError {
                message: "compilation exceeded the time limit".to_string(),
            }),
            Ok(RunResult::MemoryExceeded) => Some(Verdict::CompileError {
                message: "compilation exceeded the memory limit".to_string(),
            }),
            Ok(RunResult::Signaled { signal, stderr, .. }) => Some(Verdict::CompileError {
                message: if stderr.is_empty() {
                    format!("compiler killed by {}", crate::sandbox::signal_name(signal))
                } else {
                    truncate_utf8(&stderr, self.execution.compile_stderr_limit_bytes)
                },
            }),
            // Spec: a non-zero exit or SandboxFailure during compilation yields Compile Error
            // carrying stderr, unlike the run phase where the same fault is a System Error.
            Ok(RunResult::SandboxFailure { message }) => Some(Verdict::CompileError {
                message: truncate_utf8(message.as_bytes(), self.execution.compile_stderr_limit_bytes),
            }),
            Err(e) => Some(fault_to_verdict(e)),
        }
    }

    async fn run_loop(
        &self,
        _job: &Job,
        workspace: &TempDir,
        lang: &LanguageConfig,
        problem: &Problem,
    ) -> Verdict {
        let argv: Vec<String> = lang.run_command.iter().map(|s| s.to_string()).collect();
        let time_limit = Duration::from_millis(self.execution.default_time_limit_ms);
        let memory_limit_kb = self.execution.default_memory_limit_kb;

        let mut max_elapsed = Duration::ZERO;

        for case in &problem.test_cases {
            let ordinal = case.ordinal as u32;
            let stdin = decode_payload(&case.input_data);

            let result = self
                .sandbox
                .run(&argv, workspace.path(), stdin.as_bytes(), time_limit, memory_limit_kb)
                .await;

            match result {
                Ok(RunResult::Timeout) => {
                    return Verdict::TimeLimitExceeded { failed_case: ordinal };
                }
                Ok(RunResult::MemoryExceeded) => {
                    return Verdict::MemoryLimitExceeded { failed_case: ordinal };
                }
                Ok(RunResult::Signaled { signal, stderr, .. }) => {
                    // A signal death here can't be distinguished from an ordinary crash, so it
                    // defaults to Runtime Error rather than being assumed an OOM kill.
                    let message = if stderr.is_empty() {
                        format!("killed by {}", crate::sandbox::signal_name(signal))
                    } else {
                        truncate_utf8(&stderr, self.execution.compile_stderr_limit_bytes)
                    };
                    return Verdict::RuntimeError {
                        failed_case: ordinal,
                        message,
                    };
                }
                Ok(RunResult::SandboxFailure { message }) => {
                    return fault_to_verdict(JudgeError::SandboxError(message));
                }
                Ok(RunResult::Completed {
                    exit_code,
                    stdout,
                    stderr,
                    elapsed,
                }) => {
                    if exit_code != 0 {
                        return Verdict::RuntimeError {
                            failed_case: ordinal,
                            message: truncate_utf8(&stderr, self.execution.compile_stderr_limit_bytes),
                        };
                    }

                    if !outputs_match(&stdout, case) {
                        return Verdict::WrongAnswer { failed_case: ordinal };
                    }

                    max_elapsed = max_elapsed.max(elapsed);
                }
                Err(e) => return fault_to_verdict(e),
            }
        }

        Verdict::Accepted {
            execution_time_seconds: max_elapsed.as_secs_f64(),
        }
    }
}

/// Byte-exact comparison after the output normalization policy: CRLF -> LF on both sides,
/// then trim leading/trailing whitespace from the whole payload.
fn outputs_match(actual_stdout: &[u8], case: &TestCaseRow) -> bool {
    let actual = normalize_output(&String::from_utf8_lossy(actual_stdout));
    let expected = normalize_output(&decode_payload(&case.output_data));
    actual == expected
}

fn normalize_output(s: &str) -> String {
    s.replace("\r\n", "\n").trim().to_string()
}

fn truncate_utf8(bytes: &[u8], limit: usize) -> String {
    if bytes.len() <= limit {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut end = limit;
    while end > 0 && !bytes.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", String::from_utf8_lossy(&bytes[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn normalize_output_strips_crlf_and_trims() {
        assert_eq!(normalize_output("foo\r\n"), "foo");
        assert_eq!(normalize_output("  foo  \n"), "foo");
        assert_eq!(normalize_output("foo\nbar\n"), "foo\nbar");
    }

    #[test]
    fn truncate_utf8_bounds_output() {
        let long = "x".repeat(100);
        let truncated = truncate_utf8(long.as_bytes(), 10);
        assert!(truncated.starts_with(&"x".repeat(10)));
        assert!(truncated.ends_with("(truncated)"));
    }

    struct ScriptedRunner {
        responses: Mutex<Vec<RunResult>>,
    }

    impl SandboxRunner for ScriptedRunner {
        async fn run(
            &self,
            _argv: &[String],
            _workspace: &std::path::Path,
            _stdin_bytes: &[u8],
            _wall_time_limit: Duration,
            _memory_limit_kb: u64,
        ) -> Result<RunResult, JudgeError> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    fn completed(exit_code: i32, stdout: &str) -> RunResult {
        RunResult::Completed {
            exit_code,
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            elapsed: Duration::from_millis(10),
        }
    }

    fn tc(ordinal: i32, input: &str, output: &str) -> TestCaseRow {
        TestCaseRow {
            ordinal,
            input_data: input.to_string(),
            output_data: output.to_string(),
        }
    }

    #[tokio::test]
    async fn stops_on_first_failing_case_and_reports_its_ordinal() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![
                completed(0, "3\n"),
                completed(0, "wrong\n"),
                completed(0, "should not run"),
            ]),
        };
        let grader = Grader::new(
            runner,
            ProblemRepository::new(sqlx::PgPool::connect_lazy("postgres://localhost/x").unwrap()),
            std::env::temp_dir(),
            ExecutionConfig {
                default_time_limit_ms: 2000,
                max_time_limit_ms: 30000,
                default_memory_limit_kb: 262144,
                max_memory_limit_kb: 1048576,
                output_limit_bytes: 1 << 20,
                compile_time_limit_ms: 5000,
                compile_stderr_limit_bytes: 8192,
                hard_ceiling_slack_ms: 10_000,
            },
        );
        let problem = Problem {
            pk: 1,
            problem_id: 1,
            test_cases: vec![
                tc(1, "1 2", "3"),
                tc(2, "5 7", "12"),
                tc(3, "9 9", "18"),
            ],
        };
        let lang = language::lookup("python").unwrap();
        let job = Job {
            submission_id: "s1".to_string(),
            problem_id: 1,
            language: "python".to_string(),
            code: "print(1)".to_string(),
        };

        let verdict = grader.grade_with_language(&job, lang, &problem).await;
        assert_eq!(verdict, Verdict::WrongAnswer { failed_case: 2 });
    }

    #[tokio::test]
    async fn all_cases_passing_yields_accepted_with_max_elapsed() {
        let runner = ScriptedRunner {
            responses: Mutex::new(vec![completed(0, "3\n"), completed(0, "12\n")]),
        };
        let grader = Grader::new(
            runner,
            ProblemRepository::new(sqlx::PgPool::connect_lazy("postgres://localhost/x").unwrap()),
            std::env::temp_dir(),
            ExecutionConfig {
                default_time_limit_ms: 2000,
                max_time_limit_ms: 30000,
                default_memory_limit_kb: 262144,
                max_memory_limit_kb: 1048576,
                output_limit_bytes: 1 << 20,
                compile_time_limit_ms: 5000,
                compile_stderr_limit_bytes: 8192,
                hard_ceiling_slack_ms: 10_000,
            },
        );
        let problem = Problem {
            pk: 1,
            problem_id: 1,
            test_cases: vec![tc(1, "1 2", "3"), tc(2, "5 7", "12")],
        };
        let lang = language::lookup("python").unwrap();
        let job = Job {
            submission_id: "s1".to_string(),
            problem_id: 1,
            language: "python".to_string(),
            code: "print(1)".to_string(),
        };

        let verdict = grader.grade_with_language(&job, lang, &problem).await;
        assert!(verdict.is_accepted());
    }
}
