//! Wire types: the Job a submission arrives as, and the Verdict it leaves as.

use olympus_common::{ProblemId, SubmissionId};
use serde::{Deserialize, Serialize};

/// A submission pulled off the input stream.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub submission_id: SubmissionId,
    pub problem_id: ProblemId,
    pub language: String,
    pub code: String,
}

/// Terminal classification of a graded Job. Exactly one variant per Job.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted {
        execution_time_seconds: f64,
    },
    WrongAnswer {
        failed_case: u32,
    },
    CompileError {
        message: String,
    },
    RuntimeError {
        failed_case: u32,
        message: String,
    },
    TimeLimitExceeded {
        failed_case: u32,
    },
    MemoryLimitExceeded {
        failed_case: u32,
    },
    SystemError {
        message: String,
    },
}

impl Verdict {
    /// Short label used both in logs and on the wire.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "Accepted",
            Verdict::WrongAnswer { .. } => "Wrong Answer",
            Verdict::CompileError { .. } => "Compile Error",
            Verdict::RuntimeError { .. } => "Runtime Error",
            Verdict::TimeLimitExceeded { .. } => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded { .. } => "Memory Limit Exceeded",
            Verdict::SystemError { .. } => "System Error",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

/// Body of the result message published to the output stream.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictPayload {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_case: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Verdict> for VerdictPayload {
    fn from(v: &Verdict) -> Self {
        match v {
            Verdict::Accepted {
                execution_time_seconds,
            } => VerdictPayload {
                status: v.label(),
                failed_case: None,
                execution_time: Some(round4(*execution_time_seconds)),
                message: None,
            },
            Verdict::WrongAnswer { failed_case }
            | Verdict::TimeLimitExceeded { failed_case }
            | Verdict::MemoryLimitExceeded { failed_case } => VerdictPayload {
                status: v.label(),
                failed_case: Some(*failed_case),
                execution_time: None,
                message: None,
            },
            Verdict::CompileError { message } | Verdict::SystemError { message } => {
                VerdictPayload {
                    status: v.label(),
                    failed_case: None,
                    execution_time: None,
                    message: Some(message.clone()),
                }
            }
            Verdict::RuntimeError {
                failed_case,
                message,
            } => VerdictPayload {
                status: v.label(),
                failed_case: Some(*failed_case),
                execution_time: None,
                message: Some(message.clone()),
            },
        }
    }
}

/// Full result message, as published to the output stream.
#[derive(Debug, Clone, Serialize)]
pub struct ResultMessage {
    pub submission_id: SubmissionId,
    pub result: VerdictPayload,
}

impl ResultMessage {
    pub fn new(submission_id: SubmissionId, verdict: &Verdict) -> Self {
        Self {
            submission_id,
            result: VerdictPayload::from(verdict),
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_payload_carries_rounded_time() {
        let v = Verdict::Accepted {
            execution_time_seconds: 0.123_456_7,
        };
        let payload = VerdictPayload::from(&v);
        assert_eq!(payload.execution_time, Some(0.1235));
        assert_eq!(payload.status, "Accepted");
        assert!(payload.failed_case.is_none());
    }

    #[test]
    fn wrong_answer_payload_carries_failed_case_only() {
        let v = Verdict::WrongAnswer { failed_case: 3 };
        let payload = VerdictPayload::from(&v);
        assert_eq!(payload.failed_case, Some(3));
        assert!(payload.execution_time.is_none());
        assert!(payload.message.is_none());
    }

    #[test]
    fn runtime_error_carries_both_case_and_message() {
        let v = Verdict::RuntimeError {
            failed_case: 2,
            message: "segfault".to_string(),
        };
        let payload = VerdictPayload::from(&v);
        assert_eq!(payload.failed_case, Some(2));
        assert_eq!(payload.message.as_deref(), Some("segfault"));
    }
}
