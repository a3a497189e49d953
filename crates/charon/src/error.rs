//! Fault handling: every internal error collapses to a `Verdict::SystemError` at the boundary.

use crate::types::Verdict;

pub use olympus_common::{AppError as JudgeError, AppResult};

/// Converts an internal fault into the one verdict variant that represents "could not grade this
/// at all", as opposed to an expected grading outcome (compile/runtime/timeout/wrong-answer),
/// which the Grader produces directly as a `Verdict` rather than routing through `JudgeError`.
pub fn fault_to_verdict(err: JudgeError) -> Verdict {
    match &err {
        JudgeError::UnsupportedLanguage(lang) => Verdict::SystemError {
            message: format!("Unsupported language: {lang}"),
        },
        _ => Verdict::SystemError {
            message: err.to_string(),
        },
    }
}
