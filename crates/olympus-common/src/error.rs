//! Application error types shared across the worker.

use thiserror::Error;

/// Fault type that crosses component boundaries inside the judge core.
///
/// Every variant here represents something that prevents a Job from reaching a verdict at all
/// (as opposed to `Verdict::CompileError`/`RuntimeError`/etc., which are expected grading outcomes).
/// At the Grader's outer boundary every `AppError` collapses to `Verdict::SystemError`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Problem or test-case row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Submitted language tag is not in the registry
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Postgres query failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Broker connection/publish/consume failed
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Workspace or source-file I/O failed
    #[error("File error: {0}")]
    FileError(String),

    /// Job payload failed to (de)serialize
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Sandbox failed to launch or its streams could not be read
    #[error("Sandbox error: {0}")]
    SandboxError(String),

    /// Catch-all for faults with no more specific variant
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Short machine-readable category, used in log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::QueueError(_) => "QUEUE_ERROR",
            AppError::FileError(_) => "FILE_ERROR",
            AppError::SerializationError(_) => "SERIALIZATION_ERROR",
            AppError::SandboxError(_) => "SANDBOX_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound(err.to_string()),
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::QueueError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
