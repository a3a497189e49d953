//! Common id types shared across the worker.

/// Submission identifier as carried on the wire: an opaque string, not a UUID —
/// the broker and database are free to use whatever format they like internally.
pub type SubmissionId = String;

/// External problem identifier, as referenced by a Job.
pub type ProblemId = i64;

/// Internal problem primary key, distinct from `ProblemId` (see the Problem Repository's
/// join-by-primary-key requirement).
pub type ProblemPk = i64;
