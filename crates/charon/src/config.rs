//! Configuration for the grading worker, loaded once at startup.

use std::env;
use std::path::PathBuf;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (development, staging, production)
    pub environment: String,

    /// PostgreSQL connection URL
    pub database_url: String,

    /// Redis connection URL (broker transport)
    pub redis_url: String,

    /// Worker identity, used as part of the consumer name
    pub worker_id: String,

    /// Consumer group name for the input stream
    pub consumer_group: String,

    /// Input stream (queue) name
    pub input_stream: String,

    /// Output stream (queue) name verdicts are published to
    pub output_stream: String,

    /// Dead-letter stream name
    pub dead_letter_stream: String,

    /// Block timeout for XREADGROUP (milliseconds)
    pub block_timeout_ms: usize,

    /// Maximum redelivery attempts before a message is sent to the dead-letter stream
    pub max_retries: u32,

    /// How many jobs this process grades concurrently
    pub worker_concurrency: usize,

    /// Prometheus metrics HTTP port
    pub metrics_port: u16,

    /// Path to the sandbox (nsjail) binary
    pub sandbox_binary: PathBuf,

    /// Base directory under which per-job workspaces are created
    pub workspace_base: PathBuf,

    /// Execution limits
    pub execution: ExecutionConfig,
}

/// Resource limits applied to compilation and to each test-case run.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Default per-problem wall-clock limit in milliseconds
    pub default_time_limit_ms: u64,

    /// Upper bound a problem's own time limit may not exceed
    pub max_time_limit_ms: u64,

    /// Default per-problem memory limit in kilobytes
    pub default_memory_limit_kb: u64,

    /// Upper bound a problem's own memory limit may not exceed
    pub max_memory_limit_kb: u64,

    /// Captured stdout/stderr is truncated beyond this many bytes
    pub output_limit_bytes: u64,

    /// Wall-clock limit applied to the compile step, regardless of problem
    pub compile_time_limit_ms: u64,

    /// Compile stderr carried in a CompileError verdict is truncated to this many bytes
    pub compile_stderr_limit_bytes: usize,

    /// Slack added on top of the sum of per-case wall limits when computing a Job's hard
    /// lifetime ceiling, to absorb scheduling jitter around the sandbox itself.
    pub hard_ceiling_slack_ms: u64,
}

impl Config {
    /// Load configuration from environment variables, applying the same defaults
    /// across every deployment environment.
    pub fn from_env() -> Self {
        let workspace_base = PathBuf::from(
            env::var("WORKSPACE_BASE_PATH").unwrap_or_else(|_| "/tmp/charon".to_string()),
        );

        Self {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| {
                format!(
                    "charon_worker_{}",
                    uuid_like_suffix()
                )
            }),
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "charon_group".to_string()),
            input_stream: env::var("INPUT_STREAM").unwrap_or_else(|_| "submissions".to_string()),
            output_stream: env::var("OUTPUT_STREAM").unwrap_or_else(|_| "verdicts".to_string()),
            dead_letter_stream: env::var("DEAD_LETTER_STREAM")
                .unwrap_or_else(|_| "submissions_dlq".to_string()),
            block_timeout_ms: env::var("BLOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            metrics_port: env::var("METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9091),
            sandbox_binary: PathBuf::from(
                env::var("SANDBOX_BINARY")
                    .unwrap_or_else(|_| "/usr/local/bin/nsjail".to_string()),
            ),
            workspace_base,
            execution: ExecutionConfig {
                default_time_limit_ms: env::var("DEFAULT_TIME_LIMIT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2000),
                max_time_limit_ms: env::var("MAX_TIME_LIMIT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30000),
                default_memory_limit_kb: env::var("DEFAULT_MEMORY_LIMIT_KB")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(256 * 1024),
                max_memory_limit_kb: env::var("MAX_MEMORY_LIMIT_KB")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1024 * 1024),
                output_limit_bytes: env::var("OUTPUT_LIMIT_BYTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(64 * 1024 * 1024),
                compile_time_limit_ms: env::var("COMPILE_TIME_LIMIT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
                compile_stderr_limit_bytes: env::var("COMPILE_STDERR_LIMIT_BYTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(8 * 1024),
                hard_ceiling_slack_ms: env::var("HARD_CEILING_SLACK_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10_000),
            },
        }
    }
}

fn uuid_like_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..8)
        .map(|_| {
            let n: u8 = rng.random_range(0..16);
            std::char::from_digit(n as u32, 16).unwrap()
        })
        .collect()
}
