//! Redis Streams broker adapter: durable consumer-group delivery, prefetch=1, ack-after-publish.

use std::collections::HashMap;
use std::time::Duration;

use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use olympus_common::AppError as JudgeError;
use rand::Rng;

use crate::types::{Job, ResultMessage};

/// Base delay for exponential backoff on broker reconnect.
const RECONNECT_BASE_DELAY_MS: u64 = 1000;
/// Reconnect backoff never waits longer than this.
const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// A message delivered off the input stream, together with its id for later ack/retry.
pub struct Delivery {
    pub message_id: String,
    pub job: Job,
    pub retry_count: u32,
}

pub struct RedisStreamsBroker {
    pool: Pool,
    input_stream: String,
    output_stream: String,
    dead_letter_stream: String,
    consumer_group: String,
    consumer_name: String,
    block_timeout_ms: usize,
}

impl RedisStreamsBroker {
    /// Connects with automatic retry: exponential backoff starting at 1s, capped at 30s, with
    /// jitter so a fleet of workers reconnecting after an outage doesn't thunder the broker.
    pub async fn connect_with_retry(
        redis_url: &str,
        input_stream: String,
        output_stream: String,
        dead_letter_stream: String,
        consumer_group: String,
        consumer_name: String,
        block_timeout_ms: usize,
    ) -> Result<Self, JudgeError> {
        let mut attempt = 0u32;
        loop {
            match PoolConfig::from_url(redis_url).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => {
                    let broker = Self {
                        pool,
                        input_stream,
                        output_stream,
                        dead_letter_stream,
                        consumer_group,
                        consumer_name,
                        block_timeout_ms,
                    };
                    if broker.ensure_consumer_group().await.is_ok() {
                        return Ok(broker);
                    }
                }
                Err(_) => {}
            }

            attempt += 1;
            let delay = backoff_delay(attempt);
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "broker connect failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn ensure_consumer_group(&self) -> Result<(), JudgeError> {
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.input_stream)
            .arg(&self.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(JudgeError::QueueError(e.to_string())),
        }
    }

    /// Claims messages abandoned by a dead consumer (idle for over a minute) so they get
    /// redelivered to this consumer instead of waiting forever.
    pub async fn claim_abandoned(&self) -> Result<(), JudgeError> {
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;

        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.input_stream)
            .arg(&self.consumer_group)
            .arg("-")
            .arg("+")
            .arg(10)
            .query_async(&mut *conn)
            .await
            .unwrap_or_default();

        for (message_id, _consumer, idle_ms, _deliveries) in pending {
            if idle_ms > 60_000 {
                let _: Result<redis::Value, _> = redis::cmd("XCLAIM")
                    .arg(&self.input_stream)
                    .arg(&self.consumer_group)
                    .arg(&self.consumer_name)
                    .arg(60_000)
                    .arg(&message_id)
                    .query_async(&mut *conn)
                    .await;
            }
        }

        Ok(())
    }

    /// Blocks (up to `block_timeout_ms`) for the next job, reading at most one at a time.
    pub async fn receive(&self) -> Result<Option<Delivery>, JudgeError> {
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;

        let result: Vec<redis::Value> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.block_timeout_ms)
            .arg("STREAMS")
            .arg(&self.input_stream)
            .arg(">")
            .query_async(&mut *conn)
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;

        if result.is_empty() {
            return Ok(None);
        }

        parse_delivery(&result).map(Some)
    }

    pub async fn ack(&self, message_id: &str) -> Result<(), JudgeError> {
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;
        let _: i64 = redis::cmd("XACK")
            .arg(&self.input_stream)
            .arg(&self.consumer_group)
            .arg(message_id)
            .query_async(&mut *conn)
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;
        Ok(())
    }

    /// Publishes a verdict to the output stream, persistent by virtue of being an entry in a
    /// durable Redis stream rather than a best-effort pub/sub message.
    pub async fn publish(&self, result: &ResultMessage) -> Result<(), JudgeError> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;
        let _: String = redis::cmd("XADD")
            .arg(&self.output_stream)
            .arg("*")
            .arg("submission_id")
            .arg(&result.submission_id)
            .arg("payload")
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;
        Ok(())
    }

    /// Re-delivers a job with an incremented retry count.
    pub async fn retry(&self, job: &Job, retry_count: u32) -> Result<(), JudgeError> {
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;
        let _: String = redis::cmd("XADD")
            .arg(&self.input_stream)
            .arg("*")
            .arg("submission_id")
            .arg(&job.submission_id)
            .arg("problem_id")
            .arg(job.problem_id.to_string())
            .arg("language")
            .arg(&job.language)
            .arg("code")
            .arg(&job.code)
            .arg("retry_count")
            .arg(retry_count.to_string())
            .query_async(&mut *conn)
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;
        Ok(())
    }

    /// Pushes a job that exhausted its retries onto the dead-letter stream for manual inspection.
    pub async fn dead_letter(&self, job: &Job, error: &str) -> Result<(), JudgeError> {
        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;
        let _: String = redis::cmd("XADD")
            .arg(&self.dead_letter_stream)
            .arg("*")
            .arg("submission_id")
            .arg(&job.submission_id)
            .arg("problem_id")
            .arg(job.problem_id.to_string())
            .arg("error")
            .arg(error)
            .query_async(&mut *conn)
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;
        Ok(())
    }

    /// Correlation-id request/reply helper. Not used by the grading pipeline itself; exercised by
    /// integration tests that need a synchronous round trip through the broker.
    pub async fn rpc_call(
        &self,
        method: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, JudgeError> {
        let correlation_id = format!("rpc:{:016x}", rand::rng().random::<u64>());
        let reply_key = format!("{correlation_id}:reply");

        let mut conn = self.pool.get().await.map_err(|e| JudgeError::QueueError(e.to_string()))?;
        let _: () = conn
            .rpush::<_, _, ()>(format!("rpc:{method}"), format!("{correlation_id}|{payload}"))
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;

        let reply: Option<(String, String)> = conn
            .blpop(&reply_key, timeout.as_secs_f64())
            .await
            .map_err(|e| JudgeError::QueueError(e.to_string()))?;

        reply
            .map(|(_, value)| value)
            .ok_or_else(|| JudgeError::QueueError(format!("rpc call '{method}' timed out")))
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = RECONNECT_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(5));
    let capped = base.min(RECONNECT_MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}

/// Is this broker-level error worth retrying (transient infrastructure) rather than failing
/// the job permanently?
pub fn is_retryable(error_message: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "timed out",
        "connection refused",
        "no space left",
        "resource temporarily unavailable",
        "cannot allocate memory",
        "too many open files",
    ];
    let lower = error_message.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

fn parse_delivery(result: &[redis::Value]) -> Result<Delivery, JudgeError> {
    let stream_data = match result.first() {
        Some(redis::Value::Array(data)) => data,
        _ => return Err(JudgeError::QueueError("invalid stream response".into())),
    };
    let messages = match stream_data.get(1) {
        Some(redis::Value::Array(msgs)) => msgs,
        _ => return Err(JudgeError::QueueError("no messages in response".into())),
    };
    let message = match messages.first() {
        Some(redis::Value::Array(msg)) => msg,
        _ => return Err(JudgeError::QueueError("no message data".into())),
    };
    let message_id = match message.first() {
        Some(redis::Value::BulkString(id)) => String::from_utf8_lossy(id).to_string(),
        _ => return Err(JudgeError::QueueError("invalid message id".into())),
    };
    let fields = match message.get(1) {
        Some(redis::Value::Array(f)) => f,
        _ => return Err(JudgeError::QueueError("no message fields".into())),
    };

    let mut field_map = HashMap::new();
    for chunk in fields.chunks(2) {
        if let [redis::Value::BulkString(key), redis::Value::BulkString(value)] = chunk {
            field_map.insert(
                String::from_utf8_lossy(key).to_string(),
                String::from_utf8_lossy(value).to_string(),
            );
        }
    }

    let job = Job {
        submission_id: field_map
            .get("submission_id")
            .ok_or_else(|| JudgeError::QueueError("missing submission_id".into()))?
            .clone(),
        problem_id: field_map
            .get("problem_id")
            .ok_or_else(|| JudgeError::QueueError("missing problem_id".into()))?
            .parse()
            .map_err(|_| JudgeError::QueueError("invalid problem_id".into()))?,
        language: field_map
            .get("language")
            .ok_or_else(|| JudgeError::QueueError("missing language".into()))?
            .clone(),
        code: field_map
            .get("code")
            .ok_or_else(|| JudgeError::QueueError("missing code".into()))?
            .clone(),
    };
    let retry_count = field_map
        .get("retry_count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(Delivery {
        message_id,
        job,
        retry_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_patterns_match_infrastructure_errors() {
        assert!(is_retryable("Connection refused (os error 111)"));
        assert!(is_retryable("Resource temporarily unavailable"));
        assert!(!is_retryable("division by zero"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d1 = backoff_delay(1).as_millis();
        let d5 = backoff_delay(5).as_millis();
        let d10 = backoff_delay(10).as_millis();
        assert!(d1 >= RECONNECT_BASE_DELAY_MS as u128);
        assert!(d5 > d1);
        assert!(d10 <= (RECONNECT_MAX_DELAY_MS as u128) * 5 / 4);
    }
}
