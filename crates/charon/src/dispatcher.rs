//! Drives the receive -> grade -> publish -> ack cycle, bounded by a worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::broker::{self, RedisStreamsBroker};
use crate::grader::Grader;
use crate::metrics;
use crate::sandbox::SandboxRunner;
use crate::types::ResultMessage;

pub struct Dispatcher<R: SandboxRunner + 'static> {
    broker: Arc<RedisStreamsBroker>,
    grader: Arc<Grader<R>>,
    shutdown: Arc<AtomicBool>,
    concurrency: Arc<Semaphore>,
    worker_concurrency: u32,
    max_retries: u32,
}

impl<R: SandboxRunner + 'static> Dispatcher<R> {
    pub fn new(
        broker: RedisStreamsBroker,
        grader: Grader<R>,
        shutdown: Arc<AtomicBool>,
        worker_concurrency: usize,
        max_retries: u32,
    ) -> Self {
        let worker_concurrency = worker_concurrency.max(1);
        Self {
            broker: Arc::new(broker),
            grader: Arc::new(grader),
            shutdown,
            concurrency: Arc::new(Semaphore::new(worker_concurrency)),
            worker_concurrency: worker_concurrency as u32,
            max_retries,
        }
    }

    /// Runs until the shutdown flag is set, then lets in-flight jobs finish before returning.
    pub async fn run(&self) {
        tracing::info!("dispatcher starting, reclaiming abandoned deliveries");
        if let Err(e) = self.broker.claim_abandoned().await {
            tracing::warn!(error = %e, "failed to reclaim abandoned deliveries");
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            let permit = match self.concurrency.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let delivery = match self.broker.receive().await {
                Ok(Some(d)) => d,
                Ok(None) => {
                    drop(permit);
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "receive failed");
                    drop(permit);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let broker = self.broker.clone();
            let grader = self.grader.clone();
            let max_retries = self.max_retries;

            tokio::spawn(async move {
                let _permit = permit;
                metrics::ACTIVE_JOBS.inc();

                let verdict = grader.grade(&delivery.job).await;
                let result = ResultMessage::new(delivery.job.submission_id.clone(), &verdict);

                metrics::JOBS_PROCESSED.inc();
                metrics::VERDICTS_TOTAL
                    .with_label_values(&[verdict.label()])
                    .inc();
                if let crate::types::Verdict::Accepted {
                    execution_time_seconds,
                } = &verdict
                {
                    metrics::EXECUTION_DURATION
                        .with_label_values(&[&delivery.job.problem_id.to_string()])
                        .observe(*execution_time_seconds);
                }

                match broker.publish(&result).await {
                    Ok(()) => {
                        if let Err(e) = broker.ack(&delivery.message_id).await {
                            tracing::error!(error = %e, submission_id = %delivery.job.submission_id, "ack failed after publish");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, submission_id = %delivery.job.submission_id, "publish failed");
                        metrics::JOBS_FAILED.inc();

                        if broker::is_retryable(&e.to_string()) && delivery.retry_count < max_retries {
                            if let Err(e) = broker.retry(&delivery.job, delivery.retry_count + 1).await {
                                tracing::error!(error = %e, "failed to requeue job for retry");
                            }
                        } else {
                            if let Err(e) = broker.dead_letter(&delivery.job, &e.to_string()).await {
                                tracing::error!(error = %e, "failed to dead-letter job");
                            }
                        }
                        let _ = broker.ack(&delivery.message_id).await;
                    }
                }

                metrics::ACTIVE_JOBS.dec();
            });
        }

        tracing::info!("shutdown signal received, waiting for in-flight jobs to drain");
        let _ = self.concurrency.acquire_many(self.worker_concurrency).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_caps_at_configured_concurrency() {
        let sem = Semaphore::new(4usize.max(1));
        assert_eq!(sem.available_permits(), 4);
    }
}
