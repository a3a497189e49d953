//! Prometheus metrics and the `/metrics`/`/health` server.

use std::sync::LazyLock;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static EXECUTION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "judge_execution_duration_seconds",
        "Time spent executing submissions",
    )
    .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);

    HistogramVec::new(opts, &["problem_id"]).expect("failed to create histogram")
});

pub static VERDICTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new("judge_verdict_total", "Total verdicts by type");
    IntCounterVec::new(opts, &["verdict"]).expect("failed to create counter")
});

pub static JOBS_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("judge_jobs_processed_total", "Total jobs processed")
        .expect("failed to create counter")
});

pub static JOBS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("judge_jobs_failed_total", "Total jobs that failed")
        .expect("failed to create counter")
});

pub static ACTIVE_JOBS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("judge_active_jobs", "Currently active judging jobs")
        .expect("failed to create gauge")
});

/// Registers every metric above with the global registry. Idempotent-unsafe like the upstream
/// Prometheus client: call exactly once per process.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(EXECUTION_DURATION.clone()))
        .expect("failed to register metric");
    REGISTRY
        .register(Box::new(VERDICTS_TOTAL.clone()))
        .expect("failed to register metric");
    REGISTRY
        .register(Box::new(JOBS_PROCESSED.clone()))
        .expect("failed to register metric");
    REGISTRY
        .register(Box::new(JOBS_FAILED.clone()))
        .expect("failed to register metric");
    REGISTRY
        .register(Box::new(ACTIVE_JOBS.clone()))
        .expect("failed to register metric");
}

pub struct MetricsServer;

impl MetricsServer {
    pub async fn run(port: u16) -> anyhow::Result<()> {
        use axum::{routing::get, Router};
        use std::net::SocketAddr;

        init_metrics();

        let app = Router::new()
            .route("/metrics", get(Self::metrics_handler))
            .route("/health", get(|| async { "OK" }));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn metrics_handler() -> String {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}
