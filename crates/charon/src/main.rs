//! Charon - Grading Worker for Olympus
//!
//! Consumes submissions from the input stream, compiles and runs them against a
//! problem's stored test cases inside an nsjail sandbox, and publishes a verdict
//! to the output stream.

mod broker;
mod config;
mod dispatcher;
mod error;
mod grader;
mod language;
mod metrics;
mod repository;
mod sandbox;
mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::broker::RedisStreamsBroker;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::grader::Grader;
use crate::metrics::MetricsServer;
use crate::repository::ProblemRepository;
use crate::sandbox::NsjailRunner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charon=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Charon grading worker");

    let config = Config::from_env();
    tracing::info!(environment = %config.environment, "loaded configuration");

    tracing::info!("Connecting to database...");
    let db_pool = sqlx::PgPool::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    tracing::info!("Connecting to broker...");
    let broker = RedisStreamsBroker::connect_with_retry(
        &config.redis_url,
        config.input_stream.clone(),
        config.output_stream.clone(),
        config.dead_letter_stream.clone(),
        config.consumer_group.clone(),
        config.worker_id.clone(),
        config.block_timeout_ms,
    )
    .await?;
    tracing::info!("Broker connected");

    tokio::fs::create_dir_all(&config.workspace_base).await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("shutdown signal received, new deliveries will stop");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = MetricsServer::run(metrics_port).await {
            tracing::error!(error = %e, "metrics server error");
        }
    });

    let sandbox = NsjailRunner::new(config.sandbox_binary.clone());
    let repository = ProblemRepository::new(db_pool);
    let grader = Grader::new(
        sandbox,
        repository,
        config.workspace_base.clone(),
        config.execution.clone(),
    );

    let dispatcher = Dispatcher::new(
        broker,
        grader,
        shutdown,
        config.worker_concurrency,
        config.max_retries,
    );

    tracing::info!("Charon ready, starting dispatch loop");
    dispatcher.run().await;

    tracing::info!("Charon shutdown complete");
    Ok(())
}
