//! Flash-sale expiry sweeper
//!
//! Releases the stock held by lapsed reservations on a fixed interval.
//!
//! This binary:
//! - Loads configuration from the environment (and `.env`)
//! - Starts the Prometheus exporter
//! - Connects to `PostgreSQL` and runs migrations
//! - Sweeps until Ctrl+C or SIGTERM
//!
//! Several replicas may run at once; each hold is released exactly once.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/flash_sale cargo run --bin flash-sale-sweeper
//! ```

use anyhow::Context;
use flash_sale_runtime::metrics::MetricsServer;
use flash_sale_service::{Config, Resources, lifecycle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.server.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting flash-sale expiry sweeper...");
    config.validate().context("invalid configuration")?;
    tracing::info!(
        interval_secs = config.sweeper.interval_secs,
        batch_size = config.sweeper.batch_size,
        lock_timeout_ms = config.postgres.lock_timeout_ms,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start().context("failed to start metrics exporter")?;

    let resources = Resources::from_config(&config)
        .await
        .context("failed to initialize resources")?;

    let (sweeper, shutdown) = resources.sweeper();
    lifecycle::run_sweeper_until(
        sweeper,
        shutdown,
        lifecycle::shutdown_signal(),
        config.shutdown_timeout(),
    )
    .await;

    resources.pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}
