//! Infrastructure setup.
//!
//! [`Resources::from_config`] connects the pool, runs migrations and builds the ledger,
//! so the process entry point only has to decide what to run on top of it.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env();
//! let resources = Resources::from_config(&config).await?;
//!
//! let engine = resources.engine()?;
//! let (sweeper, shutdown) = resources.sweeper();
//! ```

use crate::config::Config;
use crate::error::ServiceError;
use flash_sale_core::environment::SystemClock;
use flash_sale_postgres::PostgresStockLedger;
use flash_sale_runtime::{ExpirySweeper, FlashSaleEngine, FlashSaleEnvironment};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Shared infrastructure for engine workers and the sweeper.
#[derive(Clone)]
pub struct Resources {
    /// Service configuration
    pub config: Arc<Config>,

    /// Connection pool
    pub pool: PgPool,

    /// Stock ledger over `pool`
    pub ledger: Arc<PostgresStockLedger>,
}

impl Resources {
    /// Connect to `PostgreSQL`, run migrations and build the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the configuration is invalid, the pool cannot connect
    /// or a migration fails.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceError> {
        config.validate()?;

        info!(
            max_connections = config.postgres.max_connections,
            min_connections = config.postgres.min_connections,
            "Connecting to PostgreSQL..."
        );
        let pool = pool_options(config).connect(&config.postgres.url).await?;

        let ledger = PostgresStockLedger::new(pool.clone()).with_lock_timeout(config.lock_timeout());

        info!("Running migrations...");
        ledger.migrate().await?;
        info!("PostgreSQL ready");

        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
            ledger: Arc::new(ledger),
        })
    }

    /// Wall clock plus the `PostgreSQL` ledger.
    #[must_use]
    pub fn environment(&self) -> FlashSaleEnvironment {
        FlashSaleEnvironment::new(Arc::new(SystemClock), self.ledger.clone())
    }

    /// Engine configured from [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if the reservation TTL is out of range.
    pub fn engine(&self) -> Result<FlashSaleEngine, ServiceError> {
        Ok(FlashSaleEngine::new(
            self.environment(),
            self.config.engine_config()?,
        ))
    }

    /// Expiry sweeper and its shutdown sender.
    #[must_use]
    pub fn sweeper(&self) -> (ExpirySweeper, watch::Sender<bool>) {
        ExpirySweeper::new(self.environment(), self.config.sweeper_config())
    }
}

fn pool_options(config: &Config) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Some(Duration::from_secs(config.postgres.idle_timeout)))
}
