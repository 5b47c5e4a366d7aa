//! Reservation expiry sweeper.
//!
//! Periodically releases the stock held by pending reservations whose hold lapsed. Each
//! run drains due reservations in bounded batches; the ledger guarantees every hold is
//! released exactly once even with several sweepers running.
//!
//! # Example
//!
//! ```ignore
//! let (sweeper, shutdown) = ExpirySweeper::new(env, SweeperConfig::default());
//! let handle = sweeper.spawn();
//!
//! // Later, during shutdown:
//! shutdown.send(true).ok();
//! handle.await?;
//! ```

use crate::engine::FlashSaleEnvironment;
use crate::metrics::{self, ReservationMetrics, SweeperMetrics};
use flash_sale_core::{FlashSaleItemId, LedgerError};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sweeper tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between runs
    pub interval: Duration,
    /// Maximum reservations released per ledger call
    pub batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 500,
        }
    }
}

/// Background task releasing expired reservations.
pub struct ExpirySweeper {
    env: FlashSaleEnvironment,
    config: SweeperConfig,
    shutdown: watch::Receiver<bool>,
}

impl ExpirySweeper {
    /// Create a sweeper.
    ///
    /// Returns the sweeper and a shutdown sender. Send `true` to the shutdown sender
    /// to stop [`ExpirySweeper::run`] after the current run.
    #[must_use]
    pub fn new(env: FlashSaleEnvironment, config: SweeperConfig) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = Self {
            env,
            config,
            shutdown: shutdown_rx,
        };
        (sweeper, shutdown_tx)
    }

    /// Release every reservation due at the current clock time.
    ///
    /// Pulls batches of `batch_size` until a batch comes back short. An item whose
    /// release trips an invariant violation is reported and skipped for the rest of
    /// the run; its reservations stay pending. Returns the number of reservations
    /// released.
    ///
    /// # Errors
    ///
    /// Returns the first storage [`LedgerError`]. Batches committed before it stay
    /// committed; the failing batch released nothing.
    pub async fn sweep_once(&self) -> Result<usize, LedgerError> {
        let now = self.env.clock.now();
        let mut total = 0;
        let mut skipped: Vec<FlashSaleItemId> = Vec::new();

        loop {
            let batch = self
                .env
                .ledger
                .release_expired(now, self.config.batch_size, &skipped)
                .await;
            let released = match batch {
                Ok(released) => released,
                Err(e @ LedgerError::InvariantViolation { item_id, .. })
                    if !skipped.contains(&item_id) =>
                {
                    metrics::record_storage_error(&e);
                    tracing::error!(
                        %item_id,
                        error = %e,
                        "Stock ledger invariant violated during sweep; item skipped"
                    );
                    skipped.push(item_id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for reservation in &released {
                ReservationMetrics::record_settled(reservation.status);
                tracing::trace!(
                    reservation_id = %reservation.reservation_id,
                    item_id = %reservation.item_id,
                    quantity = reservation.quantity,
                    new_sold_count = reservation.new_sold_count,
                    "Expired reservation released"
                );
            }
            total += released.len();

            if released.is_empty() || released.len() < self.config.batch_size as usize {
                return Ok(total);
            }
        }
    }

    /// Run until a shutdown signal is received.
    ///
    /// The first run starts after a random delay of up to one interval so replicas
    /// started together do not sweep in lockstep. A failed run is logged and retried
    /// on the next tick.
    pub async fn run(mut self) {
        let initial_delay = self
            .config
            .interval
            .mul_f64(rand::thread_rng().gen_range(0.0..1.0));
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + initial_delay,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Expiry sweeper started"
        );

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,

                // Handle shutdown
                changed = self.shutdown.changed() => {
                    // A dropped sender also means shut down.
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    /// Spawn [`ExpirySweeper::run`] on the Tokio runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run_cycle(&self) {
        match self.sweep_once().await {
            Ok(0) => {
                SweeperMetrics::record_run(0);
                tracing::debug!("No expired reservations");
            }
            Ok(released) => {
                SweeperMetrics::record_run(released);
                tracing::info!(released, "Released expired reservations");
            }
            Err(e) => {
                SweeperMetrics::record_failure();
                metrics::record_storage_error(&e);
                if matches!(e, LedgerError::InvariantViolation { .. }) {
                    tracing::error!(error = %e, "Stock ledger invariant violated during sweep");
                } else {
                    tracing::warn!(error = %e, "Sweep failed, retrying next tick");
                }
            }
        }
    }
}
