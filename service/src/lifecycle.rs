//! Process lifecycle and graceful shutdown.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. The sweeper is told to stop after its current run
//! 2. The process waits for it up to the shutdown timeout
//! 3. Clean exit
//!
//! A sweep interrupted by a hard kill loses nothing: each batch is one transaction.

use flash_sale_runtime::ExpirySweeper;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Run `sweeper` until `signal` resolves, then stop it.
///
/// Waits at most `timeout` for the sweeper to finish its current run.
pub async fn run_sweeper_until<F>(
    sweeper: ExpirySweeper,
    shutdown: watch::Sender<bool>,
    signal: F,
    timeout: Duration,
) where
    F: Future<Output = ()>,
{
    let handle = sweeper.spawn();

    signal.await;
    info!("Stopping expiry sweeper...");
    let _ = shutdown.send(true);

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => info!("Expiry sweeper stopped gracefully"),
        Ok(Err(e)) => warn!(error = %e, "Expiry sweeper task failed"),
        Err(_) => warn!(
            timeout_secs = timeout.as_secs(),
            "Expiry sweeper shutdown timed out"
        ),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed the failure is logged and the other signal still
/// works.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flash_sale_core::{ClaimRequest, StockLedger, UserId};
    use flash_sale_runtime::{FlashSaleEnvironment, SweeperConfig};
    use flash_sale_testing::{InMemoryStockLedger, ManualClock, helpers};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn sweeper_releases_holds_until_signalled() {
        let ledger = InMemoryStockLedger::new();
        let clock = ManualClock::new(helpers::sale_start());
        let item = ledger.create_item(helpers::flash_sale(5, 5));
        let expires_at = helpers::sale_start() + chrono::Duration::minutes(15);
        let request = ClaimRequest {
            item_id: item.id,
            user_id: UserId::new(),
            quantity: 2,
            now: helpers::sale_start(),
        };
        ledger.reserve(request, expires_at).await.unwrap();
        clock.set(expires_at);

        let env = FlashSaleEnvironment::new(Arc::new(clock), Arc::new(ledger.clone()));
        let (sweeper, shutdown) = ExpirySweeper::new(
            env,
            SweeperConfig {
                interval: Duration::from_millis(5),
                batch_size: 10,
            },
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(run_sweeper_until(
            sweeper,
            shutdown,
            async move {
                let _ = stop_rx.await;
            },
            Duration::from_secs(1),
        ));

        // The first sweep starts within one interval.
        for _ in 0..100 {
            if ledger.item(item.id).unwrap().stock_sold == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
    }
}
