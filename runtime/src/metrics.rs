//! Prometheus metrics for the flash-sale engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `flash_sale_claims_total{outcome}` - Claim attempts by outcome (`claimed`, a
//!   rejection reason, or `storage_error`)
//! - `flash_sale_reservations_total{status}` - Reservations by status transition, or
//!   the rejection reason when none was taken
//! - `flash_sale_sweeper_released_total` - Reservations released by the sweeper
//! - `flash_sale_sweeper_runs_total{result}` - Sweeper runs by result
//! - `flash_sale_storage_errors_total{kind}` - Ledger errors by kind
//! - `flash_sale_invariant_violations_total` - Ledger states the engine can never produce
//! - `flash_sale_lock_timeouts_total` - Row lock waits that hit `lock_timeout`
//! - `flash_sale_retries_total{result}` - Retried operations by result
//!
//! ## Histograms
//! - `flash_sale_claim_duration_seconds` - End-to-end claim latency
//!
//! # Example
//!
//! ```rust,no_run
//! use flash_sale_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use flash_sale_core::{LedgerError, Rejection, ReservationStatus};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Histogram buckets for claim latency, in seconds.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or the listener cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the call succeeds
    /// without a handle and metrics keep flowing to the existing recorder.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "flash_sale_claims_total",
        "Claim attempts by outcome (claimed, rejection reason, storage_error)"
    );
    describe_histogram!(
        "flash_sale_claim_duration_seconds",
        "Time from claim request to result, including pre-check and retries"
    );
    describe_counter!(
        "flash_sale_reservations_total",
        "Reservations by status transition (created, finalized, expired, cancelled) or rejection reason"
    );
    describe_counter!(
        "flash_sale_sweeper_released_total",
        "Expired reservations released by the sweeper"
    );
    describe_counter!(
        "flash_sale_sweeper_runs_total",
        "Sweeper runs by result (ok, error)"
    );
    describe_counter!(
        "flash_sale_storage_errors_total",
        "Ledger errors by kind"
    );
    describe_counter!(
        "flash_sale_invariant_violations_total",
        "Ledger states the engine can never produce; page on any increase"
    );
    describe_counter!(
        "flash_sale_lock_timeouts_total",
        "Row lock waits that exceeded lock_timeout"
    );
    describe_counter!(
        "flash_sale_retries_total",
        "Retried ledger operations by result (recovered, exhausted)"
    );
}

/// Claim metrics recorder.
pub struct ClaimMetrics;

impl ClaimMetrics {
    /// Record a successful claim.
    pub fn record_claimed(duration: Duration) {
        counter!("flash_sale_claims_total", "outcome" => "claimed").increment(1);
        histogram!("flash_sale_claim_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a rejected claim.
    pub fn record_rejected(reason: Rejection, duration: Duration) {
        counter!("flash_sale_claims_total", "outcome" => reason.as_str()).increment(1);
        histogram!("flash_sale_claim_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a claim that failed in storage.
    pub fn record_storage_error(duration: Duration) {
        counter!("flash_sale_claims_total", "outcome" => "storage_error").increment(1);
        histogram!("flash_sale_claim_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a reservation taken.
    pub fn record_created() {
        counter!("flash_sale_reservations_total", "status" => "created").increment(1);
    }

    /// Record a reservation request turned away.
    pub fn record_rejected(reason: Rejection) {
        counter!("flash_sale_reservations_total", "status" => reason.as_str()).increment(1);
    }

    /// Record a reservation leaving `Pending`.
    pub fn record_settled(status: ReservationStatus) {
        counter!("flash_sale_reservations_total", "status" => status.as_str()).increment(1);
    }
}

/// Sweeper metrics recorder.
pub struct SweeperMetrics;

impl SweeperMetrics {
    /// Record a completed sweep.
    pub fn record_run(released: usize) {
        counter!("flash_sale_sweeper_runs_total", "result" => "ok").increment(1);
        counter!("flash_sale_sweeper_released_total").increment(released as u64);
    }

    /// Record a failed sweep.
    pub fn record_failure() {
        counter!("flash_sale_sweeper_runs_total", "result" => "error").increment(1);
    }
}

/// Record a ledger error by kind, plus the invariant alarm when it applies.
pub fn record_storage_error(error: &LedgerError) {
    counter!("flash_sale_storage_errors_total", "kind" => error.kind()).increment(1);
    if matches!(error, LedgerError::InvariantViolation { .. }) {
        counter!("flash_sale_invariant_violations_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ClaimMetrics::record_claimed(Duration::from_millis(3));
        ClaimMetrics::record_rejected(Rejection::StockExhausted, Duration::from_millis(1));
        ReservationMetrics::record_settled(ReservationStatus::Expired);
        ReservationMetrics::record_rejected(Rejection::PerUserLimitExceeded);
        SweeperMetrics::record_run(2);
        record_storage_error(&LedgerError::release_underflow(
            flash_sale_core::FlashSaleItemId::new(),
            0,
            1,
        ));

        // Another test may have installed the recorder first; metrics still flow there.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("flash_sale_claims_total"));
            assert!(rendered.contains("stock_exhausted"));
            assert!(rendered.contains(&format!(
                "flash_sale_reservations_total{{status=\"{}\"}}",
                Rejection::PerUserLimitExceeded.as_str()
            )));
            assert!(rendered.contains("flash_sale_sweeper_released_total"));
            assert!(rendered.contains("flash_sale_invariant_violations_total"));
        }
    }
}
