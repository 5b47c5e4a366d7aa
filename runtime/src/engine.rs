//! The flash-sale engine: the entry point request workers call.
//!
//! Every operation follows the same shape: a cheap unlocked pre-check through the
//! [`ReservationValidator`], then one authoritative ledger call that re-checks the
//! rules under a row lock and applies the conditional update. The pre-check only saves
//! work; it never decides a claim on its own.

use crate::metrics::{self, ClaimMetrics, ReservationMetrics};
use crate::retry::{RetryPolicy, retry_transient};
use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;
use flash_sale_core::{
    CancelOutcome, ClaimOutcome, ClaimRequest, Eligibility, FinalizeOutcome, FlashSaleItemId,
    LedgerError, LedgerFuture, PurchaseRecord, Rejection, Reservation, ReservationId,
    ReservationValidator, ReserveOutcome, StockLedger, StockSnapshot, UserId,
};
use std::sync::Arc;
use std::time::Instant;

/// Injected dependencies of the engine and the sweeper.
#[derive(Clone)]
pub struct FlashSaleEnvironment {
    /// Source of "now" for window checks and reservation expiry
    pub clock: Arc<dyn Clock>,
    /// Authoritative stock ledger
    pub ledger: Arc<dyn StockLedger>,
}

impl FlashSaleEnvironment {
    /// Create an environment from its parts.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ledger: Arc<dyn StockLedger>) -> Self {
        Self { clock, ledger }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a pending reservation holds stock
    pub reservation_ttl: chrono::Duration,
    /// Retry policy for transient ledger errors
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: chrono::Duration::minutes(15),
            retry: RetryPolicy::none(),
        }
    }
}

impl EngineConfig {
    /// Set the reservation hold time.
    #[must_use]
    pub const fn with_reservation_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Retry transient storage failures at most once.
    #[must_use]
    pub fn with_retry_transient_once(mut self, enabled: bool) -> Self {
        self.retry = if enabled {
            RetryPolicy::once()
        } else {
            RetryPolicy::none()
        };
        self
    }
}

/// Result of a direct flash-sale purchase.
///
/// On anything but `Claimed` the caller must not create an order line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseResult {
    /// Units claimed and purchase recorded
    Claimed {
        /// `stock_sold` right after this claim
        new_sold_count: u32,
        /// The committed purchase record
        purchase: PurchaseRecord,
    },
    /// Expected business outcome; show `reason.user_message()`
    Rejected(Rejection),
    /// Nothing was claimed; retryable when `is_retryable()` says so
    StorageError(LedgerError),
}

/// Result of starting a multi-step checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationResult {
    /// Units held until `reservation.expires_at`
    Reserved(Reservation),
    /// Expected business outcome
    Rejected(Rejection),
    /// Nothing was held
    StorageError(LedgerError),
}

/// Flash-sale stock reservation engine.
///
/// Cheap to clone; clones share the environment.
///
/// # Example
///
/// ```ignore
/// let engine = FlashSaleEngine::new(env, EngineConfig::default());
/// match engine.attempt_flash_sale_purchase(item_id, user_id, 1).await {
///     PurchaseResult::Claimed { purchase, .. } => create_order_line(purchase),
///     PurchaseResult::Rejected(reason) => show(reason.user_message()),
///     PurchaseResult::StorageError(e) => retry_later(e),
/// }
/// ```
#[derive(Clone)]
pub struct FlashSaleEngine {
    env: FlashSaleEnvironment,
    config: EngineConfig,
    validator: ReservationValidator,
}

impl FlashSaleEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(env: FlashSaleEnvironment, config: EngineConfig) -> Self {
        Self {
            env,
            config,
            validator: ReservationValidator::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Non-authoritative eligibility check against an unlocked snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the snapshot cannot be read or is inconsistent.
    pub async fn validate(
        &self,
        item_id: FlashSaleItemId,
        user_id: UserId,
        quantity: u32,
    ) -> Result<Eligibility, LedgerError> {
        self.precheck(item_id, user_id, quantity, self.env.clock.now())
            .await
    }

    /// Claim units of a flash-sale item for a user and record the purchase.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn attempt_flash_sale_purchase(
        &self,
        item_id: FlashSaleItemId,
        user_id: UserId,
        quantity: u32,
    ) -> PurchaseResult {
        let started = Instant::now();

        match self
            .precheck(item_id, user_id, quantity, self.env.clock.now())
            .await
        {
            Ok(Eligibility::Eligible) => {}
            Ok(Eligibility::Rejected(reason)) => {
                return self.reject_claim(item_id, reason, started);
            }
            Err(e) => {
                self.report_failure("claim", item_id, &e);
                ClaimMetrics::record_storage_error(started.elapsed());
                return PurchaseResult::StorageError(e);
            }
        }

        let outcome = retry_transient(&self.config.retry, || {
            self.env
                .ledger
                .try_claim(self.claim_request(item_id, user_id, quantity))
        })
        .await;

        match outcome {
            Ok(ClaimOutcome::Claimed {
                new_sold_count,
                purchase,
            }) => {
                ClaimMetrics::record_claimed(started.elapsed());
                tracing::debug!(
                    %item_id,
                    %user_id,
                    quantity,
                    new_sold_count,
                    purchase_id = %purchase.id,
                    "Flash-sale units claimed"
                );
                PurchaseResult::Claimed {
                    new_sold_count,
                    purchase,
                }
            }
            Ok(ClaimOutcome::Rejected(reason)) => self.reject_claim(item_id, reason, started),
            Err(e) => {
                self.report_failure("claim", item_id, &e);
                ClaimMetrics::record_storage_error(started.elapsed());
                PurchaseResult::StorageError(e)
            }
        }
    }

    /// Hold units for a multi-step checkout until `now + reservation_ttl`.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn begin_reservation(
        &self,
        item_id: FlashSaleItemId,
        user_id: UserId,
        quantity: u32,
    ) -> ReservationResult {
        match self
            .precheck(item_id, user_id, quantity, self.env.clock.now())
            .await
        {
            Ok(Eligibility::Eligible) => {}
            Ok(Eligibility::Rejected(reason)) => return Self::reject_reservation(item_id, reason),
            Err(e) => {
                self.report_failure("reserve", item_id, &e);
                return ReservationResult::StorageError(e);
            }
        }

        let outcome = retry_transient(&self.config.retry, || {
            self.reserve_until_ttl(self.claim_request(item_id, user_id, quantity))
        })
        .await;

        match outcome {
            Ok(ReserveOutcome::Reserved {
                new_sold_count,
                reservation,
            }) => {
                ReservationMetrics::record_created();
                tracing::debug!(
                    %item_id,
                    %user_id,
                    quantity,
                    new_sold_count,
                    reservation_id = %reservation.id,
                    expires_at = %reservation.expires_at,
                    "Reservation taken"
                );
                ReservationResult::Reserved(reservation)
            }
            Ok(ReserveOutcome::Rejected(reason)) => Self::reject_reservation(item_id, reason),
            Err(e) => {
                self.report_failure("reserve", item_id, &e);
                ReservationResult::StorageError(e)
            }
        }
    }

    /// Convert a pending reservation into a purchase.
    ///
    /// A reservation whose hold already lapsed is released instead and reported as
    /// [`FinalizeOutcome::Expired`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure; nothing was changed.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn finalize_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<FinalizeOutcome, LedgerError> {
        let outcome = retry_transient(&self.config.retry, || {
            self.env.ledger.finalize(reservation_id, self.env.clock.now())
        })
        .await
        .inspect_err(|e| self.report_reservation_failure("finalize", reservation_id, e))?;

        match &outcome {
            FinalizeOutcome::Finalized(purchase) => {
                ReservationMetrics::record_settled(flash_sale_core::ReservationStatus::Finalized);
                tracing::debug!(%reservation_id, purchase_id = %purchase.id, "Reservation finalized");
            }
            FinalizeOutcome::Expired(released) => {
                ReservationMetrics::record_settled(released.status);
                tracing::debug!(
                    %reservation_id,
                    quantity = released.quantity,
                    "Finalize arrived after expiry; hold released"
                );
            }
            FinalizeOutcome::AlreadySettled(_) | FinalizeOutcome::NotFound => {}
        }
        Ok(outcome)
    }

    /// Cancel a pending reservation and return its units.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure; nothing was changed.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<CancelOutcome, LedgerError> {
        let outcome = retry_transient(&self.config.retry, || {
            self.env.ledger.cancel(reservation_id, self.env.clock.now())
        })
        .await
        .inspect_err(|e| self.report_reservation_failure("cancel", reservation_id, e))?;

        if let CancelOutcome::Released(released) = &outcome {
            ReservationMetrics::record_settled(released.status);
            tracing::debug!(
                %reservation_id,
                quantity = released.quantity,
                new_sold_count = released.new_sold_count,
                "Reservation cancelled"
            );
        }
        Ok(outcome)
    }

    /// Best-effort stock snapshot for display. May be stale on return.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the read fails or the row is inconsistent.
    pub async fn availability(
        &self,
        item_id: FlashSaleItemId,
    ) -> Result<Option<StockSnapshot>, LedgerError> {
        let Some(item) = self
            .env
            .ledger
            .load_item(item_id)
            .await
            .inspect_err(|e| self.report_failure("availability", item_id, e))?
        else {
            return Ok(None);
        };

        if !item.is_consistent() {
            let e = LedgerError::oversold(&item);
            self.report_failure("availability", item_id, &e);
            return Err(e);
        }
        Ok(Some(item.snapshot(self.env.clock.now())))
    }

    async fn precheck(
        &self,
        item_id: FlashSaleItemId,
        user_id: UserId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Eligibility, LedgerError> {
        if quantity == 0 {
            return Ok(Eligibility::Rejected(Rejection::InvalidQuantity));
        }

        let Some(item) = self.env.ledger.load_item(item_id).await? else {
            return Ok(Eligibility::Rejected(Rejection::ItemNotFound));
        };

        // Cheap rejections first; only read the user's history when it can matter.
        if !item.window.is_open_at(now) || item.remaining() < quantity {
            return self.validator.check(&item, 0, quantity, now);
        }

        let user_total = self.env.ledger.user_total(item_id, user_id).await?;
        self.validator.check(&item, user_total, quantity, now)
    }

    fn claim_request(&self, item_id: FlashSaleItemId, user_id: UserId, quantity: u32) -> ClaimRequest {
        ClaimRequest {
            item_id,
            user_id,
            quantity,
            now: self.env.clock.now(),
        }
    }

    fn reject_claim(
        &self,
        item_id: FlashSaleItemId,
        reason: Rejection,
        started: Instant,
    ) -> PurchaseResult {
        ClaimMetrics::record_rejected(reason, started.elapsed());
        tracing::trace!(%item_id, reason = reason.as_str(), "Claim rejected");
        PurchaseResult::Rejected(reason)
    }

    fn reserve_until_ttl(&self, request: ClaimRequest) -> LedgerFuture<'_, ReserveOutcome> {
        let ttl = self.config.reservation_ttl;
        match request.now.checked_add_signed(ttl) {
            Some(expires_at) => self.env.ledger.reserve(request, expires_at),
            None => Box::pin(std::future::ready(Err(LedgerError::Database(format!(
                "reservation ttl {ttl} overflows the timestamp range"
            ))))),
        }
    }

    fn reject_reservation(item_id: FlashSaleItemId, reason: Rejection) -> ReservationResult {
        ReservationMetrics::record_rejected(reason);
        tracing::trace!(%item_id, reason = reason.as_str(), "Reservation rejected");
        ReservationResult::Rejected(reason)
    }

    fn report_failure(&self, operation: &'static str, item_id: FlashSaleItemId, error: &LedgerError) {
        metrics::record_storage_error(error);
        if matches!(error, LedgerError::InvariantViolation { .. }) {
            tracing::error!(operation, %item_id, %error, "Stock ledger invariant violated");
        } else {
            tracing::warn!(
                operation,
                %item_id,
                %error,
                retryable = error.is_retryable(),
                "Stock ledger operation failed"
            );
        }
    }

    fn report_reservation_failure(
        &self,
        operation: &'static str,
        reservation_id: ReservationId,
        error: &LedgerError,
    ) {
        match error {
            LedgerError::InvariantViolation { item_id, .. } => {
                self.report_failure(operation, *item_id, error);
            }
            _ => {
                metrics::record_storage_error(error);
                tracing::warn!(
                    operation,
                    %reservation_id,
                    %error,
                    retryable = error.is_retryable(),
                    "Stock ledger operation failed"
                );
            }
        }
    }
}
