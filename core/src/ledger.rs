//! Stock ledger trait and related types.
//!
//! The [`StockLedger`] is the single gateway through which flash-sale stock is mutated.
//! Every mutating operation is one indivisible unit against the backing store: the
//! conditional stock change, the purchase record or reservation row, and the status
//! flag all commit together or not at all.
//!
//! # Implementations
//!
//! - `PostgresStockLedger` (in `flash-sale-postgres`): row lock plus conditional update
//!   inside a transaction
//! - `InMemoryStockLedger` (in `flash-sale-testing`): the same semantics under one mutex
//!
//! # Model
//!
//! Pending reservations are counted in `stock_sold` from the moment they are taken.
//! Finalizing a reservation never touches the ledger; expiring or cancelling one gives
//! its quantity back exactly once.

use crate::rejection::Rejection;
use crate::types::{
    FlashSaleItem, FlashSaleItemId, PurchaseRecord, Reservation, ReservationId,
    ReservationStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by every ledger operation.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Errors that can occur during ledger operations.
///
/// Business rejections are NOT errors; they travel inside the `Ok` outcome types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Connection loss, pool exhaustion, serialization failure or deadlock.
    ///
    /// Nothing was applied; the whole operation may be retried.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Waiting on a lock or connection exceeded the configured budget.
    ///
    /// Nothing was applied; the whole operation may be retried.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// The ledger was found in a state the engine can never produce.
    ///
    /// Indicates a bug or a write that bypassed the ledger. Never corrected silently.
    #[error("Invariant violation on item {item_id}: {detail}")]
    InvariantViolation {
        /// Item whose row is inconsistent
        item_id: FlashSaleItemId,
        /// What was observed
        detail: String,
    },

    /// Non-retryable storage failure (decode error, unexpected constraint failure).
    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Whether the caller may safely retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Stable label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::Database(_) => "database",
        }
    }

    /// Build the violation for a row with `stock_sold > stock_allocated`.
    #[must_use]
    pub fn oversold(item: &FlashSaleItem) -> Self {
        Self::InvariantViolation {
            item_id: item.id,
            detail: format!(
                "stock_sold {} exceeds stock_allocated {}",
                item.stock_sold, item.stock_allocated
            ),
        }
    }

    /// Build the violation for a release larger than the sold count.
    #[must_use]
    pub fn release_underflow(item_id: FlashSaleItemId, stock_sold: u32, quantity: u32) -> Self {
        Self::InvariantViolation {
            item_id,
            detail: format!("releasing {quantity} units would drive stock_sold {stock_sold} negative"),
        }
    }
}

/// A request to claim units of an item for a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Item to claim against
    pub item_id: FlashSaleItemId,
    /// Claiming user
    pub user_id: UserId,
    /// Requested units (positive)
    pub quantity: u32,
    /// Time the claim is evaluated at
    pub now: DateTime<Utc>,
}

/// Result of a direct claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Stock incremented and purchase recorded in one transaction
    Claimed {
        /// `stock_sold` after the increment
        new_sold_count: u32,
        /// The purchase row written with the increment
        purchase: PurchaseRecord,
    },
    /// Nothing was written
    Rejected(Rejection),
}

/// Result of taking a reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock incremented and pending reservation written in one transaction
    Reserved {
        /// `stock_sold` after the increment
        new_sold_count: u32,
        /// The pending reservation
        reservation: Reservation,
    },
    /// Nothing was written
    Rejected(Rejection),
}

/// A reservation whose units went back to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleasedReservation {
    /// Released reservation
    pub reservation_id: ReservationId,
    /// Item the units returned to
    pub item_id: FlashSaleItemId,
    /// Former holder
    pub user_id: UserId,
    /// Units returned
    pub quantity: u32,
    /// Terminal status the reservation moved to
    pub status: ReservationStatus,
    /// `stock_sold` right after this release
    pub new_sold_count: u32,
}

/// Result of finalizing a reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Reservation finalized and purchase recorded
    Finalized(PurchaseRecord),
    /// The hold had lapsed; it was released instead of finalized
    Expired(ReleasedReservation),
    /// The reservation already left `Pending`
    AlreadySettled(ReservationStatus),
    /// No reservation with that identifier
    NotFound,
}

/// Result of cancelling a reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Reservation cancelled and its units returned
    Released(ReleasedReservation),
    /// The reservation already left `Pending`
    AlreadySettled(ReservationStatus),
    /// No reservation with that identifier
    NotFound,
}

/// Durable record of allocated vs. sold units, reservations and purchases.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every request
/// worker and the expiry sweeper.
///
/// # Dyn Compatibility
///
/// Methods return [`LedgerFuture`] instead of using `async fn` so the ledger can be
/// held as `Arc<dyn StockLedger>`.
pub trait StockLedger: Send + Sync {
    /// Read an item row without locking.
    ///
    /// The result is a snapshot that may be stale immediately; use it for display and
    /// fast-path validation only.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the read fails.
    fn load_item(&self, item_id: FlashSaleItemId) -> LedgerFuture<'_, Option<FlashSaleItem>>;

    /// Units a user currently holds or has bought for an item.
    ///
    /// Sum of purchase record quantities plus pending reservation quantities. Read
    /// without locking.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the read fails.
    fn user_total(&self, item_id: FlashSaleItemId, user_id: UserId) -> LedgerFuture<'_, u32>;

    /// Atomically claim units and record the purchase.
    ///
    /// Re-checks the sale window and the per-user cap inside the transaction, then
    /// increments `stock_sold` only if `stock_sold + quantity <= stock_allocated` holds
    /// at write time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure or if the row is found inconsistent.
    /// On error nothing was written.
    fn try_claim(&self, request: ClaimRequest) -> LedgerFuture<'_, ClaimOutcome>;

    /// Atomically claim units as a pending reservation lapsing at `expires_at`.
    ///
    /// Same guards as [`StockLedger::try_claim`]; writes a reservation instead of a
    /// purchase record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure or if the row is found inconsistent.
    fn reserve(
        &self,
        request: ClaimRequest,
        expires_at: DateTime<Utc>,
    ) -> LedgerFuture<'_, ReserveOutcome>;

    /// Convert a pending reservation into a firm sale.
    ///
    /// A pending reservation already past `expires_at` is released instead.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure. On error nothing was written.
    fn finalize(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> LedgerFuture<'_, FinalizeOutcome>;

    /// Cancel a pending reservation and return its units.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure, or `InvariantViolation` if the
    /// release would drive `stock_sold` negative. On error nothing was written.
    fn cancel(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> LedgerFuture<'_, CancelOutcome>;

    /// Release up to `limit` pending reservations with `expires_at <= now`.
    ///
    /// Each released reservation moves to `Expired` and returns its quantity exactly
    /// once. Reservations of items in `skip_items` are neither selected nor counted
    /// against `limit`; they stay pending. Returns the reservations released by this
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure, or `InvariantViolation` naming the
    /// item whose release would drive `stock_sold` negative. On error nothing was
    /// written.
    fn release_expired<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: u32,
        skip_items: &'a [FlashSaleItemId],
    ) -> LedgerFuture<'a, Vec<ReleasedReservation>>;
}
