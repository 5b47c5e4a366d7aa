//! # Flash Sale Core
//!
//! Core traits and types for flash-sale stock reservation.
//!
//! This crate holds everything that is independent of where stock is stored:
//!
//! - **Types**: the ledger row, reservations and purchase records
//! - **Rejections**: expected business outcomes and their storefront copy
//! - **Validator**: the eligibility rules (window, stock, per-user cap)
//! - **Ledger**: the [`ledger::StockLedger`] trait every backend implements
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! ## Architecture Principles
//!
//! - The storage layer, not application code, decides whether a claim wins
//! - Business rejections are values, storage failures are errors
//! - Dependency injection via traits, so the same rules run against `PostgreSQL` and
//!   an in-memory ledger
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_core::*;
//!
//! async fn buy(ledger: &dyn StockLedger, item_id: FlashSaleItemId, user_id: UserId) {
//!     let request = ClaimRequest { item_id, user_id, quantity: 1, now: Utc::now() };
//!     match ledger.try_claim(request).await {
//!         Ok(ClaimOutcome::Claimed { new_sold_count, .. }) => { /* create order line */ }
//!         Ok(ClaimOutcome::Rejected(reason)) => { /* show reason.user_message() */ }
//!         Err(e) if e.is_retryable() => { /* "please retry" */ }
//!         Err(e) => { /* alert */ }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod ledger;
pub mod rejection;
pub mod types;
pub mod validator;

pub use ledger::{
    CancelOutcome, ClaimOutcome, ClaimRequest, FinalizeOutcome, LedgerError, LedgerFuture,
    ReleasedReservation, ReserveOutcome, StockLedger,
};
pub use rejection::Rejection;
pub use types::{
    FlashSaleItem, FlashSaleItemId, NewFlashSaleItem, ProductId, PurchaseId, PurchaseRecord,
    Reservation, ReservationId, ReservationStatus, SalePhase, SaleWindow, StockSnapshot, UserId,
};
pub use validator::{Eligibility, ReservationValidator};

/// Environment module - Dependency injection traits
///
/// All external dependencies of the engine are abstracted behind traits and injected,
/// so tests can pin time and swap the storage backend.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(sale_start);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
