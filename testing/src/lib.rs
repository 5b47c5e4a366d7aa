//! # Flash Sale Testing
//!
//! Testing utilities and helpers for the flash-sale engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryStockLedger`]: a `StockLedger` with the same semantics as the
//!   `PostgreSQL` backend, plus fault injection
//! - Fixture helpers and proptest strategies
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_testing::{InMemoryStockLedger, ManualClock, helpers};
//!
//! #[tokio::test]
//! async fn sells_out() {
//!     let clock = ManualClock::new(helpers::sale_start());
//!     let ledger = InMemoryStockLedger::new();
//!     let item = ledger.create_item(helpers::flash_sale(10, 2));
//!     // drive the engine, then inspect ledger.item(item.id)
//! }
//! ```

use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;

pub mod in_memory;

pub use in_memory::InMemoryStockLedger;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flash_sale_testing::mocks::FixedClock;
    /// use flash_sale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle and give another to
    /// the engine or sweeper.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward by `by`
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::helpers::epoch())
    }
}

/// Test helpers and fixtures
pub mod helpers {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use flash_sale_core::{NewFlashSaleItem, ProductId, SaleWindow};

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Start of the default fixture sale: one hour after [`epoch`].
    #[must_use]
    pub fn sale_start() -> DateTime<Utc> {
        epoch() + Duration::hours(1)
    }

    /// Default fixture window: two hours starting at [`sale_start`].
    #[must_use]
    pub fn sale_window() -> SaleWindow {
        SaleWindow::new(sale_start(), sale_start() + Duration::hours(2))
    }

    /// A flash-sale item with the default window.
    #[must_use]
    pub fn flash_sale(stock_allocated: u32, max_per_user: u32) -> NewFlashSaleItem {
        flash_sale_in(stock_allocated, max_per_user, sale_window())
    }

    /// A flash-sale item with an explicit window.
    #[must_use]
    pub fn flash_sale_in(
        stock_allocated: u32,
        max_per_user: u32,
        window: SaleWindow,
    ) -> NewFlashSaleItem {
        NewFlashSaleItem {
            product_id: ProductId::new(),
            sale_price_cents: 99_000,
            stock_allocated,
            max_per_user,
            window,
        }
    }

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One claim attempt: `(user index, quantity)`.
    pub type ClaimAttempt = (usize, u32);

    /// Sequences of claim attempts spread over `users` users, each for
    /// `1..=max_quantity` units.
    pub fn claim_attempts(
        users: usize,
        max_quantity: u32,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<ClaimAttempt>> {
        prop::collection::vec((0..users, 1..=max_quantity), 1..=max_len)
    }

    /// Item shapes as `(stock_allocated, max_per_user)`.
    pub fn item_shape() -> impl Strategy<Value = (u32, u32)> {
        (1u32..40, 1u32..8)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1, helpers::epoch());
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(helpers::epoch());
        let handle = clock.clone();
        handle.advance(chrono::Duration::minutes(15));
        assert_eq!(clock.now(), helpers::epoch() + chrono::Duration::minutes(15));

        clock.set(helpers::sale_start());
        assert_eq!(handle.now(), helpers::sale_start());
    }

    #[test]
    fn fixture_window_opens_after_epoch() {
        let window = helpers::sale_window();
        assert!(!window.is_open_at(helpers::epoch()));
        assert!(window.is_open_at(helpers::sale_start()));
    }
}
