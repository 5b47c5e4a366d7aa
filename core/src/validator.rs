//! Purchase eligibility rules.
//!
//! [`ReservationValidator::check`] is the one place the three business rules live. The
//! engine calls it on an unlocked snapshot as a cheap pre-check, and both ledger
//! backends call it again on the locked row inside their transaction, so the
//! authoritative decision and the fast path can never disagree about the rules.

use crate::ledger::LedgerError;
use crate::rejection::Rejection;
use crate::types::FlashSaleItem;
use chrono::{DateTime, Utc};

/// Outcome of an eligibility check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    /// All checks passed
    Eligible,
    /// First failing check
    Rejected(Rejection),
}

impl Eligibility {
    /// Whether all checks passed.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Eligibility checks for a flash-sale claim.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReservationValidator;

impl ReservationValidator {
    /// Creates a new `ReservationValidator`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check whether `user_total + quantity` units may be claimed at `now`.
    ///
    /// Checks run in order and stop at the first failure:
    /// 1. quantity is positive (`InvalidQuantity`)
    /// 2. `now` is inside the sale window (`SaleNotActive`)
    /// 3. enough stock remains (`StockExhausted`)
    /// 4. the per-user cap holds (`PerUserLimitExceeded`)
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvariantViolation`] if the row has
    /// `stock_sold > stock_allocated`.
    pub fn check(
        &self,
        item: &FlashSaleItem,
        user_total: u32,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Eligibility, LedgerError> {
        if !item.is_consistent() {
            return Err(LedgerError::oversold(item));
        }

        if quantity == 0 {
            return Ok(Eligibility::Rejected(Rejection::InvalidQuantity));
        }

        if !item.window.is_open_at(now) {
            return Ok(Eligibility::Rejected(Rejection::SaleNotActive));
        }

        if item.remaining() < quantity {
            return Ok(Eligibility::Rejected(Rejection::StockExhausted));
        }

        if u64::from(user_total) + u64::from(quantity) > u64::from(item.max_per_user) {
            return Ok(Eligibility::Rejected(Rejection::PerUserLimitExceeded));
        }

        Ok(Eligibility::Eligible)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{FlashSaleItemId, NewFlashSaleItem, ProductId, SaleWindow};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn item(allocated: u32, sold: u32, cap: u32) -> FlashSaleItem {
        let mut item = NewFlashSaleItem {
            product_id: ProductId::new(),
            sale_price_cents: 10_000,
            stock_allocated: allocated,
            max_per_user: cap,
            window: SaleWindow::new(start(), start() + Duration::hours(2)),
        }
        .into_item(FlashSaleItemId::new());
        item.stock_sold = sold;
        item
    }

    fn during() -> DateTime<Utc> {
        start() + Duration::minutes(30)
    }

    #[test]
    fn eligible_inside_window_with_stock_and_cap() {
        let v = ReservationValidator::new();
        assert_eq!(
            v.check(&item(10, 3, 2), 1, 1, during()).unwrap(),
            Eligibility::Eligible
        );
    }

    #[test]
    fn window_is_checked_before_stock() {
        let v = ReservationValidator::new();
        let sold_out = item(5, 5, 5);
        assert_eq!(
            v.check(&sold_out, 0, 1, start() - Duration::seconds(1)).unwrap(),
            Eligibility::Rejected(Rejection::SaleNotActive)
        );
        assert_eq!(
            v.check(&sold_out, 0, 1, during()).unwrap(),
            Eligibility::Rejected(Rejection::StockExhausted)
        );
    }

    #[test]
    fn end_time_is_exclusive() {
        let v = ReservationValidator::new();
        let it = item(5, 0, 5);
        assert_eq!(
            v.check(&it, 0, 1, it.window.end_time).unwrap(),
            Eligibility::Rejected(Rejection::SaleNotActive)
        );
    }

    #[test]
    fn stock_is_checked_before_cap() {
        let v = ReservationValidator::new();
        assert_eq!(
            v.check(&item(10, 9, 2), 2, 2, during()).unwrap(),
            Eligibility::Rejected(Rejection::StockExhausted)
        );
        assert_eq!(
            v.check(&item(10, 4, 2), 2, 1, during()).unwrap(),
            Eligibility::Rejected(Rejection::PerUserLimitExceeded)
        );
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let v = ReservationValidator::new();
        assert_eq!(
            v.check(&item(10, 0, 2), 0, 0, during()).unwrap(),
            Eligibility::Rejected(Rejection::InvalidQuantity)
        );
    }

    #[test]
    fn oversold_row_is_an_invariant_violation() {
        let v = ReservationValidator::new();
        let result = v.check(&item(3, 4, 2), 0, 1, during());
        assert!(matches!(
            result,
            Err(LedgerError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn cap_arithmetic_does_not_overflow() {
        let v = ReservationValidator::new();
        assert_eq!(
            v.check(&item(u32::MAX, 0, u32::MAX), u32::MAX, 1, during()).unwrap(),
            Eligibility::Rejected(Rejection::PerUserLimitExceeded)
        );
    }

    proptest! {
        #[test]
        fn eligible_implies_both_caps_hold(
            allocated in 0u32..50,
            sold_frac in 0u32..=100,
            cap in 1u32..10,
            user_total in 0u32..12,
            quantity in 0u32..12,
        ) {
            let sold = allocated * sold_frac / 100;
            let it = item(allocated, sold, cap);
            let result = ReservationValidator::new()
                .check(&it, user_total, quantity, during())
                .unwrap();
            if result.is_eligible() {
                prop_assert!(quantity > 0);
                prop_assert!(sold + quantity <= allocated);
                prop_assert!(user_total + quantity <= cap);
            }
        }
    }
}
