//! In-memory stock ledger for fast, deterministic testing.
//!
//! Every operation runs its check-and-apply under one mutex guard, which gives the same
//! all-or-nothing behaviour the `PostgreSQL` backend gets from a transaction with a row
//! lock. Use [`InMemoryStockLedger::inject_failures`] to exercise the transient-error
//! paths.

use chrono::{DateTime, Utc};
use flash_sale_core::{
    CancelOutcome, ClaimOutcome, ClaimRequest, Eligibility, FinalizeOutcome, FlashSaleItem,
    FlashSaleItemId, LedgerError, LedgerFuture, NewFlashSaleItem, PurchaseId, PurchaseRecord,
    Rejection, ReleasedReservation, Reservation, ReservationId, ReservationStatus,
    ReservationValidator, ReserveOutcome, StockLedger, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct LedgerState {
    items: HashMap<FlashSaleItemId, FlashSaleItem>,
    reservations: HashMap<ReservationId, Reservation>,
    purchases: Vec<PurchaseRecord>,
}

impl LedgerState {
    fn user_total(&self, item_id: FlashSaleItemId, user_id: UserId) -> u32 {
        let purchased: u32 = self
            .purchases
            .iter()
            .filter(|p| p.item_id == item_id && p.user_id == user_id)
            .map(|p| p.quantity)
            .sum();
        let held: u32 = self
            .reservations
            .values()
            .filter(|r| {
                r.item_id == item_id && r.user_id == user_id && r.status == ReservationStatus::Pending
            })
            .map(|r| r.quantity)
            .sum();
        purchased + held
    }

    /// Validate and apply the conditional increment. Returns the new sold count.
    fn claim_units(&mut self, request: &ClaimRequest) -> Result<Result<u32, Rejection>, LedgerError> {
        let user_total = self.user_total(request.item_id, request.user_id);
        let Some(item) = self.items.get_mut(&request.item_id) else {
            return Ok(Err(Rejection::ItemNotFound));
        };

        if let Eligibility::Rejected(reason) =
            ReservationValidator::new().check(item, user_total, request.quantity, request.now)?
        {
            return Ok(Err(reason));
        }

        match item
            .stock_sold
            .checked_add(request.quantity)
            .filter(|sold| *sold <= item.stock_allocated)
        {
            Some(new_sold) => {
                item.stock_sold = new_sold;
                Ok(Ok(new_sold))
            }
            None => Ok(Err(Rejection::StockExhausted)),
        }
    }

    /// Move a pending reservation to a terminal release status and return its units.
    fn release(
        &mut self,
        reservation_id: ReservationId,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<ReleasedReservation, LedgerError> {
        let reservation = self
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| LedgerError::Database(format!("reservation {reservation_id} vanished")))?;

        let item = self.items.get_mut(&reservation.item_id).ok_or_else(|| {
            LedgerError::Database(format!(
                "reservation {reservation_id} references unknown item {}",
                reservation.item_id
            ))
        })?;

        let new_sold = item
            .stock_sold
            .checked_sub(reservation.quantity)
            .ok_or_else(|| {
                LedgerError::release_underflow(item.id, item.stock_sold, reservation.quantity)
            })?;
        item.stock_sold = new_sold;

        if let Some(r) = self.reservations.get_mut(&reservation_id) {
            r.status = status;
            r.settled_at = Some(now);
        }

        Ok(ReleasedReservation {
            reservation_id,
            item_id: reservation.item_id,
            user_id: reservation.user_id,
            quantity: reservation.quantity,
            status,
            new_sold_count: new_sold,
        })
    }
}

/// In-memory `StockLedger`.
///
/// Clones share the same underlying state.
///
/// # Example
///
/// ```
/// use flash_sale_testing::{InMemoryStockLedger, helpers};
///
/// let ledger = InMemoryStockLedger::new();
/// let item = ledger.create_item(helpers::flash_sale(10, 2));
/// assert_eq!(ledger.item(item.id).map(|i| i.stock_sold), Some(0));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStockLedger {
    state: Arc<Mutex<LedgerState>>,
    pending_failures: Arc<AtomicU32>,
    pending_write_failures: Arc<AtomicU32>,
}

impl InMemoryStockLedger {
    /// Create a new empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` ledger calls fail with a transient error before touching
    /// any state.
    pub fn inject_failures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` mutating calls fail with a transient error, leaving reads
    /// untouched. Lets a test fail the claim itself after the pre-check reads succeed.
    pub fn inject_write_failures(&self, count: u32) {
        self.pending_write_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Result<(), LedgerError> {
        consume_one(&self.pending_failures)
    }

    fn take_injected_write_failure(&self) -> Result<(), LedgerError> {
        self.take_injected_failure()?;
        consume_one(&self.pending_write_failures)
    }

    /// Insert a new item with `stock_sold = 0`.
    pub fn create_item(&self, item: NewFlashSaleItem) -> FlashSaleItem {
        let item = item.into_item(FlashSaleItemId::new());
        self.lock().items.insert(item.id, item.clone());
        item
    }

    /// Overwrite `stock_sold`, bypassing every guard.
    ///
    /// Only for tests that need a corrupted row.
    pub fn set_stock_sold(&self, item_id: FlashSaleItemId, stock_sold: u32) {
        if let Some(item) = self.lock().items.get_mut(&item_id) {
            item.stock_sold = stock_sold;
        }
    }

    /// Current item row
    #[must_use]
    pub fn item(&self, item_id: FlashSaleItemId) -> Option<FlashSaleItem> {
        self.lock().items.get(&item_id).cloned()
    }

    /// Current reservation row
    #[must_use]
    pub fn reservation(&self, reservation_id: ReservationId) -> Option<Reservation> {
        self.lock().reservations.get(&reservation_id).cloned()
    }

    /// All purchase records for an item, in commit order
    #[must_use]
    pub fn purchases(&self, item_id: FlashSaleItemId) -> Vec<PurchaseRecord> {
        self.lock()
            .purchases
            .iter()
            .filter(|p| p.item_id == item_id)
            .cloned()
            .collect()
    }

    /// All reservations for an item with the given status
    #[must_use]
    pub fn reservations_with_status(
        &self,
        item_id: FlashSaleItemId,
        status: ReservationStatus,
    ) -> Vec<Reservation> {
        self.lock()
            .reservations
            .values()
            .filter(|r| r.item_id == item_id && r.status == status)
            .cloned()
            .collect()
    }

    fn try_claim_now(&self, request: ClaimRequest) -> Result<ClaimOutcome, LedgerError> {
        self.take_injected_write_failure()?;
        let mut state = self.lock();

        let new_sold_count = match state.claim_units(&request)? {
            Ok(sold) => sold,
            Err(reason) => return Ok(ClaimOutcome::Rejected(reason)),
        };

        let purchase = PurchaseRecord {
            id: PurchaseId::new(),
            item_id: request.item_id,
            user_id: request.user_id,
            quantity: request.quantity,
            purchased_at: request.now,
            reservation_id: None,
        };
        state.purchases.push(purchase.clone());

        Ok(ClaimOutcome::Claimed {
            new_sold_count,
            purchase,
        })
    }

    fn reserve_now(
        &self,
        request: ClaimRequest,
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome, LedgerError> {
        self.take_injected_write_failure()?;
        let mut state = self.lock();

        let new_sold_count = match state.claim_units(&request)? {
            Ok(sold) => sold,
            Err(reason) => return Ok(ReserveOutcome::Rejected(reason)),
        };

        let reservation = Reservation {
            id: ReservationId::new(),
            item_id: request.item_id,
            user_id: request.user_id,
            quantity: request.quantity,
            status: ReservationStatus::Pending,
            created_at: request.now,
            expires_at,
            settled_at: None,
        };
        state
            .reservations
            .insert(reservation.id, reservation.clone());

        Ok(ReserveOutcome::Reserved {
            new_sold_count,
            reservation,
        })
    }

    fn finalize_now(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, LedgerError> {
        self.take_injected_write_failure()?;
        let mut state = self.lock();

        let Some(reservation) = state.reservations.get(&reservation_id).cloned() else {
            return Ok(FinalizeOutcome::NotFound);
        };
        if reservation.status.is_terminal() {
            return Ok(FinalizeOutcome::AlreadySettled(reservation.status));
        }
        if reservation.is_expired_at(now) {
            let released = state.release(reservation_id, ReservationStatus::Expired, now)?;
            return Ok(FinalizeOutcome::Expired(released));
        }

        if let Some(r) = state.reservations.get_mut(&reservation_id) {
            r.status = ReservationStatus::Finalized;
            r.settled_at = Some(now);
        }
        let purchase = PurchaseRecord {
            id: PurchaseId::new(),
            item_id: reservation.item_id,
            user_id: reservation.user_id,
            quantity: reservation.quantity,
            purchased_at: now,
            reservation_id: Some(reservation_id),
        };
        state.purchases.push(purchase.clone());

        Ok(FinalizeOutcome::Finalized(purchase))
    }

    fn cancel_now(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, LedgerError> {
        self.take_injected_write_failure()?;
        let mut state = self.lock();

        let Some(status) = state.reservations.get(&reservation_id).map(|r| r.status) else {
            return Ok(CancelOutcome::NotFound);
        };
        if status.is_terminal() {
            return Ok(CancelOutcome::AlreadySettled(status));
        }

        let released = state.release(reservation_id, ReservationStatus::Cancelled, now)?;
        Ok(CancelOutcome::Released(released))
    }

    fn release_expired_now(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        skip_items: &[FlashSaleItemId],
    ) -> Result<Vec<ReleasedReservation>, LedgerError> {
        self.take_injected_write_failure()?;
        let mut state = self.lock();

        let mut due: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Pending && r.is_expired_at(now))
            .filter(|r| !skip_items.contains(&r.item_id))
            .collect();
        due.sort_by_key(|r| (r.expires_at, r.id));
        due.truncate(limit as usize);
        let due: Vec<ReservationId> = due.into_iter().map(|r| r.id).collect();

        // Verify every release before applying any, so a bad row aborts the whole batch.
        let mut returning: HashMap<FlashSaleItemId, u32> = HashMap::new();
        for id in &due {
            if let Some(r) = state.reservations.get(id) {
                *returning.entry(r.item_id).or_default() += r.quantity;
            }
        }
        for (item_id, quantity) in &returning {
            let sold = state.items.get(item_id).map_or(0, |i| i.stock_sold);
            if sold < *quantity {
                return Err(LedgerError::release_underflow(*item_id, sold, *quantity));
            }
        }

        due.into_iter()
            .map(|id| state.release(id, ReservationStatus::Expired, now))
            .collect()
    }
}

fn consume_one(counter: &AtomicU32) -> Result<(), LedgerError> {
    let consumed = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if consumed.is_ok() {
        return Err(LedgerError::Transient("injected failure".to_string()));
    }
    Ok(())
}

impl StockLedger for InMemoryStockLedger {
    fn load_item(&self, item_id: FlashSaleItemId) -> LedgerFuture<'_, Option<FlashSaleItem>> {
        Box::pin(async move {
            self.take_injected_failure()?;
            Ok(self.item(item_id))
        })
    }

    fn user_total(&self, item_id: FlashSaleItemId, user_id: UserId) -> LedgerFuture<'_, u32> {
        Box::pin(async move {
            self.take_injected_failure()?;
            Ok(self.lock().user_total(item_id, user_id))
        })
    }

    fn try_claim(&self, request: ClaimRequest) -> LedgerFuture<'_, ClaimOutcome> {
        Box::pin(async move { self.try_claim_now(request) })
    }

    fn reserve(
        &self,
        request: ClaimRequest,
        expires_at: DateTime<Utc>,
    ) -> LedgerFuture<'_, ReserveOutcome> {
        Box::pin(async move { self.reserve_now(request, expires_at) })
    }

    fn finalize(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> LedgerFuture<'_, FinalizeOutcome> {
        Box::pin(async move { self.finalize_now(reservation_id, now) })
    }

    fn cancel(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> LedgerFuture<'_, CancelOutcome> {
        Box::pin(async move { self.cancel_now(reservation_id, now) })
    }

    fn release_expired<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: u32,
        skip_items: &'a [FlashSaleItemId],
    ) -> LedgerFuture<'a, Vec<ReleasedReservation>> {
        Box::pin(async move { self.release_expired_now(now, limit, skip_items) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::helpers::{flash_sale, sale_start};
    use chrono::Duration;

    fn claim(item_id: FlashSaleItemId, user_id: UserId, quantity: u32) -> ClaimRequest {
        ClaimRequest {
            item_id,
            user_id,
            quantity,
            now: sale_start(),
        }
    }

    #[tokio::test]
    async fn claim_increments_and_records_purchase() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(5, 3));
        let user = UserId::new();

        let outcome = ledger.try_claim(claim(item.id, user, 2)).await.unwrap();
        let ClaimOutcome::Claimed {
            new_sold_count,
            purchase,
        } = outcome
        else {
            panic!("expected claim, got {outcome:?}");
        };
        assert_eq!(new_sold_count, 2);
        assert_eq!(purchase.quantity, 2);
        assert_eq!(ledger.purchases(item.id), vec![purchase]);
        assert_eq!(ledger.user_total(item.id, user).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rejected_claim_writes_nothing() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(1, 5));

        let outcome = ledger.try_claim(claim(item.id, UserId::new(), 2)).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Rejected(Rejection::StockExhausted));
        assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);
        assert!(ledger.purchases(item.id).is_empty());
    }

    #[tokio::test]
    async fn unknown_item_is_rejected() {
        let ledger = InMemoryStockLedger::new();
        let outcome = ledger
            .try_claim(claim(FlashSaleItemId::new(), UserId::new(), 1))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Rejected(Rejection::ItemNotFound));
    }

    #[tokio::test]
    async fn injected_failure_leaves_state_untouched() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(5, 5));
        ledger.inject_failures(1);

        let err = ledger.try_claim(claim(item.id, UserId::new(), 1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);

        // Next call goes through
        assert!(matches!(
            ledger.try_claim(claim(item.id, UserId::new(), 1)).await.unwrap(),
            ClaimOutcome::Claimed { .. }
        ));
    }

    #[tokio::test]
    async fn write_failures_spare_reads() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(5, 5));
        ledger.inject_write_failures(1);

        assert!(ledger.load_item(item.id).await.unwrap().is_some());
        assert!(ledger.try_claim(claim(item.id, UserId::new(), 1)).await.is_err());
        assert!(ledger.try_claim(claim(item.id, UserId::new(), 1)).await.is_ok());
    }

    #[tokio::test]
    async fn pending_reservations_count_against_cap() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(10, 2));
        let user = UserId::new();
        let expires = sale_start() + Duration::minutes(15);

        assert!(matches!(
            ledger.reserve(claim(item.id, user, 2), expires).await.unwrap(),
            ReserveOutcome::Reserved { new_sold_count: 2, .. }
        ));
        assert_eq!(
            ledger.try_claim(claim(item.id, user, 1)).await.unwrap(),
            ClaimOutcome::Rejected(Rejection::PerUserLimitExceeded)
        );
    }

    #[tokio::test]
    async fn finalize_after_expiry_releases_once() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(10, 5));
        let expires = sale_start() + Duration::minutes(15);
        let ReserveOutcome::Reserved { reservation, .. } = ledger
            .reserve(claim(item.id, UserId::new(), 3), expires)
            .await
            .unwrap()
        else {
            panic!("expected reservation");
        };

        let outcome = ledger.finalize(reservation.id, expires).await.unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Expired(ref r) if r.quantity == 3));
        assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);

        // The sweeper finds nothing left to release
        let released = ledger
            .release_expired(expires + Duration::minutes(1), 100, &[])
            .await
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);
    }

    #[tokio::test]
    async fn release_expired_respects_limit_and_order() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(10, 10));
        let user = UserId::new();
        for minutes in [3, 1, 2] {
            ledger
                .reserve(claim(item.id, user, 1), sale_start() + Duration::minutes(minutes))
                .await
                .unwrap();
        }

        let now = sale_start() + Duration::minutes(10);
        let first = ledger.release_expired(now, 2, &[]).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].new_sold_count, 1);

        let second = ledger.release_expired(now, 2, &[]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].new_sold_count, 0);
    }

    #[tokio::test]
    async fn underflowing_release_aborts_whole_batch() {
        let ledger = InMemoryStockLedger::new();
        let item = ledger.create_item(flash_sale(10, 10));
        let expires = sale_start() + Duration::minutes(5);
        ledger
            .reserve(claim(item.id, UserId::new(), 4), expires)
            .await
            .unwrap();
        ledger.set_stock_sold(item.id, 1);

        let err = ledger.release_expired(expires, 10, &[]).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
        assert_eq!(
            ledger
                .reservations_with_status(item.id, ReservationStatus::Pending)
                .len(),
            1
        );
        assert_eq!(ledger.item(item.id).unwrap().stock_sold, 1);
    }

    #[tokio::test]
    async fn skipped_items_stay_pending_and_free_the_batch() {
        let ledger = InMemoryStockLedger::new();
        let broken = ledger.create_item(flash_sale(10, 10));
        let healthy = ledger.create_item(flash_sale(10, 10));
        let expires = sale_start() + Duration::minutes(5);
        ledger
            .reserve(claim(broken.id, UserId::new(), 4), expires - Duration::minutes(1))
            .await
            .unwrap();
        ledger
            .reserve(claim(healthy.id, UserId::new(), 4), expires)
            .await
            .unwrap();
        ledger.set_stock_sold(broken.id, 1);

        let released = ledger.release_expired(expires, 1, &[broken.id]).await.unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].item_id, healthy.id);
        assert_eq!(ledger.item(healthy.id).unwrap().stock_sold, 0);
        assert_eq!(ledger.item(broken.id).unwrap().stock_sold, 1);
        assert_eq!(
            ledger
                .reservations_with_status(broken.id, ReservationStatus::Pending)
                .len(),
            1
        );
    }
}
