//! Property and failure-injection tests for the flash-sale engine.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use chrono::Duration;
use flash_sale_core::{CancelOutcome, FinalizeOutcome, ReservationStatus, StockLedger, UserId};
use flash_sale_runtime::{
    EngineConfig, ExpirySweeper, FlashSaleEngine, FlashSaleEnvironment, PurchaseResult,
    ReservationResult, SweeperConfig,
};
use flash_sale_testing::{InMemoryStockLedger, ManualClock, helpers, properties};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn setup(config: EngineConfig) -> (FlashSaleEngine, InMemoryStockLedger, ManualClock) {
    let ledger = InMemoryStockLedger::new();
    let clock = ManualClock::new(helpers::sale_start());
    let env = FlashSaleEnvironment::new(Arc::new(clock.clone()), Arc::new(ledger.clone()));
    (FlashSaleEngine::new(env, config), ledger, clock)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of claims keeps both caps and matches the purchase records.
    #[test]
    fn claims_never_exceed_allocation_or_cap(
        (allocated, cap) in properties::item_shape(),
        attempts in properties::claim_attempts(5, 4, 40),
    ) {
        let (engine, ledger, _) = setup(EngineConfig::default());
        let item = ledger.create_item(helpers::flash_sale(allocated, cap));
        let users: Vec<UserId> = (0..5).map(|_| UserId::new()).collect();

        let rt = runtime();
        let mut claimed_by: HashMap<UserId, u32> = HashMap::new();
        for (user_idx, quantity) in attempts {
            let user = users[user_idx];
            let result = rt.block_on(engine.attempt_flash_sale_purchase(item.id, user, quantity));
            if let PurchaseResult::Claimed { .. } = result {
                *claimed_by.entry(user).or_default() += quantity;
            }
            prop_assert!(!matches!(result, PurchaseResult::StorageError(_)));
        }

        let row = ledger.item(item.id).unwrap();
        prop_assert!(row.stock_sold <= allocated);
        prop_assert_eq!(row.stock_sold, claimed_by.values().sum::<u32>());
        for total in claimed_by.values() {
            prop_assert!(*total <= cap);
        }
        let recorded: u32 = ledger.purchases(item.id).iter().map(|p| p.quantity).sum();
        prop_assert_eq!(recorded, row.stock_sold);
    }
}

#[tokio::test]
async fn test_failed_claim_writes_nothing() {
    let (engine, ledger, _) = setup(EngineConfig::default());
    let item = ledger.create_item(helpers::flash_sale(5, 5));
    let user = UserId::new();

    // Pre-check reads succeed; the claim itself fails.
    ledger.inject_write_failures(1);
    let result = engine.attempt_flash_sale_purchase(item.id, user, 1).await;
    assert!(matches!(result, PurchaseResult::StorageError(ref e) if e.is_retryable()));

    // A failing pre-check read never reaches the ledger write.
    ledger.inject_failures(1);
    let result = engine.attempt_flash_sale_purchase(item.id, user, 1).await;
    assert!(matches!(result, PurchaseResult::StorageError(ref e) if e.is_retryable()));

    assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);
    assert!(ledger.purchases(item.id).is_empty());
    assert_eq!(ledger.user_total(item.id, user).await.unwrap(), 0);
}

#[tokio::test]
async fn test_retry_once_recovers_from_single_transient_failure() {
    let (engine, ledger, _) = setup(EngineConfig::default().with_retry_transient_once(true));
    let item = ledger.create_item(helpers::flash_sale(5, 5));
    let user = UserId::new();

    ledger.inject_write_failures(1);
    let result = engine.attempt_flash_sale_purchase(item.id, user, 1).await;
    assert!(matches!(result, PurchaseResult::Claimed { new_sold_count: 1, .. }));

    // Two failures in a row outlast the single retry.
    ledger.inject_write_failures(2);
    let result = engine.attempt_flash_sale_purchase(item.id, user, 1).await;
    assert!(matches!(result, PurchaseResult::StorageError(ref e) if e.is_retryable()));

    assert_eq!(ledger.item(item.id).unwrap().stock_sold, 1);
    assert_eq!(ledger.purchases(item.id).len(), 1);
}

#[tokio::test]
async fn test_expired_hold_is_released_exactly_once() {
    let config = EngineConfig::default().with_reservation_ttl(Duration::minutes(15));
    let (engine, ledger, clock) = setup(config);
    let item = ledger.create_item(helpers::flash_sale(4, 4));
    let user = UserId::new();

    let ReservationResult::Reserved(reservation) = engine.begin_reservation(item.id, user, 3).await
    else {
        panic!("expected reservation");
    };
    assert_eq!(ledger.item(item.id).unwrap().stock_sold, 3);

    // The held units are unavailable to everyone else.
    assert!(matches!(
        engine
            .attempt_flash_sale_purchase(item.id, UserId::new(), 2)
            .await,
        PurchaseResult::Rejected(_)
    ));

    clock.advance(Duration::minutes(15));
    let env = FlashSaleEnvironment::new(Arc::new(clock.clone()), Arc::new(ledger.clone()));
    let (sweeper, _shutdown) = ExpirySweeper::new(env, SweeperConfig::default());

    let (swept, finalized, cancelled) = tokio::join!(
        sweeper.sweep_once(),
        engine.finalize_reservation(reservation.id),
        engine.cancel_reservation(reservation.id),
    );
    let swept = swept.unwrap();
    let finalized = finalized.unwrap();
    let cancelled = cancelled.unwrap();

    let releases = swept
        + usize::from(matches!(finalized, FinalizeOutcome::Expired(_)))
        + usize::from(matches!(cancelled, CancelOutcome::Released(_)));
    assert_eq!(releases, 1, "swept={swept} finalized={finalized:?} cancelled={cancelled:?}");
    assert!(!matches!(finalized, FinalizeOutcome::Finalized(_)));

    assert_eq!(ledger.item(item.id).unwrap().stock_sold, 0);
    assert_ne!(
        ledger.reservation(reservation.id).unwrap().status,
        ReservationStatus::Pending
    );
    assert!(ledger.purchases(item.id).is_empty());
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
}
