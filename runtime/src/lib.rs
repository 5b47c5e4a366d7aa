//! # Flash Sale Runtime
//!
//! Runtime for the flash-sale stock reservation engine.
//!
//! This crate wires the rules from `flash-sale-core` to a [`flash_sale_core::StockLedger`]
//! and runs the background work around it.
//!
//! ## Core Components
//!
//! - **Engine**: [`FlashSaleEngine`], the entry point request workers call
//! - **Sweeper**: [`ExpirySweeper`], the periodic release of lapsed reservations
//! - **Retry**: bounded retry for transient ledger failures
//! - **Metrics**: business metrics and the Prometheus exporter
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_runtime::{EngineConfig, FlashSaleEngine, FlashSaleEnvironment, PurchaseResult};
//!
//! let env = FlashSaleEnvironment::new(Arc::new(SystemClock), Arc::new(ledger));
//! let engine = FlashSaleEngine::new(env, EngineConfig::default());
//!
//! if let PurchaseResult::Claimed { purchase, .. } =
//!     engine.attempt_flash_sale_purchase(item_id, user_id, 1).await
//! {
//!     // create the order line for `purchase`
//! }
//! ```

/// Flash-sale engine and its environment
pub mod engine;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Reservation expiry sweeper
pub mod sweeper;

pub use engine::{
    EngineConfig, FlashSaleEngine, FlashSaleEnvironment, PurchaseResult, ReservationResult,
};
pub use retry::RetryPolicy;
pub use sweeper::{ExpirySweeper, SweeperConfig};
