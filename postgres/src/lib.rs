//! `PostgreSQL` stock ledger for the flash-sale engine.
//!
//! This crate provides [`PostgresStockLedger`], which implements the `StockLedger` trait
//! from `flash-sale-core` on top of sqlx. It supports:
//!
//! - Claims as a row lock plus conditional update inside one transaction
//! - Pending reservations, finalization and cancellation
//! - A `SKIP LOCKED` expiry sweep that releases each hold exactly once
//! - Classification of sqlx errors into retryable and non-retryable failures
//!
//! # Example
//!
//! ```ignore
//! use flash_sale_postgres::PostgresStockLedger;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/shop").await?;
//!     let ledger = PostgresStockLedger::new(pool);
//!     ledger.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod ledger;

pub use ledger::{DEFAULT_LOCK_TIMEOUT, PostgresStockLedger};
