//! Service startup and shutdown errors.

use crate::config::ConfigError;
use flash_sale_core::LedgerError;
use thiserror::Error;

/// Errors that stop the service from starting.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Could not connect to the database
    #[error("Database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    /// Ledger setup failed (migrations)
    #[error("Ledger setup failed: {0}")]
    Ledger(#[from] LedgerError),
}
