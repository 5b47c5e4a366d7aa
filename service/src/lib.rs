//! # Flash Sale Service
//!
//! Process wiring for the flash-sale engine: environment configuration, the
//! `PostgreSQL` pool and ledger, and the lifecycle of the expiry sweeper.
//!
//! The `flash-sale-sweeper` binary runs the sweeper on its own. Request workers embed
//! [`Resources`] and call [`Resources::engine`].

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod resources;

pub use config::{Config, ConfigError};
pub use error::ServiceError;
pub use resources::Resources;
