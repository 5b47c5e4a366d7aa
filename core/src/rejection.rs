//! Business rejections.
//!
//! These are expected, frequent outcomes during a flash sale, not failures. They are
//! returned as values, never logged as errors, and carry the storefront copy shown to
//! the shopper at the moment of the attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a purchase or reservation attempt was turned down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rejection {
    /// Current time is outside `[start_time, end_time)`
    SaleNotActive,
    /// Not enough allocated units left for the requested quantity
    StockExhausted,
    /// The user's running total plus this request would exceed `max_per_user`
    PerUserLimitExceeded,
    /// Requested quantity was zero
    InvalidQuantity,
    /// No flash-sale item with that identifier
    ItemNotFound,
}

impl Rejection {
    /// Stable label for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SaleNotActive => "sale_not_active",
            Self::StockExhausted => "stock_exhausted",
            Self::PerUserLimitExceeded => "per_user_limit_exceeded",
            Self::InvalidQuantity => "invalid_quantity",
            Self::ItemNotFound => "item_not_found",
        }
    }

    /// Message shown to the shopper.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::SaleNotActive => "Flash sale belum dimulai atau sudah berakhir",
            Self::StockExhausted => "Stok habis",
            Self::PerUserLimitExceeded => "Batas pembelian tercapai",
            Self::InvalidQuantity => "Jumlah pembelian tidak valid",
            Self::ItemNotFound => "Produk flash sale tidak ditemukan",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storefront_copy_for_core_rejections() {
        assert_eq!(Rejection::StockExhausted.user_message(), "Stok habis");
        assert_eq!(
            Rejection::PerUserLimitExceeded.user_message(),
            "Batas pembelian tercapai"
        );
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(Rejection::SaleNotActive.to_string(), "sale_not_active");
        assert_eq!(Rejection::ItemNotFound.as_str(), "item_not_found");
    }
}
