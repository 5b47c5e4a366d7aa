//! Domain types for flash-sale stock reservation.
//!
//! Identifiers, the ledger row ([`FlashSaleItem`]), short-lived holds
//! ([`Reservation`]) and firm sales ([`PurchaseRecord`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for one product's participation in one flash sale
    FlashSaleItemId
}

uuid_id! {
    /// Unique identifier for a catalog product
    ProductId
}

uuid_id! {
    /// Unique identifier for a storefront user
    UserId
}

uuid_id! {
    /// Unique identifier for a reservation (temporary hold)
    ReservationId
}

uuid_id! {
    /// Unique identifier for a purchase record
    PurchaseId
}

// ============================================================================
// Sale window
// ============================================================================

/// Half-open time window `[start_time, end_time)` during which a sale accepts claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// First instant at which claims are accepted
    pub start_time: DateTime<Utc>,
    /// First instant at which claims are no longer accepted
    pub end_time: DateTime<Utc>,
}

impl SaleWindow {
    /// Creates a new window.
    #[must_use]
    pub const fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Whether `now` falls inside `[start_time, end_time)`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    /// Phase of the sale relative to `now`.
    #[must_use]
    pub fn phase_at(&self, now: DateTime<Utc>) -> SalePhase {
        if now < self.start_time {
            SalePhase::Upcoming
        } else if now < self.end_time {
            SalePhase::Active
        } else {
            SalePhase::Ended
        }
    }
}

/// Where a sale is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalePhase {
    /// Before `start_time`
    Upcoming,
    /// Inside the window
    Active,
    /// At or after `end_time`
    Ended,
}

// ============================================================================
// Ledger row
// ============================================================================

/// One product's participation in one flash sale: the Stock Ledger row.
///
/// `stock_allocated`, `max_per_user` and the window are fixed configuration once the
/// sale starts. `stock_sold` counts firm sales plus pending reservations and must stay
/// within `0..=stock_allocated`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashSaleItem {
    /// Item identifier
    pub id: FlashSaleItemId,
    /// Product being sold
    pub product_id: ProductId,
    /// Sale price in minor currency units
    pub sale_price_cents: i64,
    /// Total units assignable during the sale
    pub stock_allocated: u32,
    /// Units held or sold so far
    pub stock_sold: u32,
    /// Maximum units any single user may hold or buy
    pub max_per_user: u32,
    /// When the sale accepts claims
    pub window: SaleWindow,
}

impl FlashSaleItem {
    /// Units still available. Saturates at zero for a corrupted row.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.stock_allocated.saturating_sub(self.stock_sold)
    }

    /// Whether the row satisfies `stock_sold <= stock_allocated`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.stock_sold <= self.stock_allocated
    }

    /// Best-effort display snapshot of this row.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> StockSnapshot {
        StockSnapshot {
            item_id: self.id,
            stock_allocated: self.stock_allocated,
            stock_sold: self.stock_sold,
            remaining: self.remaining(),
            phase: self.window.phase_at(now),
            observed_at: now,
        }
    }
}

/// Admin-supplied fields for a new flash-sale item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlashSaleItem {
    /// Product being sold
    pub product_id: ProductId,
    /// Sale price in minor currency units
    pub sale_price_cents: i64,
    /// Total units assignable during the sale
    pub stock_allocated: u32,
    /// Maximum units per user
    pub max_per_user: u32,
    /// Sale window
    pub window: SaleWindow,
}

impl NewFlashSaleItem {
    /// Materialize the ledger row with `stock_sold = 0`.
    #[must_use]
    pub const fn into_item(self, id: FlashSaleItemId) -> FlashSaleItem {
        FlashSaleItem {
            id,
            product_id: self.product_id,
            sale_price_cents: self.sale_price_cents,
            stock_allocated: self.stock_allocated,
            stock_sold: 0,
            max_per_user: self.max_per_user,
            window: self.window,
        }
    }
}

/// Unsynchronized view of a ledger row for display ("3 left!").
///
/// May be stale the moment it is returned; never use it to decide a claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    /// Item identifier
    pub item_id: FlashSaleItemId,
    /// Total allocation
    pub stock_allocated: u32,
    /// Held or sold units at read time
    pub stock_sold: u32,
    /// Remaining units at read time
    pub remaining: u32,
    /// Sale phase at read time
    pub phase: SalePhase,
    /// When the snapshot was taken
    pub observed_at: DateTime<Utc>,
}

// ============================================================================
// Reservations
// ============================================================================

/// Status of a reservation.
///
/// Only `Pending` is active. Every other status is terminal and reached at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Holding stock, waiting for payment
    Pending,
    /// Converted into a firm sale
    Finalized,
    /// Released by expiry
    Expired,
    /// Released by explicit cancellation
    Cancelled,
}

impl ReservationStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Finalized => "finalized",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "finalized" => Some(Self::Finalized),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A temporary claim on units pending payment.
///
/// Its quantity is counted in [`FlashSaleItem::stock_sold`] while `Pending`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Item the units are held against
    pub item_id: FlashSaleItemId,
    /// Owning user
    pub user_id: UserId,
    /// Held units
    pub quantity: u32,
    /// Current status
    pub status: ReservationStatus,
    /// When the hold was taken
    pub created_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
    /// When the status left `Pending`
    pub settled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Whether the hold has lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ============================================================================
// Purchases
// ============================================================================

/// One firm unit-claim by a user against an item. Never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Purchase identifier
    pub id: PurchaseId,
    /// Item purchased
    pub item_id: FlashSaleItemId,
    /// Buyer
    pub user_id: UserId,
    /// Units purchased
    pub quantity: u32,
    /// Commit time
    pub purchased_at: DateTime<Utc>,
    /// Reservation this purchase finalized, if any
    pub reservation_id: Option<ReservationId>,
}
