//! `PostgreSQL` implementation of [`StockLedger`].
//!
//! Every mutating operation runs in one transaction at `READ COMMITTED`:
//!
//! 1. `SET LOCAL lock_timeout` bounds how long the transaction queues on a hot row
//! 2. `SELECT ... FOR UPDATE` locks the item (claims) or the reservation (settlement)
//! 3. The eligibility rules are re-checked against the locked row
//! 4. A conditional `UPDATE` applies the stock change only if its guard still holds
//! 5. The purchase or reservation row is written, then `COMMIT`
//!
//! Lock order is reservation before item everywhere both are taken, and the sweeper
//! touches items in id order, so settlement paths cannot deadlock each other.

use crate::error::{classify, commit_failed, out_of_range};
use chrono::{DateTime, Utc};
use flash_sale_core::{
    CancelOutcome, ClaimOutcome, ClaimRequest, Eligibility, FinalizeOutcome, FlashSaleItem,
    FlashSaleItemId, LedgerError, LedgerFuture, NewFlashSaleItem, ProductId, PurchaseId,
    PurchaseRecord, Rejection, ReleasedReservation, Reservation, ReservationId,
    ReservationStatus, ReservationValidator, ReserveOutcome, SaleWindow, StockLedger, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::time::Duration;

/// Default bound on waiting for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const ITEM_COLUMNS: &str = "id, product_id, sale_price_cents, stock_allocated, stock_sold, \
                            max_per_user, start_time, end_time";

const RESERVATION_COLUMNS: &str =
    "id, item_id, user_id, quantity, status, created_at, expires_at, settled_at";

/// `PostgreSQL`-backed stock ledger.
///
/// Cheap to clone; clones share the connection pool.
///
/// # Example
///
/// ```ignore
/// use flash_sale_postgres::PostgresStockLedger;
/// use std::time::Duration;
///
/// let pool = sqlx::PgPool::connect("postgres://localhost/shop").await?;
/// let ledger = PostgresStockLedger::new(pool).with_lock_timeout(Duration::from_millis(500));
/// ledger.migrate().await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresStockLedger {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStockLedger {
    /// Create a ledger over an existing pool with [`DEFAULT_LOCK_TIMEOUT`].
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set the per-transaction `lock_timeout`.
    ///
    /// `PostgreSQL` takes whole milliseconds and reads `0` as "wait forever", so
    /// anything below one millisecond is raised to one.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = if lock_timeout.as_millis() == 0 {
            Duration::from_millis(1)
        } else {
            lock_timeout
        };
        self
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Insert a new item with `stock_sold = 0`.
    ///
    /// Item setup belongs to the admin workflow; this exists for seeding and tests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the insert fails, including when the window is empty.
    pub async fn create_item(&self, item: NewFlashSaleItem) -> Result<FlashSaleItem, LedgerError> {
        let item = item.into_item(FlashSaleItemId::new());

        sqlx::query(
            r"
            INSERT INTO flash_sale_items
                (id, product_id, sale_price_cents, stock_allocated, stock_sold,
                 max_per_user, start_time, end_time)
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7)
            ",
        )
        .bind(item.id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(item.sale_price_cents)
        .bind(i64::from(item.stock_allocated))
        .bind(i64::from(item.max_per_user))
        .bind(item.window.start_time)
        .bind(item.window.end_time)
        .execute(&self.pool)
        .await
        .map_err(|e| self.classify("create item", &e))?;

        tracing::debug!(item_id = %item.id, stock_allocated = item.stock_allocated, "flash-sale item created");
        Ok(item)
    }

    /// Current reservation row, read without locking.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the read fails.
    pub async fn reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, LedgerError> {
        let query = format!("SELECT {RESERVATION_COLUMNS} FROM flash_sale_reservations WHERE id = $1");
        sqlx::query(&query)
            .bind(reservation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.classify("load reservation", &e))?
            .as_ref()
            .map(reservation_from_row)
            .transpose()
    }

    /// Purchase records for an item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the read fails.
    pub async fn purchases(&self, item_id: FlashSaleItemId) -> Result<Vec<PurchaseRecord>, LedgerError> {
        let rows = sqlx::query(
            r"
            SELECT id, item_id, user_id, quantity, purchased_at, reservation_id
            FROM flash_sale_purchases
            WHERE item_id = $1
            ORDER BY purchased_at, id
            ",
        )
        .bind(item_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.classify("load purchases", &e))?;

        rows.iter().map(purchase_from_row).collect()
    }

    fn classify(&self, context: &str, error: &sqlx::Error) -> LedgerError {
        classify(context, error, self.lock_timeout)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.classify("begin transaction", &e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| self.classify("set lock_timeout", &e))?;

        Ok(tx)
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), LedgerError> {
        tx.commit().await.map_err(|e| commit_failed(&e))
    }

    async fn lock_item(
        &self,
        conn: &mut PgConnection,
        item_id: FlashSaleItemId,
    ) -> Result<Option<FlashSaleItem>, LedgerError> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM flash_sale_items WHERE id = $1 FOR UPDATE");
        sqlx::query(&query)
            .bind(item_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| self.classify("lock item", &e))?
            .as_ref()
            .map(item_from_row)
            .transpose()
    }

    async fn lock_reservation(
        &self,
        conn: &mut PgConnection,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, LedgerError> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM flash_sale_reservations WHERE id = $1 FOR UPDATE"
        );
        sqlx::query(&query)
            .bind(reservation_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| self.classify("lock reservation", &e))?
            .as_ref()
            .map(reservation_from_row)
            .transpose()
    }

    async fn user_total_in(
        &self,
        conn: &mut PgConnection,
        item_id: FlashSaleItemId,
        user_id: UserId,
    ) -> Result<u32, LedgerError> {
        let (total,): (i64,) = sqlx::query_as(
            r"
            SELECT (
                COALESCE((SELECT SUM(quantity) FROM flash_sale_purchases
                          WHERE item_id = $1 AND user_id = $2), 0)
              + COALESCE((SELECT SUM(quantity) FROM flash_sale_reservations
                          WHERE item_id = $1 AND user_id = $2 AND status = 'pending'), 0)
            )::BIGINT
            ",
        )
        .bind(item_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| self.classify("sum user total", &e))?;

        u32::try_from(total).map_err(|_| out_of_range("user total", total))
    }

    /// Lock the item, re-check eligibility, and apply the conditional increment.
    ///
    /// Returns the new sold count, or the rejection. The caller owns the transaction.
    async fn claim_units(
        &self,
        conn: &mut PgConnection,
        request: &ClaimRequest,
    ) -> Result<Result<u32, Rejection>, LedgerError> {
        let Some(item) = self.lock_item(conn, request.item_id).await? else {
            return Ok(Err(Rejection::ItemNotFound));
        };

        let user_total = self.user_total_in(conn, request.item_id, request.user_id).await?;
        if let Eligibility::Rejected(reason) =
            ReservationValidator::new().check(&item, user_total, request.quantity, request.now)?
        {
            return Ok(Err(reason));
        }

        let quantity = i64::from(request.quantity);
        let updated: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE flash_sale_items
            SET stock_sold = stock_sold + $2
            WHERE id = $1 AND stock_sold + $2 <= stock_allocated
            RETURNING stock_sold
            ",
        )
        .bind(request.item_id.as_uuid())
        .bind(quantity)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| self.classify("increment stock_sold", &e))?;

        match updated {
            Some((sold,)) => u32::try_from(sold)
                .map(Ok)
                .map_err(|_| out_of_range("stock_sold", sold)),
            None => Ok(Err(Rejection::StockExhausted)),
        }
    }

    /// Flip a locked pending reservation to `status` and give its units back.
    async fn release_in(
        &self,
        conn: &mut PgConnection,
        reservation: &Reservation,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<ReleasedReservation, LedgerError> {
        let flipped = sqlx::query(
            r"
            UPDATE flash_sale_reservations
            SET status = $2, settled_at = $3
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(reservation.id.as_uuid())
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| self.classify("settle reservation", &e))?;

        if flipped.rows_affected() != 1 {
            return Err(LedgerError::Database(format!(
                "reservation {} left pending while locked",
                reservation.id
            )));
        }

        let new_sold_count =
            self.return_units(conn, reservation.item_id, reservation.quantity).await?;

        Ok(ReleasedReservation {
            reservation_id: reservation.id,
            item_id: reservation.item_id,
            user_id: reservation.user_id,
            quantity: reservation.quantity,
            status,
            new_sold_count,
        })
    }

    /// Guarded decrement of `stock_sold`. Never lets it go negative.
    async fn return_units(
        &self,
        conn: &mut PgConnection,
        item_id: FlashSaleItemId,
        quantity: u32,
    ) -> Result<u32, LedgerError> {
        let updated: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE flash_sale_items
            SET stock_sold = stock_sold - $2
            WHERE id = $1 AND stock_sold >= $2
            RETURNING stock_sold
            ",
        )
        .bind(item_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| self.classify("decrement stock_sold", &e))?;

        if let Some((sold,)) = updated {
            return u32::try_from(sold).map_err(|_| out_of_range("stock_sold", sold));
        }

        let observed: Option<(i64,)> =
            sqlx::query_as("SELECT stock_sold FROM flash_sale_items WHERE id = $1")
                .bind(item_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| self.classify("read stock_sold", &e))?;

        match observed {
            Some((sold,)) => Err(LedgerError::release_underflow(
                item_id,
                u32::try_from(sold).unwrap_or(0),
                quantity,
            )),
            None => Err(LedgerError::Database(format!(
                "reservation references unknown item {item_id}"
            ))),
        }
    }

    async fn insert_purchase(
        &self,
        conn: &mut PgConnection,
        purchase: &PurchaseRecord,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r"
            INSERT INTO flash_sale_purchases
                (id, item_id, user_id, quantity, purchased_at, reservation_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(purchase.id.as_uuid())
        .bind(purchase.item_id.as_uuid())
        .bind(purchase.user_id.as_uuid())
        .bind(i64::from(purchase.quantity))
        .bind(purchase.purchased_at)
        .bind(purchase.reservation_id.map(|id| *id.as_uuid()))
        .execute(&mut *conn)
        .await
        .map_err(|e| self.classify("insert purchase", &e))?;
        Ok(())
    }

    async fn load_item_row(
        &self,
        item_id: FlashSaleItemId,
    ) -> Result<Option<FlashSaleItem>, LedgerError> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM flash_sale_items WHERE id = $1");
        sqlx::query(&query)
            .bind(item_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.classify("load item", &e))?
            .as_ref()
            .map(item_from_row)
            .transpose()
    }

    async fn user_total_now(
        &self,
        item_id: FlashSaleItemId,
        user_id: UserId,
    ) -> Result<u32, LedgerError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| self.classify("acquire connection", &e))?;
        self.user_total_in(&mut conn, item_id, user_id).await
    }

    async fn try_claim_tx(&self, request: ClaimRequest) -> Result<ClaimOutcome, LedgerError> {
        let mut tx = self.begin().await?;

        let new_sold_count = match self.claim_units(&mut tx, &request).await? {
            Ok(sold) => sold,
            Err(reason) => {
                let _ = tx.rollback().await;
                return Ok(ClaimOutcome::Rejected(reason));
            }
        };

        let purchase = PurchaseRecord {
            id: PurchaseId::new(),
            item_id: request.item_id,
            user_id: request.user_id,
            quantity: request.quantity,
            purchased_at: request.now,
            reservation_id: None,
        };
        self.insert_purchase(&mut tx, &purchase).await?;
        Self::commit(tx).await?;

        Ok(ClaimOutcome::Claimed {
            new_sold_count,
            purchase,
        })
    }

    async fn reserve_tx(
        &self,
        request: ClaimRequest,
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome, LedgerError> {
        let mut tx = self.begin().await?;

        let new_sold_count = match self.claim_units(&mut tx, &request).await? {
            Ok(sold) => sold,
            Err(reason) => {
                let _ = tx.rollback().await;
                return Ok(ReserveOutcome::Rejected(reason));
            }
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

        sqlx::query(
            r"
            INSERT INTO flash_sale_reservations
                (id, item_id, user_id, quantity, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            ",
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.item_id.as_uuid())
        .bind(reservation.user_id.as_uuid())
        .bind(i64::from(reservation.quantity))
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify("insert reservation", &e))?;

        Self::commit(tx).await?;

        Ok(ReserveOutcome::Reserved {
            new_sold_count,
            reservation,
        })
    }

    async fn finalize_tx(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, LedgerError> {
        let mut tx = self.begin().await?;

        let Some(reservation) = self.lock_reservation(&mut tx, reservation_id).await? else {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::NotFound);
        };
        if reservation.status.is_terminal() {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::AlreadySettled(reservation.status));
        }

        if reservation.is_expired_at(now) {
            let released = self
                .release_in(&mut tx, &reservation, ReservationStatus::Expired, now)
                .await?;
            Self::commit(tx).await?;
            return Ok(FinalizeOutcome::Expired(released));
        }

        sqlx::query(
            r"
            UPDATE flash_sale_reservations
            SET status = 'finalized', settled_at = $2
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(reservation_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify("finalize reservation", &e))?;

        let purchase = PurchaseRecord {
            id: PurchaseId::new(),
            item_id: reservation.item_id,
            user_id: reservation.user_id,
            quantity: reservation.quantity,
            purchased_at: now,
            reservation_id: Some(reservation_id),
        };
        self.insert_purchase(&mut tx, &purchase).await?;
        Self::commit(tx).await?;

        Ok(FinalizeOutcome::Finalized(purchase))
    }

    async fn cancel_tx(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, LedgerError> {
        let mut tx = self.begin().await?;

        let Some(reservation) = self.lock_reservation(&mut tx, reservation_id).await? else {
            let _ = tx.rollback().await;
            return Ok(CancelOutcome::NotFound);
        };
        if reservation.status.is_terminal() {
            let _ = tx.rollback().await;
            return Ok(CancelOutcome::AlreadySettled(reservation.status));
        }

        let released = self
            .release_in(&mut tx, &reservation, ReservationStatus::Cancelled, now)
            .await?;
        Self::commit(tx).await?;

        Ok(CancelOutcome::Released(released))
    }

    async fn release_expired_tx(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        skip_items: &[FlashSaleItemId],
    ) -> Result<Vec<ReleasedReservation>, LedgerError> {
        let skip_items: Vec<uuid::Uuid> = skip_items.iter().map(|id| *id.as_uuid()).collect();
        let mut tx = self.begin().await?;

        // Rows another sweeper holds are skipped, not waited on.
        let rows = sqlx::query(
            r"
            WITH due AS (
                SELECT id
                FROM flash_sale_reservations
                WHERE status = 'pending'
                  AND expires_at <= $1
                  AND NOT (item_id = ANY($3))
                ORDER BY expires_at, id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE flash_sale_reservations r
            SET status = 'expired', settled_at = $1
            FROM due
            WHERE r.id = due.id
            RETURNING r.id, r.item_id, r.user_id, r.quantity
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .bind(&skip_items)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| self.classify("expire reservations", &e))?;

        let mut expired = rows
            .iter()
            .map(|row| -> Result<_, LedgerError> {
                let quantity: i64 = column(row, "quantity")?;
                Ok((
                    ReservationId::from_uuid(column(row, "id")?),
                    FlashSaleItemId::from_uuid(column(row, "item_id")?),
                    UserId::from_uuid(column(row, "user_id")?),
                    u32::try_from(quantity).map_err(|_| out_of_range("quantity", quantity))?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Item locks in id order.
        expired.sort_by_key(|(reservation_id, item_id, _, _)| (*item_id, *reservation_id));

        let mut released = Vec::with_capacity(expired.len());
        for (reservation_id, item_id, user_id, quantity) in expired {
            let new_sold_count = self.return_units(&mut tx, item_id, quantity).await?;
            released.push(ReleasedReservation {
                reservation_id,
                item_id,
                user_id,
                quantity,
                status: ReservationStatus::Expired,
                new_sold_count,
            });
        }

        Self::commit(tx).await?;
        Ok(released)
    }
}

impl StockLedger for PostgresStockLedger {
    fn load_item(&self, item_id: FlashSaleItemId) -> LedgerFuture<'_, Option<FlashSaleItem>> {
        Box::pin(self.load_item_row(item_id))
    }

    fn user_total(&self, item_id: FlashSaleItemId, user_id: UserId) -> LedgerFuture<'_, u32> {
        Box::pin(self.user_total_now(item_id, user_id))
    }

    fn try_claim(&self, request: ClaimRequest) -> LedgerFuture<'_, ClaimOutcome> {
        Box::pin(self.try_claim_tx(request))
    }

    fn reserve(
        &self,
        request: ClaimRequest,
        expires_at: DateTime<Utc>,
    ) -> LedgerFuture<'_, ReserveOutcome> {
        Box::pin(self.reserve_tx(request, expires_at))
    }

    fn finalize(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> LedgerFuture<'_, FinalizeOutcome> {
        Box::pin(self.finalize_tx(reservation_id, now))
    }

    fn cancel(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> LedgerFuture<'_, CancelOutcome> {
        Box::pin(self.cancel_tx(reservation_id, now))
    }

    fn release_expired<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: u32,
        skip_items: &'a [FlashSaleItemId],
    ) -> LedgerFuture<'a, Vec<ReleasedReservation>> {
        Box::pin(self.release_expired_tx(now, limit, skip_items))
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::Database(format!("Failed to decode {name}: {e}")))
}

fn count_column(row: &PgRow, name: &str) -> Result<u32, LedgerError> {
    let value: i64 = column(row, name)?;
    u32::try_from(value).map_err(|_| out_of_range(name, value))
}

fn item_from_row(row: &PgRow) -> Result<FlashSaleItem, LedgerError> {
    Ok(FlashSaleItem {
        id: FlashSaleItemId::from_uuid(column(row, "id")?),
        product_id: ProductId::from_uuid(column(row, "product_id")?),
        sale_price_cents: column(row, "sale_price_cents")?,
        stock_allocated: count_column(row, "stock_allocated")?,
        stock_sold: count_column(row, "stock_sold")?,
        max_per_user: count_column(row, "max_per_user")?,
        window: SaleWindow::new(column(row, "start_time")?, column(row, "end_time")?),
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, LedgerError> {
    let status: String = column(row, "status")?;
    let status = ReservationStatus::parse(&status)
        .ok_or_else(|| LedgerError::Database(format!("Invalid reservation status: {status}")))?;

    Ok(Reservation {
        id: ReservationId::from_uuid(column(row, "id")?),
        item_id: FlashSaleItemId::from_uuid(column(row, "item_id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        quantity: count_column(row, "quantity")?,
        status,
        created_at: column(row, "created_at")?,
        expires_at: column(row, "expires_at")?,
        settled_at: column(row, "settled_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<PurchaseRecord, LedgerError> {
    let reservation_id: Option<uuid::Uuid> = column(row, "reservation_id")?;
    Ok(PurchaseRecord {
        id: PurchaseId::from_uuid(column(row, "id")?),
        item_id: FlashSaleItemId::from_uuid(column(row, "item_id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        quantity: count_column(row, "quantity")?,
        purchased_at: column(row, "purchased_at")?,
        reservation_id: reservation_id.map(ReservationId::from_uuid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_timeout_is_configurable() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .map(PostgresStockLedger::new);
        let Ok(ledger) = pool else {
            return;
        };
        assert_eq!(ledger.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        let ledger = ledger.with_lock_timeout(Duration::from_millis(250));
        assert_eq!(ledger.lock_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn sub_millisecond_lock_timeout_is_raised() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .map(PostgresStockLedger::new);
        let Ok(ledger) = pool else {
            return;
        };
        for requested in [Duration::ZERO, Duration::from_micros(900)] {
            let ledger = ledger.clone().with_lock_timeout(requested);
            assert_eq!(ledger.lock_timeout, Duration::from_millis(1));
        }
    }
}
