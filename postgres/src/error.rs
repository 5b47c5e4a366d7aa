//! Mapping from `sqlx` errors to [`LedgerError`].
//!
//! Anything that guarantees the transaction did not commit and may succeed on a second
//! attempt is transient. Everything else is a plain database error.

use flash_sale_core::LedgerError;
use std::time::Duration;

/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";
/// `lock_not_available`, raised when `lock_timeout` fires
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `query_canceled`, raised when `statement_timeout` fires
const QUERY_CANCELED: &str = "57014";
/// Class 08: connection exception
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Classify a `sqlx` error raised before or during a transaction body.
///
/// `lock_timeout` is reported back in [`LedgerError::Timeout`] when Postgres gave up
/// waiting for a row lock.
pub(crate) fn classify(context: &str, error: &sqlx::Error, lock_timeout: Duration) -> LedgerError {
    match error {
        sqlx::Error::PoolTimedOut => {
            LedgerError::Transient(format!("{context}: connection pool timed out"))
        }
        sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => LedgerError::Transient(format!("{context}: {error}")),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                metrics::counter!("flash_sale_lock_timeouts_total").increment(1);
                tracing::debug!(context, "row lock wait exceeded lock_timeout");
                LedgerError::Timeout(lock_timeout)
            }
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | QUERY_CANCELED) => {
                LedgerError::Transient(format!("{context}: {error}"))
            }
            Some(code) if code.starts_with(CONNECTION_EXCEPTION_CLASS) => {
                LedgerError::Transient(format!("{context}: {error}"))
            }
            _ => LedgerError::Database(format!("{context}: {error}")),
        },
        _ => LedgerError::Database(format!("{context}: {error}")),
    }
}

/// Classify a failed `COMMIT`.
///
/// The server may have applied the commit before the connection dropped, so the
/// outcome is unknown and the error is never retryable.
pub(crate) fn commit_failed(error: &sqlx::Error) -> LedgerError {
    LedgerError::Database(format!("commit outcome unknown: {error}"))
}

/// Error for a column value that does not fit the domain type.
pub(crate) fn out_of_range(column: &str, value: i64) -> LedgerError {
    LedgerError::Database(format!("{column} out of range: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_retryable() {
        let err = classify("claim", &sqlx::Error::PoolTimedOut, Duration::from_secs(2));
        assert!(err.is_retryable());
    }

    #[test]
    fn io_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = classify("claim", &sqlx::Error::Io(io), Duration::from_secs(2));
        assert!(matches!(err, LedgerError::Transient(_)));
    }

    #[test]
    fn decode_errors_are_not_retryable() {
        let err = classify(
            "load item",
            &sqlx::Error::ColumnNotFound("stock_sold".to_string()),
            Duration::from_secs(2),
        );
        assert!(matches!(err, LedgerError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn commit_failures_are_never_retried() {
        assert!(!commit_failed(&sqlx::Error::PoolClosed).is_retryable());
    }
}
