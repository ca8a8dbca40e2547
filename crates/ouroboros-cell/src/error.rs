//! Error types for the cell store.
//!
//! Every backend surfaces the same taxonomy. The store adds classification
//! (request shape, corrupt data, constraint, transport) but never swallows a
//! backend failure and never retries one.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for cell store operations
pub type Result<T> = std::result::Result<T, CellError>;

/// Unified error type for all cell store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    /// Row key or column name rejected by the key codec
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Partition cursor text is empty or not in the fixed timestamp format
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Cursor form does not belong to the requested dimension
    #[error("Unsupported cursor type {form} for dimension {dimension}")]
    UnsupportedCursorType {
        dimension: &'static str,
        form: &'static str,
    },

    /// A created_at that the fixed `YYYY-MM-DDTHH:MM:SSZ` format cannot hold
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Dimension name is not one of createdAt, timestamp, addedAt
    #[error("Unknown partition dimension: {0}")]
    UnknownDimension(String),

    /// Partition scan limit below one
    #[error("Invalid scan limit: {0}")]
    InvalidLimit(i64),

    /// A stored row violates the model contract
    #[error("Corrupt record ({row_key}, {column_name}, {ref_key}): {reason}")]
    CorruptRecord {
        row_key: String,
        column_name: String,
        ref_key: i64,
        reason: String,
    },

    /// The (row_key, column_name, ref_key) triple already exists
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transport or connection level failure
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Any other backend failure, passed through verbatim
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller's cancellation signal fired before the backend answered
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The store was destroyed and can no longer be used
    #[error("Store destroyed")]
    Destroyed,
}

impl CellError {
    /// Returns true if the caller may reasonably retry the same request.
    ///
    /// The store itself never retries; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CellError::BackendUnavailable(_) | CellError::DeadlineExceeded(_)
        )
    }

    /// Returns true if the request itself was malformed.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CellError::InvalidKey(_)
                | CellError::InvalidCursor(_)
                | CellError::InvalidTimestamp(_)
                | CellError::UnsupportedCursorType { .. }
                | CellError::UnknownDimension(_)
                | CellError::InvalidLimit(_)
        )
    }

    /// Returns true if this is a duplicate identity triple
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, CellError::ConstraintViolation(_))
    }
}

// PostgreSQL-specific error conversions (when the postgres feature is enabled)
#[cfg(feature = "postgres")]
impl From<sqlx::Error> for CellError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => CellError::Configuration(err.to_string()),
            Error::Database(db_err) => {
                // See: https://www.postgresql.org/docs/current/errcodes-appendix.html
                if let Some(code) = db_err.code() {
                    let code_str: &str = &code;
                    match code_str {
                        // Unique constraint violation
                        "23505" => return CellError::ConstraintViolation(err.to_string()),
                        // Connection errors (class 08)
                        code if code.starts_with("08") => {
                            return CellError::BackendUnavailable(err.to_string())
                        }
                        // Admin shutdown / crash recovery
                        "57P01" | "57P02" | "57P03" => {
                            return CellError::BackendUnavailable(err.to_string())
                        }
                        _ => {}
                    }
                }
                CellError::Backend(err.to_string())
            }
            Error::Io(_) => CellError::BackendUnavailable(err.to_string()),
            Error::Tls(_) => CellError::BackendUnavailable(err.to_string()),
            Error::Protocol(_) => CellError::BackendUnavailable(err.to_string()),
            Error::PoolTimedOut => {
                CellError::BackendUnavailable("Connection pool timed out".to_string())
            }
            Error::PoolClosed => CellError::BackendUnavailable("Connection pool closed".to_string()),
            _ => CellError::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_constraint() {
        let err = CellError::ConstraintViolation("duplicate key value".to_string());
        assert_eq!(err.to_string(), "Constraint violation: duplicate key value");
    }

    #[test]
    fn test_error_display_unsupported_cursor() {
        let err = CellError::UnsupportedCursorType {
            dimension: "addedAt",
            form: "Instant",
        };
        assert_eq!(
            err.to_string(),
            "Unsupported cursor type Instant for dimension addedAt"
        );
    }

    #[test]
    fn test_error_display_corrupt_record() {
        let err = CellError::CorruptRecord {
            row_key: "user:1".to_string(),
            column_name: "email".to_string(),
            ref_key: 3,
            reason: "bad created_at".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt record (user:1, email, 3): bad created_at"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(CellError::BackendUnavailable("down".to_string()).is_retryable());
        assert!(CellError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(!CellError::ConstraintViolation("dup".to_string()).is_retryable());
        assert!(!CellError::Cancelled.is_retryable());
        assert!(!CellError::UnknownDimension("shard".to_string()).is_retryable());
    }

    #[test]
    fn test_is_caller_error() {
        assert!(CellError::UnknownDimension("x".to_string()).is_caller_error());
        assert!(CellError::InvalidCursor("".to_string()).is_caller_error());
        assert!(CellError::InvalidLimit(0).is_caller_error());
        assert!(CellError::InvalidTimestamp("+10000".to_string()).is_caller_error());
        assert!(!CellError::Backend("boom".to_string()).is_caller_error());
        assert!(!CellError::Destroyed.is_caller_error());
    }

    #[test]
    fn test_is_constraint_violation() {
        assert!(CellError::ConstraintViolation("dup".to_string()).is_constraint_violation());
        assert!(!CellError::Backend("dup".to_string()).is_constraint_violation());
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_from_sqlx_pool_errors() {
        let err: CellError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CellError::BackendUnavailable(_)));

        let err: CellError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, CellError::BackendUnavailable(_)));

        let err: CellError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CellError::Backend(_)));
    }
}
