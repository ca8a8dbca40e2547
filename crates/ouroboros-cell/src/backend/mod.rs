//! Backend adapters.
//!
//! A backend translates [`Statement`]s into its engine's native operations
//! and owns all connection state. The store holds one `Arc<dyn Backend>` and
//! never serializes calls itself; any locking is the backend's business.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::codec::parse_timestamp;
use crate::config::StoreConfig;
use crate::statement::Statement;
use crate::{Cell, CellError, Result};

pub use memory::MemoryBackend;
#[cfg(feature = "postgres")]
pub use postgres::{PoolConfig, PostgresBackend, RetryConfig};

/// One persisted `cell` row, in fixed column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub added_at: i64,
    pub row_key: String,
    pub column_name: String,
    pub ref_key: i64,
    pub body: Vec<u8>,
    /// Stored text; parsed by [`RawRow::into_cell`]
    pub created_at: String,
}

impl RawRow {
    /// Map the row into a [`Cell`].
    ///
    /// # Errors
    ///
    /// `CorruptRecord` when `created_at` is not in the fixed format. The row
    /// is never coerced.
    pub fn into_cell(self) -> Result<Cell> {
        let created_at = match parse_timestamp(&self.created_at) {
            Ok(ts) => ts,
            Err(e) => {
                return Err(CellError::CorruptRecord {
                    row_key: self.row_key,
                    column_name: self.column_name,
                    ref_key: self.ref_key,
                    reason: format!("created_at '{}' unparsable: {}", self.created_at, e),
                })
            }
        };

        Ok(Cell {
            row_key: self.row_key,
            column_name: self.column_name,
            ref_key: self.ref_key,
            body: self.body,
            added_at: self.added_at,
            created_at: Some(created_at),
        })
    }
}

/// Result of one write statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// Insertion sequence assigned to the new row, when the engine reports it
    pub last_insert_id: Option<i64>,
    /// Per-statement failure; a failed statement leaves no trace
    pub error: Option<CellError>,
}

impl WriteOutcome {
    pub fn applied(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
            error: None,
        }
    }

    pub fn failed(error: CellError) -> Self {
        Self {
            rows_affected: 0,
            last_insert_id: None,
            error: Some(error),
        }
    }
}

/// Trait for storage backend implementations
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Short backend name for logs (e.g. "memory", "postgres")
    fn name(&self) -> &'static str;

    /// Execute a read expected to return zero or one row
    async fn query_one(&self, statement: &Statement) -> Result<Option<RawRow>>;

    /// Execute reads expected to return zero or more rows each
    async fn query_many(&self, statements: &[Statement]) -> Result<Vec<Vec<RawRow>>>;

    /// Execute mutating statements, each atomically
    async fn write(&self, statements: &[Statement]) -> Result<Vec<WriteOutcome>>;

    /// Re-establish the session identified by `key`
    async fn reset_connection(&self, key: &str) -> Result<()>;

    /// Release the handle; ephemeral backends discard their data
    async fn close(&self) -> Result<()>;
}

/// Open a backend handle for the configured address.
///
/// - `memory://...` opens an ephemeral [`MemoryBackend`]
/// - `postgres://...` / `postgresql://...` opens a [`PostgresBackend`]
///   (feature `postgres`)
pub async fn open_backend(config: &StoreConfig) -> Result<Arc<dyn Backend>> {
    config.validate()?;

    let scheme = config
        .address
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| {
            CellError::Configuration(format!(
                "Address '{}' has no scheme",
                config.address
            ))
        })?;

    match scheme.as_str() {
        "memory" => {
            info!(backend = "memory", "Opening backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => {
            info!(backend = "postgres", "Opening backend");
            let backend = PostgresBackend::connect(config, PoolConfig::default()).await?;
            backend.ensure_schema().await?;
            Ok(Arc::new(backend))
        }
        other => Err(CellError::Configuration(format!(
            "Unsupported backend scheme: '{}'. Available schemes: {}",
            other,
            available_schemes().join(", ")
        ))),
    }
}

/// Returns the address schemes supported by the compiled features.
#[allow(clippy::vec_init_then_push)] // Conditional compilation requires this pattern
pub fn available_schemes() -> Vec<&'static str> {
    let mut schemes = vec!["memory"];

    #[cfg(feature = "postgres")]
    {
        schemes.push("postgres");
        schemes.push("postgresql");
    }

    schemes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(created_at: &str) -> RawRow {
        RawRow {
            added_at: 4,
            row_key: "user:1".to_string(),
            column_name: "email".to_string(),
            ref_key: 2,
            body: b"b@x.com".to_vec(),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_into_cell() {
        let cell = raw("2024-02-03T04:05:06Z").into_cell().unwrap();
        assert_eq!(cell.added_at, 4);
        assert_eq!(cell.ref_key, 2);
        assert_eq!(cell.body_str(), Some("b@x.com"));
        assert_eq!(cell.created_at_text().as_deref(), Some("2024-02-03T04:05:06Z"));
    }

    #[test]
    fn test_into_cell_corrupt() {
        let err = raw("2024-02-03 04:05:06").into_cell().unwrap_err();
        match err {
            CellError::CorruptRecord {
                row_key,
                column_name,
                ref_key,
                ..
            } => {
                assert_eq!(row_key, "user:1");
                assert_eq!(column_name, "email");
                assert_eq!(ref_key, 2);
            }
            other => panic!("Expected CorruptRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_write_outcome_constructors() {
        let ok = WriteOutcome::applied(1, Some(9));
        assert_eq!(ok.rows_affected, 1);
        assert!(ok.error.is_none());

        let failed = WriteOutcome::failed(CellError::ConstraintViolation("dup".to_string()));
        assert_eq!(failed.rows_affected, 0);
        assert!(failed.error.unwrap().is_constraint_violation());
    }

    #[test]
    fn test_available_schemes() {
        let schemes = available_schemes();
        assert!(schemes.contains(&"memory"));
        #[cfg(feature = "postgres")]
        assert!(schemes.contains(&"postgres"));
    }

    #[tokio::test]
    async fn test_open_memory_backend() {
        let config = StoreConfig {
            address: "memory://test".to_string(),
            ..Default::default()
        };
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[tokio::test]
    async fn test_open_unknown_scheme() {
        let config = StoreConfig {
            address: "cassandra://localhost:9042".to_string(),
            ..Default::default()
        };
        let err = open_backend(&config).await.err().unwrap();
        assert!(matches!(err, CellError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_open_without_scheme() {
        let config = StoreConfig {
            address: "localhost".to_string(),
            ..Default::default()
        };
        let err = open_backend(&config).await.err().unwrap();
        assert!(matches!(err, CellError::Configuration(_)));
    }
}
