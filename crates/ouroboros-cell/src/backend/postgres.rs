//! PostgreSQL backend using SQLx's pool.
//!
//! Statements are bound with `PgArguments`; no literal is ever interpolated.
//! Connection establishment retries with exponential backoff, statements do
//! not (retry policy belongs to the caller).

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Arguments, Row as SqlxRow};
use tracing::{debug, info, instrument, warn};

use super::{Backend, RawRow, WriteOutcome};
use crate::config::{ConsistencyLevel, StoreConfig};
use crate::statement::{BindValue, Statement};
use crate::{CellError, Result};

const CREATE_TABLE_SQL: &str = r#"CREATE TABLE IF NOT EXISTS cell (
    added_at BIGSERIAL PRIMARY KEY,
    row_key TEXT NOT NULL,
    column_name TEXT NOT NULL,
    ref_key BIGINT NOT NULL,
    body BYTEA NOT NULL,
    created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS"Z"'),
    UNIQUE (row_key, column_name, ref_key)
)"#;

const CREATE_CREATED_AT_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS cell_created_at_idx ON cell (created_at, added_at)";

/// Backoff used while opening the pool.
///
/// Only the first connection is retried, so a store pointed at a server that
/// is still starting up can come up with it. Statements are never retried;
/// a failed put or read goes straight back to the caller.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Pause before the first retry
    pub first_delay: Duration,
    /// Upper bound for any single pause
    pub max_delay: Duration,
    /// Growth factor between consecutive pauses
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fail on the first unsuccessful connect.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            first_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Pause before retry number `retry` (0 is the first retry), capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.first_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Pool acquire timeout in seconds
    pub acquire_timeout: u64,
    /// Idle timeout in seconds
    pub idle_timeout: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: 30,
            idle_timeout: Some(600), // 10 minutes
            retry: RetryConfig::default(),
        }
    }
}

/// Session settings derived from the store configuration.
///
/// Consistency maps to `synchronous_commit`. No server-side statement
/// timeout is set: deadlines belong to the caller's `OpContext`.
pub fn session_options(config: &StoreConfig) -> Vec<(&'static str, &'static str)> {
    let synchronous_commit = match config.consistency {
        ConsistencyLevel::None => "off",
        ConsistencyLevel::Weak => "local",
        ConsistencyLevel::Strong => "on",
    };
    vec![("synchronous_commit", synchronous_commit)]
}

fn bind_statement(statement: &Statement) -> Result<PgArguments> {
    let mut args = PgArguments::default();
    for param in statement.params() {
        let bound = match param {
            BindValue::Text(v) => args.add(v),
            BindValue::BigInt(v) => args.add(v),
            BindValue::Bytes(v) => args.add(v),
        };
        bound.map_err(|e| {
            CellError::Backend(format!("Failed to bind {} parameter: {}", statement.op(), e))
        })?;
    }
    Ok(args)
}

fn raw_row(row: &PgRow) -> Result<RawRow> {
    Ok(RawRow {
        added_at: row.try_get("added_at")?,
        row_key: row.try_get("row_key")?,
        column_name: row.try_get("column_name")?,
        ref_key: row.try_get("ref_key")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

/// PostgreSQL backend
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresBackend {
    /// Creates a connection pool for `config.address`, with retry.
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid address, `BackendUnavailable` if the
    /// server cannot be reached after all retries.
    #[instrument(skip(config), fields(
        consistency = %config.consistency,
        max_connections = pool_config.max_connections,
        max_retries = pool_config.retry.max_retries
    ))]
    pub async fn connect(config: &StoreConfig, pool_config: PoolConfig) -> Result<Self> {
        if config.address.is_empty() {
            return Err(CellError::Configuration(
                "Connection URI cannot be empty".to_string(),
            ));
        }

        info!("Initializing connection pool");

        let mut pool_options = PgPoolOptions::new()
            .min_connections(pool_config.min_connections)
            .max_connections(pool_config.max_connections)
            .acquire_timeout(Duration::from_secs(pool_config.acquire_timeout));

        if let Some(idle_timeout_secs) = pool_config.idle_timeout {
            pool_options = pool_options.idle_timeout(Duration::from_secs(idle_timeout_secs));
        }

        let connect_options = PgConnectOptions::from_str(&config.address)
            .map_err(|e| CellError::Configuration(format!("Invalid connection URI: {}", e)))?
            .options(session_options(config));

        let pool = Self::connect_with_retry(pool_options, connect_options, &pool_config.retry)
            .await?;

        info!("Connection pool initialized successfully");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn connect_with_retry(
        pool_options: PgPoolOptions,
        connect_options: PgConnectOptions,
        retry: &RetryConfig,
    ) -> Result<PgPool> {
        let mut attempt = 0u32;
        loop {
            let err = match pool_options.clone().connect_with(connect_options.clone()).await {
                Ok(pool) => {
                    if attempt > 0 {
                        info!(retries = attempt, "Cell store connected after retrying");
                    }
                    return Ok(pool);
                }
                Err(e) => e,
            };

            if attempt >= retry.max_retries {
                warn!(retries = attempt, error = %err, "Giving up on cell store connection");
                return Err(CellError::from(err));
            }

            let delay = retry.delay_for_attempt(attempt);
            warn!(
                retry = attempt + 1,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Cell store connection failed"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Create the `cell` table and its scan index if missing.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_CREATED_AT_INDEX_SQL)
            .execute(&self.pool)
            .await?;
        debug!("Cell schema ensured");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<RawRow>> {
        let args = bind_statement(statement)?;
        let rows = sqlx::query_with(statement.sql(), args)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(raw_row).collect()
    }

    async fn insert(&self, statement: &Statement) -> WriteOutcome {
        if !statement.is_write() {
            return WriteOutcome::failed(CellError::Backend(format!(
                "read statement {} passed to a write",
                statement.op()
            )));
        }

        let args = match bind_statement(statement) {
            Ok(args) => args,
            Err(e) => return WriteOutcome::failed(e),
        };

        match sqlx::query_with(statement.sql(), args)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get::<i64, _>("added_at"))
        {
            Ok(added_at) => WriteOutcome::applied(1, Some(added_at)),
            Err(e) => WriteOutcome::failed(CellError::from(e)),
        }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn query_one(&self, statement: &Statement) -> Result<Option<RawRow>> {
        let args = bind_statement(statement)?;
        let row = sqlx::query_with(statement.sql(), args)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(raw_row).transpose()
    }

    async fn query_many(&self, statements: &[Statement]) -> Result<Vec<Vec<RawRow>>> {
        try_join_all(statements.iter().map(|stmt| self.fetch_all(stmt))).await
    }

    async fn write(&self, statements: &[Statement]) -> Result<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            outcomes.push(self.insert(statement).await);
        }
        Ok(outcomes)
    }

    async fn reset_connection(&self, key: &str) -> Result<()> {
        // The pool replaces broken connections itself; verify it can serve.
        debug!(key = key, "Verifying pool connectivity");
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Connection pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CursorValue, Dimension};

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, 30);
        assert_eq!(config.idle_timeout, Some(600));
    }

    #[test]
    fn test_no_retry_never_waits() {
        let retry = RetryConfig::no_retry();
        assert_eq!(retry.max_retries, 0);
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(7), Duration::ZERO);
    }

    #[test]
    fn test_backoff_grows_then_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            first_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(300),
            multiplier: 3.0,
        };

        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(150));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(retry.delay_for_attempt(u32::MAX), Duration::from_millis(300));
    }

    #[test]
    fn test_session_options_follow_consistency() {
        let mut config = StoreConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        };

        config.consistency = ConsistencyLevel::Strong;
        assert_eq!(session_options(&config), vec![("synchronous_commit", "on")]);

        config.consistency = ConsistencyLevel::Weak;
        assert_eq!(session_options(&config), vec![("synchronous_commit", "local")]);

        config.consistency = ConsistencyLevel::None;
        assert_eq!(session_options(&config), vec![("synchronous_commit", "off")]);
    }

    #[test]
    fn test_session_options_leave_deadlines_to_the_client() {
        let config = StoreConfig {
            timeout: Duration::from_millis(1),
            ..Default::default()
        };
        assert!(session_options(&config)
            .iter()
            .all(|(name, _)| *name != "statement_timeout"));
    }

    #[test]
    fn test_bind_statement() {
        let put = Statement::PutCell {
            row_key: "r".to_string(),
            column_name: "c".to_string(),
            ref_key: 1,
            body: b"x".to_vec(),
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
        };
        assert!(bind_statement(&put).is_ok());

        let scan = Statement::PartitionScan {
            dimension: Dimension::AddedAt,
            cursor: CursorValue::Sequence(0),
            limit: 10,
        };
        assert!(bind_statement(&scan).is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_address() {
        let config = StoreConfig {
            address: String::new(),
            ..Default::default()
        };
        let err = PostgresBackend::connect(&config, PoolConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CellError::Configuration(_)));
    }
}
