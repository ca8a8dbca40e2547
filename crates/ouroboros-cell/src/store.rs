//! The cell store: validated, observable access to a backend.
//!
//! `CellStore` owns no mutable state besides the destroyed flag. Clones share
//! the same backend handle and may be used concurrently; operations never
//! wait on each other at this level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use crate::backend::{open_backend, Backend, RawRow};
use crate::codec::{canonical_timestamp, normalize_cursor, validate_key, Cursor, Dimension};
use crate::config::StoreConfig;
use crate::context::OpContext;
use crate::observer::{StoreEvent, StoreObserver, TracingObserver};
use crate::statement::Statement;
use crate::{Cell, CellError, Result};

/// One page of a partition scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub dimension: Dimension,
    /// Ascending on `dimension`
    pub cells: Vec<Cell>,
    /// False only when no cell matched
    pub found: bool,
}

impl ScanPage {
    /// Cursor seeding the next call: the largest dimension value in the page.
    pub fn next_cursor(&self) -> Option<Cursor> {
        let last = match self.dimension {
            Dimension::AddedAt => self.cells.iter().max_by_key(|c| c.added_at),
            Dimension::CreatedAt => self
                .cells
                .iter()
                .max_by_key(|c| (c.created_at, c.added_at)),
        };
        last.and_then(|cell| cell.dimension_value(self.dimension))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Versioned, append-only cell store over an injected backend.
#[derive(Clone)]
pub struct CellStore {
    backend: Arc<dyn Backend>,
    config: Arc<StoreConfig>,
    observer: Arc<dyn StoreObserver>,
    destroyed: Arc<AtomicBool>,
}

impl std::fmt::Debug for CellStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellStore")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("destroyed", &self.destroyed.load(Ordering::Acquire))
            .finish()
    }
}

impl CellStore {
    /// Create a store over an already opened backend.
    ///
    /// # Errors
    ///
    /// `Configuration` if the config does not validate.
    pub fn new(backend: Arc<dyn Backend>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config: Arc::new(config),
            observer: Arc::new(TracingObserver),
            destroyed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open the backend named by `config.address` and wrap it.
    #[instrument(skip(config), fields(address = %config.address, consistency = %config.consistency))]
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let backend = open_backend(&config).await?;
        info!(backend = backend.name(), "Cell store opened");
        Self::new(backend, config)
    }

    /// Replace the observer (default: [`TracingObserver`]).
    pub fn with_observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Exact lookup of one version.
    ///
    /// Returns `Ok(None)` when no cell has this identity.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` for an empty or NUL-containing key
    /// - `CorruptRecord` if the stored `created_at` is unparsable
    #[instrument(skip(self, ctx), fields(backend = self.backend.name()))]
    pub async fn get_cell(
        &self,
        ctx: &OpContext,
        row_key: &str,
        column_name: &str,
        ref_key: i64,
    ) -> Result<Option<Cell>> {
        const OP: &str = "get_cell";
        self.guard(OP, || {
            validate_key("row_key", row_key)?;
            validate_key("column_name", column_name)
        })?;

        let statement = Statement::GetCell {
            row_key: row_key.to_string(),
            column_name: column_name.to_string(),
            ref_key,
        };
        self.read_one(ctx, statement).await
    }

    /// The version with the highest `ref_key` for a pair.
    ///
    /// Returns `Ok(None)` when the pair has no cells.
    #[instrument(skip(self, ctx), fields(backend = self.backend.name()))]
    pub async fn get_cell_latest(
        &self,
        ctx: &OpContext,
        row_key: &str,
        column_name: &str,
    ) -> Result<Option<Cell>> {
        const OP: &str = "get_cell_latest";
        self.guard(OP, || {
            validate_key("row_key", row_key)?;
            validate_key("column_name", column_name)
        })?;

        let statement = Statement::GetCellLatest {
            row_key: row_key.to_string(),
            column_name: column_name.to_string(),
        };
        self.read_one(ctx, statement).await
    }

    /// Cells strictly after `cursor` on `dimension`, ascending, at most `limit`.
    ///
    /// `dimension` is one of `createdAt`, `timestamp` (alias of `createdAt`)
    /// or `addedAt`. Request errors are reported before any backend call.
    ///
    /// # Errors
    ///
    /// - `UnknownDimension`, `UnsupportedCursorType`, `InvalidCursor`, `InvalidLimit`
    /// - `CorruptRecord` if any returned row is corrupt; the whole page is dropped
    pub async fn partition_scan(
        &self,
        ctx: &OpContext,
        dimension: &str,
        cursor: Cursor,
        limit: i64,
    ) -> Result<ScanPage> {
        let dimension = self.guard("partition_scan", || dimension.parse::<Dimension>())?;
        self.partition_scan_dimension(ctx, dimension, &cursor, limit)
            .await
    }

    /// [`CellStore::partition_scan`] with an already parsed dimension.
    #[instrument(skip(self, ctx), fields(backend = self.backend.name()))]
    pub async fn partition_scan_dimension(
        &self,
        ctx: &OpContext,
        dimension: Dimension,
        cursor: &Cursor,
        limit: i64,
    ) -> Result<ScanPage> {
        const OP: &str = "partition_scan";
        let cursor = self.guard(OP, || {
            if limit < 1 {
                return Err(CellError::InvalidLimit(limit));
            }
            normalize_cursor(dimension, cursor)
        })?;

        let statement = Statement::PartitionScan {
            dimension,
            cursor,
            limit,
        };
        let mut cells = self.read_many(ctx, statement).await?;

        // The statement orders ascending; keep the page ordered whatever the
        // backend did with ties.
        match dimension {
            Dimension::AddedAt => cells.sort_by_key(|c| c.added_at),
            Dimension::CreatedAt => cells.sort_by_key(|c| (c.created_at, c.added_at)),
        }

        let found = !cells.is_empty();
        Ok(ScanPage {
            dimension,
            cells,
            found,
        })
    }

    /// Append one version of (`row_key`, `column_name`) under `ref_key`.
    ///
    /// Identity comes from the arguments; only `body` and `created_at` are
    /// taken from `cell`. Picking a fresh `ref_key` is the caller's job.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` for an empty or NUL-containing key
    /// - `InvalidTimestamp` if `created_at` falls outside years 0000-9999
    /// - `ConstraintViolation` if the identity triple already exists. The
    ///   existing cell is left untouched and nothing is retried.
    #[instrument(skip(self, ctx, cell), fields(backend = self.backend.name(), body_len = cell.body.len()))]
    pub async fn put_cell(
        &self,
        ctx: &OpContext,
        row_key: &str,
        column_name: &str,
        ref_key: i64,
        cell: &Cell,
    ) -> Result<()> {
        const OP: &str = "put_cell";
        let created_at = self.guard(OP, || {
            validate_key("row_key", row_key)?;
            validate_key("column_name", column_name)?;
            cell.created_at
                .as_ref()
                .map(|ts| {
                    canonical_timestamp(ts).ok_or_else(|| {
                        CellError::InvalidTimestamp(format!(
                            "created_at {} is outside years 0000-9999",
                            ts
                        ))
                    })
                })
                .transpose()
        })?;

        let statement = Statement::PutCell {
            row_key: row_key.to_string(),
            column_name: column_name.to_string(),
            ref_key,
            body: cell.body.clone(),
            created_at,
        };

        self.emit_request(&statement);
        let start = Instant::now();
        let result = ctx
            .run(
                Some(self.config.timeout),
                self.backend.write(std::slice::from_ref(&statement)),
            )
            .await
            .and_then(|outcomes| {
                let outcome = outcomes.into_iter().next().ok_or_else(|| {
                    CellError::Backend("write returned no outcome".to_string())
                })?;
                if let Some(error) = outcome.error {
                    return Err(error);
                }
                if outcome.rows_affected != 1 {
                    return Err(CellError::Backend(format!(
                        "expected 1 row affected, got {}",
                        outcome.rows_affected
                    )));
                }
                Ok(())
            });

        self.finish(OP, start, result.as_ref().map(|_| 1));
        result
    }

    /// Reset the backend session identified by `key`.
    ///
    /// A no-op for backends whose durability does not depend on a handle.
    #[instrument(skip(self, ctx), fields(backend = self.backend.name()))]
    pub async fn reset_connection(&self, ctx: &OpContext, key: &str) -> Result<()> {
        self.guard("reset_connection", || Ok(()))?;
        let result = ctx
            .run(Some(self.config.timeout), self.backend.reset_connection(key))
            .await;
        if let Err(ref error) = result {
            self.emit_error("reset_connection", error);
        }
        result
    }

    /// Release the backend handle. Irreversible.
    ///
    /// Ephemeral backends discard all cells. Every later call on this store,
    /// or any clone of it, fails with `Destroyed`.
    #[instrument(skip(self, ctx), fields(backend = self.backend.name()))]
    pub async fn destroy(&self, ctx: &OpContext) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            self.emit_error("destroy", &CellError::Destroyed);
            return Err(CellError::Destroyed);
        }

        let result = ctx.run(Some(self.config.timeout), self.backend.close()).await;
        match &result {
            Ok(()) => info!("Cell store destroyed"),
            Err(error) => self.emit_error("destroy", error),
        }
        result
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Reject use after destroy and run request validation, reporting
    /// failures to the observer. Nothing here touches the backend.
    fn guard<T>(&self, op: &'static str, check: impl FnOnce() -> Result<T>) -> Result<T> {
        let result = if self.is_destroyed() {
            Err(CellError::Destroyed)
        } else {
            check()
        };
        if let Err(ref error) = result {
            self.emit_error(op, error);
        }
        result
    }

    async fn read_one(&self, ctx: &OpContext, statement: Statement) -> Result<Option<Cell>> {
        self.emit_request(&statement);
        let start = Instant::now();
        let result = ctx
            .run(Some(self.config.timeout), self.backend.query_one(&statement))
            .await
            .and_then(|row| row.map(RawRow::into_cell).transpose());

        self.finish(
            statement.op(),
            start,
            result.as_ref().map(|cell| usize::from(cell.is_some())),
        );
        result
    }

    async fn read_many(&self, ctx: &OpContext, statement: Statement) -> Result<Vec<Cell>> {
        self.emit_request(&statement);
        let start = Instant::now();
        let result = ctx
            .run(
                Some(self.config.timeout),
                self.backend.query_many(std::slice::from_ref(&statement)),
            )
            .await
            .and_then(|results| {
                results
                    .into_iter()
                    .flatten()
                    .map(RawRow::into_cell)
                    .collect::<Result<Vec<_>>>()
            });

        self.finish(statement.op(), start, result.as_ref().map(Vec::len));
        result
    }

    fn emit_request(&self, statement: &Statement) {
        self.observer.on_event(&StoreEvent::Request {
            op: statement.op(),
            statement: statement.display(),
        });
    }

    fn emit_error(&self, op: &'static str, error: &CellError) {
        self.observer.on_event(&StoreEvent::Error {
            op,
            error: error.clone(),
        });
    }

    fn finish(
        &self,
        op: &'static str,
        start: Instant,
        rows: std::result::Result<usize, &CellError>,
    ) {
        match rows {
            Ok(rows) => self.observer.on_event(&StoreEvent::Response {
                op,
                rows,
                elapsed: start.elapsed(),
            }),
            Err(error) => self.emit_error(op, error),
        }
    }
}
