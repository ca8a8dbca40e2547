//! Embedded, ephemeral backend.
//!
//! Cells live in a `BTreeMap` keyed by identity triple behind a
//! `parking_lot::RwLock`. Insertion sequence assignment happens under the
//! write lock, so `added_at` order is insertion order. Everything is lost
//! on [`Backend::close`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Backend, RawRow, WriteOutcome};
use crate::codec::{format_timestamp, CursorValue, Dimension};
use crate::statement::Statement;
use crate::{CellError, Result};

type CellKey = (String, String, i64);

/// In-memory backend
pub struct MemoryBackend {
    cells: RwLock<BTreeMap<CellKey, RawRow>>,
    sequence: AtomicI64,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(BTreeMap::new()),
            sequence: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored cells
    pub fn len(&self) -> usize {
        self.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.read().is_empty()
    }

    /// Seed a row with its own `added_at`, bypassing statement validation.
    ///
    /// Rows must arrive in insertion order: `added_at` has to be above every
    /// sequence already assigned, otherwise the row is refused with
    /// `ConstraintViolation`. `created_at` is stored as given, which is how
    /// fixtures for unreadable rows are built.
    pub fn insert_raw(&self, row: RawRow) -> Result<()> {
        self.check_open()?;
        let key = (row.row_key.clone(), row.column_name.clone(), row.ref_key);
        let mut cells = self.cells.write();
        if cells.contains_key(&key) {
            return Err(CellError::ConstraintViolation(format!(
                "cell ({}, {}, {}) already exists",
                key.0, key.1, key.2
            )));
        }

        let current = self.sequence.load(Ordering::Acquire);
        if row.added_at <= current {
            return Err(CellError::ConstraintViolation(format!(
                "added_at {} is not above the current sequence {}",
                row.added_at, current
            )));
        }
        // Both writers hold the write lock, so load-then-store cannot race.
        self.sequence.store(row.added_at, Ordering::Release);
        cells.insert(key, row);
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CellError::BackendUnavailable(
                "memory backend closed".to_string(),
            ));
        }
        Ok(())
    }

    fn select(&self, statement: &Statement) -> Result<Vec<RawRow>> {
        let cells = self.cells.read();
        let rows = match statement {
            Statement::GetCell {
                row_key,
                column_name,
                ref_key,
            } => cells
                .get(&(row_key.clone(), column_name.clone(), *ref_key))
                .cloned()
                .into_iter()
                .collect(),
            Statement::GetCellLatest {
                row_key,
                column_name,
            } => {
                let low = (row_key.clone(), column_name.clone(), i64::MIN);
                let high = (row_key.clone(), column_name.clone(), i64::MAX);
                cells
                    .range(low..=high)
                    .next_back()
                    .map(|(_, row)| row.clone())
                    .into_iter()
                    .collect()
            }
            Statement::PartitionScan {
                dimension,
                cursor,
                limit,
            } => scan(&cells, *dimension, cursor, *limit)?,
            Statement::PutCell { .. } => {
                return Err(CellError::Backend(
                    "write statement passed to a read".to_string(),
                ))
            }
        };
        Ok(rows)
    }

    fn insert(&self, statement: &Statement) -> WriteOutcome {
        let (row_key, column_name, ref_key, body, created_at) = match statement {
            Statement::PutCell {
                row_key,
                column_name,
                ref_key,
                body,
                created_at,
            } => (row_key, column_name, *ref_key, body, created_at),
            other => {
                return WriteOutcome::failed(CellError::Backend(format!(
                    "read statement {} passed to a write",
                    other.op()
                )))
            }
        };

        let key = (row_key.clone(), column_name.clone(), ref_key);
        let mut cells = self.cells.write();
        if cells.contains_key(&key) {
            return WriteOutcome::failed(CellError::ConstraintViolation(format!(
                "cell ({}, {}, {}) already exists",
                row_key, column_name, ref_key
            )));
        }

        let added_at = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let created_at = created_at
            .clone()
            .unwrap_or_else(|| format_timestamp(&Utc::now()));

        cells.insert(
            key,
            RawRow {
                added_at,
                row_key: row_key.clone(),
                column_name: column_name.clone(),
                ref_key,
                body: body.clone(),
                created_at,
            },
        );
        debug!(added_at = added_at, "Cell inserted");
        WriteOutcome::applied(1, Some(added_at))
    }
}

fn scan(
    cells: &BTreeMap<CellKey, RawRow>,
    dimension: Dimension,
    cursor: &CursorValue,
    limit: i64,
) -> Result<Vec<RawRow>> {
    let limit = usize::try_from(limit)
        .map_err(|_| CellError::Backend(format!("negative scan limit {}", limit)))?;

    let mut rows: Vec<RawRow> = match (dimension, cursor) {
        (Dimension::AddedAt, CursorValue::Sequence(after)) => cells
            .values()
            .filter(|row| row.added_at > *after)
            .cloned()
            .collect(),
        // The fixed format sorts lexicographically in chronological order.
        (Dimension::CreatedAt, CursorValue::Timestamp(after)) => cells
            .values()
            .filter(|row| row.created_at.as_str() > after.as_str())
            .cloned()
            .collect(),
        (dimension, cursor) => {
            return Err(CellError::Backend(format!(
                "cursor {:?} does not match dimension {}",
                cursor, dimension
            )))
        }
    };

    match dimension {
        Dimension::AddedAt => rows.sort_by_key(|row| row.added_at),
        Dimension::CreatedAt => rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.added_at.cmp(&b.added_at))
        }),
    }
    rows.truncate(limit);
    Ok(rows)
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("cells", &self.len())
            .field("sequence", &self.sequence.load(Ordering::Acquire))
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn query_one(&self, statement: &Statement) -> Result<Option<RawRow>> {
        self.check_open()?;
        Ok(self.select(statement)?.into_iter().next())
    }

    async fn query_many(&self, statements: &[Statement]) -> Result<Vec<Vec<RawRow>>> {
        self.check_open()?;
        statements.iter().map(|stmt| self.select(stmt)).collect()
    }

    async fn write(&self, statements: &[Statement]) -> Result<Vec<WriteOutcome>> {
        self.check_open()?;
        Ok(statements.iter().map(|stmt| self.insert(stmt)).collect())
    }

    async fn reset_connection(&self, _key: &str) -> Result<()> {
        // Nothing to reset: durability does not depend on a handle.
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let discarded = {
            let mut cells = self.cells.write();
            let n = cells.len();
            cells.clear();
            n
        };
        info!(discarded = discarded, "Memory backend closed");
        Ok(())
    }
}
