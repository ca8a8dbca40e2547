//! Bound statements issued by the store.
//!
//! The store never builds SQL by interpolating literals. Each statement
//! carries typed parameters; SQL backends bind them to `$n` placeholders and
//! non-SQL backends match on the variant directly.

use crate::codec::{quote_literal, CursorValue, Dimension};

const GET_CELL_SQL: &str = "SELECT added_at, row_key, column_name, ref_key, body, created_at \
     FROM cell WHERE row_key = $1 AND column_name = $2 AND ref_key = $3 LIMIT 1";

const GET_CELL_LATEST_SQL: &str = "SELECT added_at, row_key, column_name, ref_key, body, created_at \
     FROM cell WHERE row_key = $1 AND column_name = $2 ORDER BY ref_key DESC LIMIT 1";

// Ascending order on the scan dimension makes the last row the next cursor seed.
const SCAN_CREATED_AT_SQL: &str = "SELECT added_at, row_key, column_name, ref_key, body, created_at \
     FROM cell WHERE created_at > $1 ORDER BY created_at ASC, added_at ASC LIMIT $2";

const SCAN_ADDED_AT_SQL: &str = "SELECT added_at, row_key, column_name, ref_key, body, created_at \
     FROM cell WHERE added_at > $1 ORDER BY added_at ASC LIMIT $2";

const PUT_CELL_SQL: &str = "INSERT INTO cell (row_key, column_name, ref_key, body) \
     VALUES ($1, $2, $3, $4) RETURNING added_at";

const PUT_CELL_WITH_CREATED_AT_SQL: &str = "INSERT INTO cell (row_key, column_name, ref_key, body, created_at) \
     VALUES ($1, $2, $3, $4, $5) RETURNING added_at";

/// A typed statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    /// TEXT
    Text(String),
    /// BIGINT
    BigInt(i64),
    /// BYTEA
    Bytes(Vec<u8>),
}

impl BindValue {
    fn literal(&self) -> String {
        match self {
            BindValue::Text(s) => quote_literal(s),
            BindValue::BigInt(n) => n.to_string(),
            BindValue::Bytes(b) => quote_literal(&String::from_utf8_lossy(b)),
        }
    }
}

/// One of the four statements the cell store issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Exact version lookup
    GetCell {
        row_key: String,
        column_name: String,
        ref_key: i64,
    },
    /// Highest ref_key for a (row_key, column_name) pair
    GetCellLatest { row_key: String, column_name: String },
    /// Cells strictly after the cursor on one dimension, ascending
    PartitionScan {
        dimension: Dimension,
        cursor: CursorValue,
        limit: i64,
    },
    /// Append one version
    PutCell {
        row_key: String,
        column_name: String,
        ref_key: i64,
        body: Vec<u8>,
        /// Fixed-format text; `None` lets the backend default it
        created_at: Option<String>,
    },
}

impl Statement {
    /// Operation name for logs and observer events.
    pub fn op(&self) -> &'static str {
        match self {
            Statement::GetCell { .. } => "get_cell",
            Statement::GetCellLatest { .. } => "get_cell_latest",
            Statement::PartitionScan { .. } => "partition_scan",
            Statement::PutCell { .. } => "put_cell",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Statement::PutCell { .. })
    }

    /// SQL text with `$n` placeholders.
    pub fn sql(&self) -> &'static str {
        match self {
            Statement::GetCell { .. } => GET_CELL_SQL,
            Statement::GetCellLatest { .. } => GET_CELL_LATEST_SQL,
            Statement::PartitionScan { dimension: Dimension::CreatedAt, .. } => SCAN_CREATED_AT_SQL,
            Statement::PartitionScan { dimension: Dimension::AddedAt, .. } => SCAN_ADDED_AT_SQL,
            Statement::PutCell { created_at: None, .. } => PUT_CELL_SQL,
            Statement::PutCell { created_at: Some(_), .. } => PUT_CELL_WITH_CREATED_AT_SQL,
        }
    }

    /// Parameters in placeholder order.
    pub fn params(&self) -> Vec<BindValue> {
        match self {
            Statement::GetCell {
                row_key,
                column_name,
                ref_key,
            } => vec![
                BindValue::Text(row_key.clone()),
                BindValue::Text(column_name.clone()),
                BindValue::BigInt(*ref_key),
            ],
            Statement::GetCellLatest {
                row_key,
                column_name,
            } => vec![
                BindValue::Text(row_key.clone()),
                BindValue::Text(column_name.clone()),
            ],
            Statement::PartitionScan { cursor, limit, .. } => {
                let cursor = match cursor {
                    CursorValue::Timestamp(text) => BindValue::Text(text.clone()),
                    CursorValue::Sequence(seq) => BindValue::BigInt(*seq),
                };
                vec![cursor, BindValue::BigInt(*limit)]
            }
            Statement::PutCell {
                row_key,
                column_name,
                ref_key,
                body,
                created_at,
            } => {
                let mut params = vec![
                    BindValue::Text(row_key.clone()),
                    BindValue::Text(column_name.clone()),
                    BindValue::BigInt(*ref_key),
                    BindValue::Bytes(body.clone()),
                ];
                if let Some(created_at) = created_at {
                    params.push(BindValue::Text(created_at.clone()));
                }
                params
            }
        }
    }

    /// Human-readable rendering with quoted literals, for observers only.
    pub fn display(&self) -> String {
        let params = self.params();
        let sql = self.sql();
        let mut out = String::with_capacity(sql.len());
        let mut rest = sql;

        // Single pass, so a literal containing `$n` is never substituted again.
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos + 1..];
            let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
            let param = tail[..digits]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| params.get(idx));
            match param {
                Some(param) => out.push_str(&param.literal()),
                None => out.push_str(&rest[pos..pos + 1 + digits]),
            }
            rest = &tail[digits..];
        }
        out.push_str(rest);
        out
    }
}
