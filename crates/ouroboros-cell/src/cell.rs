//! The cell: one immutable version of one column of one logical row.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{format_timestamp, Cursor, Dimension};

/// Identity of a cell. Globally unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellIdentity {
    pub row_key: String,
    pub column_name: String,
    pub ref_key: i64,
}

/// A versioned, immutable unit of stored data.
///
/// Cells are created through `CellStore::put_cell` and never mutated or
/// deleted afterwards. `added_at` is assigned by the backend; `created_at`
/// is either supplied by the writer or defaulted by the backend at insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Logical row identifier
    pub row_key: String,
    /// Logical column identifier
    pub column_name: String,
    /// Version number within (row_key, column_name)
    pub ref_key: i64,
    /// Opaque payload
    pub body: Vec<u8>,
    /// Store-wide insertion sequence, 0 until written
    pub added_at: i64,
    /// Logical creation time, second precision once persisted
    pub created_at: Option<DateTime<Utc>>,
}

impl Cell {
    /// Build a cell for writing. The backend assigns `added_at` and, unless
    /// [`Cell::with_created_at`] is used, `created_at`.
    pub fn new(
        row_key: impl Into<String>,
        column_name: impl Into<String>,
        ref_key: i64,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            row_key: row_key.into(),
            column_name: column_name.into(),
            ref_key,
            body: body.into(),
            added_at: 0,
            created_at: None,
        }
    }

    /// Supply the logical creation time. Truncated to whole seconds, the
    /// precision of the persisted format.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at.trunc_subsecs(0));
        self
    }

    pub fn identity(&self) -> CellIdentity {
        CellIdentity {
            row_key: self.row_key.clone(),
            column_name: self.column_name.clone(),
            ref_key: self.ref_key,
        }
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// `created_at` in the persisted textual format.
    pub fn created_at_text(&self) -> Option<String> {
        self.created_at.as_ref().map(format_timestamp)
    }

    /// Value of this cell on a scan dimension, usable as the next cursor.
    ///
    /// Returns `None` for `CreatedAt` on a cell that was never persisted.
    pub fn dimension_value(&self, dimension: Dimension) -> Option<Cursor> {
        match dimension {
            Dimension::AddedAt => Some(Cursor::SequenceNumber(self.added_at)),
            Dimension::CreatedAt => self.created_at.map(Cursor::Instant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_cell_defaults() {
        let cell = Cell::new("user:1", "email", 1, "a@x.com");
        assert_eq!(cell.row_key, "user:1");
        assert_eq!(cell.column_name, "email");
        assert_eq!(cell.ref_key, 1);
        assert_eq!(cell.body_str(), Some("a@x.com"));
        assert_eq!(cell.added_at, 0);
        assert!(cell.created_at.is_none());
    }

    #[test]
    fn test_created_at_truncated() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
            + chrono::Duration::microseconds(123_456);
        let cell = Cell::new("r", "c", 1, vec![1u8, 2, 3]).with_created_at(ts);
        assert_eq!(
            cell.created_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
        );
        assert_eq!(cell.created_at_text().as_deref(), Some("2024-05-06T07:08:09Z"));
    }

    #[test]
    fn test_identity() {
        let cell = Cell::new("r", "c", 9, Vec::<u8>::new());
        assert_eq!(
            cell.identity(),
            CellIdentity {
                row_key: "r".to_string(),
                column_name: "c".to_string(),
                ref_key: 9,
            }
        );
    }

    #[test]
    fn test_dimension_value() {
        let mut cell = Cell::new("r", "c", 1, Vec::<u8>::new());
        cell.added_at = 17;
        assert_eq!(
            cell.dimension_value(Dimension::AddedAt),
            Some(Cursor::SequenceNumber(17))
        );
        assert_eq!(cell.dimension_value(Dimension::CreatedAt), None);

        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let cell = cell.with_created_at(ts);
        assert_eq!(
            cell.dimension_value(Dimension::CreatedAt),
            Some(Cursor::Instant(ts))
        );
    }

    #[test]
    fn test_cell_serde_json() {
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let cell = Cell::new("r", "c", 1, "x").with_created_at(ts);
        let json = serde_json::to_string(&cell).unwrap();
        let back: Cell = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cell);
    }
}
