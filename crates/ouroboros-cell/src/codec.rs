//! Key codec: addressing-key validation and partition cursor normalization.
//!
//! Cursor values come in exactly three forms ([`Cursor`]) and are checked
//! against the scan [`Dimension`] before anything reaches a backend.
//! Timestamps use one fixed textual representation, `YYYY-MM-DDTHH:MM:SSZ`
//! (UTC, second precision), which is also how `created_at` is persisted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CellError, Result};

/// Fixed persisted timestamp format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Cursor dimension of a partition scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    /// Logical creation time (`created_at`), also accepted as `timestamp`
    CreatedAt,
    /// Store-wide insertion sequence (`added_at`)
    AddedAt,
}

impl Dimension {
    /// Persisted column backing this dimension.
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::CreatedAt => "created_at",
            Dimension::AddedAt => "added_at",
        }
    }

    /// Canonical dimension name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::CreatedAt => "createdAt",
            Dimension::AddedAt => "addedAt",
        }
    }
}

impl FromStr for Dimension {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "createdAt" | "timestamp" => Ok(Dimension::CreatedAt),
            "addedAt" => Ok(Dimension::AddedAt),
            other => Err(CellError::UnknownDimension(other.to_string())),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted partition cursor forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    /// Absolute instant; formatted with [`TIMESTAMP_FORMAT`]
    Instant(DateTime<Utc>),
    /// Absolute instant already formatted as text
    InstantText(String),
    /// Raw insertion sequence number
    SequenceNumber(i64),
}

impl Cursor {
    /// Name of the cursor form, used in error reporting.
    pub fn form(&self) -> &'static str {
        match self {
            Cursor::Instant(_) => "Instant",
            Cursor::InstantText(_) => "InstantText",
            Cursor::SequenceNumber(_) => "SequenceNumber",
        }
    }
}

impl From<DateTime<Utc>> for Cursor {
    fn from(ts: DateTime<Utc>) -> Self {
        Cursor::Instant(ts)
    }
}

impl From<i64> for Cursor {
    fn from(seq: i64) -> Self {
        Cursor::SequenceNumber(seq)
    }
}

/// Normalized cursor, ready to be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorValue {
    /// Fixed-format timestamp text (created_at dimension)
    Timestamp(String),
    /// Insertion sequence (added_at dimension)
    Sequence(i64),
}

impl CursorValue {
    /// Textual rendering: the timestamp as is, the sequence as decimal text.
    pub fn rendered(&self) -> String {
        match self {
            CursorValue::Timestamp(s) => s.clone(),
            CursorValue::Sequence(n) => n.to_string(),
        }
    }
}

/// Normalize a cursor for the given dimension.
///
/// # Errors
///
/// - `InvalidCursor` when a timestamp cursor is empty or unparsable
/// - `UnsupportedCursorType` when the form does not belong to the dimension
pub fn normalize_cursor(dimension: Dimension, cursor: &Cursor) -> Result<CursorValue> {
    match (dimension, cursor) {
        (Dimension::CreatedAt, Cursor::Instant(ts)) => {
            cursor_timestamp(ts).map(CursorValue::Timestamp)
        }
        (Dimension::CreatedAt, Cursor::InstantText(text)) => {
            if text.is_empty() {
                return Err(CellError::InvalidCursor(
                    "empty timestamp cursor".to_string(),
                ));
            }
            let ts = parse_timestamp(text)
                .map_err(|e| CellError::InvalidCursor(format!("'{}': {}", text, e)))?;
            // Stored text is compared as text, so bind the canonical form.
            cursor_timestamp(&ts).map(CursorValue::Timestamp)
        }
        (Dimension::AddedAt, Cursor::SequenceNumber(seq)) => Ok(CursorValue::Sequence(*seq)),
        (dimension, cursor) => Err(CellError::UnsupportedCursorType {
            dimension: dimension.as_str(),
            form: cursor.form(),
        }),
    }
}

fn cursor_timestamp(ts: &DateTime<Utc>) -> Result<String> {
    canonical_timestamp(ts).ok_or_else(|| {
        CellError::InvalidCursor(format!("{} is outside years 0000-9999", ts))
    })
}

/// Format an instant with the fixed persisted format (sub-seconds dropped).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// The fixed-format text of `ts`, or `None` when its year needs more (or
/// fewer) than four digits. Only such text sorts chronologically.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> Option<String> {
    (0..=9999).contains(&ts.year()).then(|| format_timestamp(ts))
}

/// Parse a timestamp in the fixed persisted format.
pub fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
}

/// Validate a row key or column name.
///
/// Keys must be non-empty and free of NUL bytes (which no text column accepts).
pub fn validate_key(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CellError::InvalidKey(format!("{} cannot be empty", kind)));
    }
    if value.contains('\0') {
        return Err(CellError::InvalidKey(format!(
            "{} cannot contain NUL bytes",
            kind
        )));
    }
    Ok(())
}

/// Escape the quote character for the human-readable statement rendering.
///
/// Statements sent to a backend are always bound; this is only used for
/// observer output.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
