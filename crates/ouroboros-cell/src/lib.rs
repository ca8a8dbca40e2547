//! Versioned, append-only cell storage for ouroboros.
//!
//! A cell is one immutable version of a value addressed by
//! `(row_key, column_name, ref_key)`. The store only ever appends; the
//! latest version of a column is the one with the highest `ref_key`, and a
//! partition scan walks cells in insertion or creation order behind a
//! strictly increasing cursor.
//!
//! # Architecture
//!
//! ```text
//! CellStore  (validation, cancellation, observer events)
//!     |
//! Statement  (bound parameters, never interpolated)
//!     |
//! Backend    (memory:// | postgres://)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ouroboros_cell::{Cell, CellStore, Cursor, OpContext, StoreConfig};
//!
//! let store = CellStore::open(StoreConfig::default()).await?;
//! let ctx = OpContext::background();
//!
//! let cell = Cell::new("user:1", "email", 1, "a@example.com");
//! store.put_cell(&ctx, "user:1", "email", 1, &cell).await?;
//!
//! let latest = store.get_cell_latest(&ctx, "user:1", "email").await?;
//! let page = store
//!     .partition_scan(&ctx, "addedAt", Cursor::SequenceNumber(0), 100)
//!     .await?;
//! ```

pub mod backend;
pub mod cell;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod observer;
pub mod pager;
pub mod statement;
pub mod store;

pub use backend::{open_backend, Backend, MemoryBackend, RawRow, WriteOutcome};
#[cfg(feature = "postgres")]
pub use backend::{PoolConfig, PostgresBackend, RetryConfig};
pub use cell::{Cell, CellIdentity};
pub use codec::{Cursor, CursorValue, Dimension, TIMESTAMP_FORMAT};
pub use config::{ConsistencyLevel, StoreConfig};
pub use context::OpContext;
pub use error::{CellError, Result};
pub use observer::{NoopObserver, RecordingObserver, StoreEvent, StoreObserver, TracingObserver};
pub use pager::PartitionPager;
pub use statement::{BindValue, Statement};
pub use store::{CellStore, ScanPage};

// Re-export the cancellation token so callers need not depend on tokio-util
pub use tokio_util::sync::CancellationToken;
