//! Observability hook on the store boundary.
//!
//! The store reports every request, response and error to a
//! [`StoreObserver`]. Statement text only ever leaves the store this way.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::CellError;

/// Event emitted by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// About to call the backend
    Request {
        op: &'static str,
        /// Statement rendered with quoted literals
        statement: String,
    },
    /// Backend answered
    Response {
        op: &'static str,
        rows: usize,
        elapsed: Duration,
    },
    /// Operation failed, before or after reaching the backend
    Error { op: &'static str, error: CellError },
}

impl StoreEvent {
    pub fn op(&self) -> &'static str {
        match self {
            StoreEvent::Request { op, .. }
            | StoreEvent::Response { op, .. }
            | StoreEvent::Error { op, .. } => *op,
        }
    }
}

/// Receiver of store events. Must not block.
pub trait StoreObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StoreObserver for TracingObserver {
    fn on_event(&self, event: &StoreEvent) {
        match event {
            StoreEvent::Request { op, statement } => {
                debug!(op = op, statement = %statement, "Cell store request");
            }
            StoreEvent::Response { op, rows, elapsed } => {
                debug!(
                    op = op,
                    rows = rows,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Cell store response"
                );
            }
            StoreEvent::Error { op, error } => {
                warn!(op = op, error = %error, "Cell store operation failed");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StoreObserver for NoopObserver {
    fn on_event(&self, _event: &StoreEvent) {}
}

/// Keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<StoreEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl StoreObserver for RecordingObserver {
    fn on_event(&self, event: &StoreEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        let shared = observer.clone();

        observer.on_event(&StoreEvent::Request {
            op: "get_cell",
            statement: "SELECT 1".to_string(),
        });
        observer.on_event(&StoreEvent::Error {
            op: "get_cell",
            error: CellError::Cancelled,
        });

        let events = shared.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.op() == "get_cell"));

        shared.clear();
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_tracing_and_noop_observers_accept_events() {
        let event = StoreEvent::Response {
            op: "partition_scan",
            rows: 3,
            elapsed: Duration::from_millis(2),
        };
        TracingObserver.on_event(&event);
        NoopObserver.on_event(&event);
        assert_eq!(event.op(), "partition_scan");
    }
}
