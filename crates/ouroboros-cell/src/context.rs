//! Per-operation cancellation and deadlines.
//!
//! Every store operation takes an [`OpContext`]. The in-flight backend call
//! is raced against the context's cancellation token and deadline; the
//! loser is dropped, so a cancelled call never yields partial results.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{CellError, Result};

/// Cancellation signal plus optional deadline for one or more operations.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Never cancelled, no deadline of its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Cancelled when `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Same context with a deadline `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Child context: cancelled with its parent, cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Run `fut` under this context.
    ///
    /// `default_timeout` applies when the context has no deadline of its own.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the token fires first, `DeadlineExceeded` if the
    /// deadline passes first; otherwise whatever `fut` returns.
    pub async fn run<F, T>(&self, default_timeout: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(CellError::Cancelled);
        }

        let now = Instant::now();
        let deadline = match (self.deadline, default_timeout) {
            (Some(deadline), _) => Some(deadline),
            (None, Some(timeout)) => Some(now + timeout),
            (None, None) => None,
        };

        match deadline {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(now);
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(CellError::Cancelled),
                    res = tokio::time::timeout_at(deadline, fut) => {
                        res.unwrap_or(Err(CellError::DeadlineExceeded(budget)))
                    }
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(CellError::Cancelled),
                    res = fut => res,
                }
            }
        }
    }
}
