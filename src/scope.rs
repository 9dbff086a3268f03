//! # Cancellation scopes with deadlines.
//!
//! [`Scope`] pairs a [`CancellationToken`] with an optional deadline. Every long-running
//! operation in the crate (a worker execution, a generation request, a single attempt)
//! runs inside a scope derived from a longer-lived parent:
//!
//! ```text
//! root scope (no deadline)
//!   └─► request scope      with_timeout(15s)
//!         └─► attempt scope with_timeout(8s)   deadline = min(parent, now + 8s)
//! ```
//!
//! ## Rules
//! - A derived scope never outlives its parent: its deadline is clamped to the parent's.
//! - Cancelling a parent cancels every derived scope; cancelling a child never
//!   touches the parent.
//! - A deadline elapsing is an ordinary outcome ([`ScopeExit::DeadlineElapsed`]), not a panic
//!   and not an error type.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Why a scope ended before the wrapped future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    /// The scope's deadline passed.
    DeadlineElapsed,
    /// The scope (or one of its ancestors) was cancelled.
    Cancelled,
}

/// Cooperative cancellation boundary with an optional deadline.
///
/// Cheap to clone; clones share the same token and deadline.
#[derive(Clone, Debug)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

impl Scope {
    /// A fresh scope with its own token and no deadline.
    pub fn root() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wraps an existing token (no deadline).
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derives a child scope with the same deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child scope that expires after `timeout`, clamped to this scope's deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Like [`with_timeout`](Self::with_timeout), but `None` only derives a child.
    pub fn with_optional_timeout(&self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => self.with_timeout(t),
            None => self.child(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline (`None` if the scope has no deadline).
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// True once the scope is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Completes when the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> ScopeExit {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ScopeExit::Cancelled,
                    _ = time::sleep_until(deadline) => ScopeExit::DeadlineElapsed,
                }
            }
            None => {
                self.token.cancelled().await;
                ScopeExit::Cancelled
            }
        }
    }

    /// Runs `fut` inside this scope.
    ///
    /// Returns the future's output, or the reason the scope ended first. When the scope
    /// ends first the future is dropped and this scope's token is cancelled so that
    /// anything else observing it stops too. A future that is ready at the same moment
    /// as the deadline wins.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ScopeExit> {
        tokio::pin!(fut);
        let res = tokio::select! {
            biased;
            out = &mut fut => Ok(out),
            exit = self.done() => Err(exit),
        };
        if res.is_err() {
            self.token.cancel();
        }
        res
    }
}
