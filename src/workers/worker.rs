//! # Worker abstraction.
//!
//! A worker receives a [`WorkerContext`] and should periodically check its scope to
//! stop cooperatively once the deadline passes. Workers that ignore the scope are
//! still bounded: the scheduler drops their future when the deadline elapses.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::scope::Scope;

/// Shared handle to a worker.
pub type WorkerRef = Arc<dyn Worker>;

/// Everything a single execution gets from the scheduler.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    scope: Scope,
    tick: u64,
}

impl WorkerContext {
    pub fn new(scope: Scope, tick: u64) -> Self {
        Self { scope, tick }
    }

    /// Cancellation scope bounded by this worker's deadline.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// 1-based cycle number.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_done()
    }
}

/// # Named unit of work executed once per tick.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use worldtick::{Worker, WorkerContext, WorkerError};
///
/// struct Harvest;
///
/// #[async_trait]
/// impl Worker for Harvest {
///     fn name(&self) -> &str { "harvest" }
///
///     async fn execute(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
///         if ctx.is_cancelled() {
///             return Err(WorkerError::Canceled);
///         }
///         // grow crops...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Stable, human-readable worker name.
    fn name(&self) -> &str;

    /// Runs one tick's worth of work.
    async fn execute(&self, ctx: WorkerContext) -> Result<(), WorkerError>;
}
