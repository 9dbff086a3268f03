//! # Run a single worker execution.
//!
//! Executes one [`Worker`](crate::Worker) inside a child scope bounded by an optional
//! deadline, publishes lifecycle [`TickEvent`]s, records metrics and returns a
//! [`WorkerReport`].
//!
//! ## Event flow
//!
//! ```text
//! publish WorkerStarting
//!   execute(ctx) ── Ok(())              → publish WorkerFinished
//!                ── Err(Canceled)       → publish WorkerFinished (graceful exit)
//!                ── Err(other) / panic  → publish WorkerFailed
//!   deadline elapsed → drop future, cancel child → publish WorkerTimedOut
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event after `WorkerStarting`.
//! - A panic inside `execute` is caught here and becomes [`WorkerError::Panicked`].
//! - A worker that returns `Canceled` because its own deadline fired is reported as
//!   timed out, not canceled.
//! - Child cancellation does **not** affect the parent scope.
//! - Only the deadline drops a worker's future. Cancelling the parent (shutdown) is
//!   seen by the worker through its scope; a worker that then returns `Canceled` is
//!   reported as canceled.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{self, Instant};

use crate::core::registry::ResolvedWorker;
use crate::error::{WorkerError, panic_message};
use crate::events::{Bus, TickEvent, TickEventKind};
use crate::metrics::Metrics;
use crate::scope::Scope;
use crate::workers::{WorkerContext, WorkerOrder, WorkerOutcome};

/// Result of one worker execution.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub name: Arc<str>,
    pub order: WorkerOrder,
    pub outcome: WorkerOutcome,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl WorkerReport {
    pub fn elapsed(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

/// Executes `worker` once under a scope derived from `parent`.
pub async fn run_once(
    worker: &ResolvedWorker,
    parent: &Scope,
    timeout: Option<Duration>,
    tick: u64,
    bus: &Bus<TickEvent>,
    metrics: &Metrics,
) -> WorkerReport {
    let scope = parent.with_optional_timeout(timeout);
    let name = Arc::clone(&worker.name);

    bus.publish(
        TickEvent::now(TickEventKind::WorkerStarting)
            .with_tick(tick)
            .with_worker(Arc::clone(&name)),
    );
    let started_at = Instant::now();

    let ctx = WorkerContext::new(scope.clone(), tick);
    let fut = AssertUnwindSafe(worker.worker.execute(ctx)).catch_unwind();

    let outcome = match until_deadline(&scope, fut).await {
        Some(Ok(Ok(()))) => WorkerOutcome::Succeeded,
        Some(Ok(Err(WorkerError::Canceled))) if scope.is_expired() => {
            WorkerOutcome::TimedOut(timeout.unwrap_or_default())
        }
        Some(Ok(Err(WorkerError::Canceled))) => WorkerOutcome::Canceled,
        Some(Ok(Err(err))) => WorkerOutcome::Failed(err),
        Some(Err(panic)) => WorkerOutcome::Failed(WorkerError::Panicked {
            info: panic_message(panic.as_ref()),
        }),
        None => WorkerOutcome::TimedOut(timeout.unwrap_or_default()),
    };

    let finished_at = Instant::now();
    let elapsed = finished_at.saturating_duration_since(started_at);
    metrics.record_worker(&name, &outcome, elapsed);
    publish_terminal(bus, tick, &name, &outcome, elapsed);

    WorkerReport {
        name,
        order: worker.order,
        outcome,
        started_at,
        finished_at,
    }
}

/// Awaits `fut` until the scope's deadline; `None` once it passed.
async fn until_deadline<F: Future>(scope: &Scope, fut: F) -> Option<F::Output> {
    let Some(deadline) = scope.deadline() else {
        return Some(fut.await);
    };
    match time::timeout_at(deadline, fut).await {
        Ok(out) => Some(out),
        Err(_) => {
            scope.cancel();
            None
        }
    }
}

fn publish_terminal(
    bus: &Bus<TickEvent>,
    tick: u64,
    name: &Arc<str>,
    outcome: &WorkerOutcome,
    elapsed: Duration,
) {
    let elapsed_ms = elapsed.as_millis() as u64;
    let base = |kind| {
        TickEvent::now(kind)
            .with_tick(tick)
            .with_worker(Arc::clone(name))
            .with_elapsed(elapsed)
    };

    let ev = match outcome {
        WorkerOutcome::Succeeded | WorkerOutcome::Canceled => {
            tracing::debug!(worker = %name, tick, elapsed_ms, outcome = outcome.as_label(), "worker finished");
            base(TickEventKind::WorkerFinished)
        }
        WorkerOutcome::Failed(err) => {
            tracing::warn!(worker = %name, tick, elapsed_ms, error = %err, "worker failed");
            base(TickEventKind::WorkerFailed).with_reason(err.to_string())
        }
        WorkerOutcome::TimedOut(timeout) => {
            tracing::warn!(worker = %name, tick, elapsed_ms, timeout_ms = timeout.as_millis() as u64, "worker timed out");
            base(TickEventKind::WorkerTimedOut).with_timeout(*timeout)
        }
    };
    bus.publish(ev);
}
