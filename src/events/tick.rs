//! # Scheduler lifecycle notifications.
//!
//! [`TickEventKind`] classifies what the scheduler and runtime report while driving
//! workers; [`TickEvent`] carries the metadata (tick number, worker name, reason, timing).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Per-cycle flow
//! ```text
//! CycleStarted
//!   → WorkerStarting(priority) → WorkerFinished | WorkerFailed | WorkerTimedOut
//!   → WorkerStarting(a) ... (up to max_concurrent at a time)
//!   → WorkerFinished(a) | WorkerFailed(a) | WorkerTimedOut(a) ...
//! CycleCompleted | CycleFailed
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for tick event ordering.
static TICK_EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of scheduler/runtime notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEventKind {
    // === Cycle events ===
    /// A cycle began.
    ///
    /// Sets: `tick`
    CycleStarted,

    /// All workers of the cycle returned or timed out.
    ///
    /// Sets: `tick`, `elapsed_ms`
    CycleCompleted,

    /// The cycle body failed outside any single worker.
    ///
    /// Sets: `tick`, `reason`
    CycleFailed,

    // === Worker events ===
    /// A worker is about to execute.
    ///
    /// Sets: `tick`, `worker`
    WorkerStarting,

    /// A worker returned `Ok` (or exited on cancellation).
    ///
    /// Sets: `tick`, `worker`, `elapsed_ms`
    WorkerFinished,

    /// A worker returned an error or panicked.
    ///
    /// Sets: `tick`, `worker`, `elapsed_ms`, `reason`
    WorkerFailed,

    /// A worker exceeded its deadline.
    ///
    /// Sets: `tick`, `worker`, `elapsed_ms`, `timeout_ms`
    WorkerTimedOut,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// Every component stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; `reason` lists the stuck components.
    GraceExceeded,
}

/// Scheduler notification with optional metadata.
#[derive(Debug, Clone)]
pub struct TickEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: TickEventKind,
    /// Cycle number (1-based), if applicable.
    pub tick: Option<u64>,
    /// Worker name, if applicable.
    pub worker: Option<Arc<str>>,
    /// Human-readable reason (errors, stuck components).
    pub reason: Option<Arc<str>>,
    /// Time spent in the worker or cycle, in milliseconds (compact).
    pub elapsed_ms: Option<u32>,
    /// Deadline that was exceeded, in milliseconds (compact).
    pub timeout_ms: Option<u32>,
}

impl TickEvent {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn now(kind: TickEventKind) -> Self {
        Self {
            seq: TICK_EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            tick: None,
            worker: None,
            reason: None,
            elapsed_ms: None,
            timeout_ms: None,
        }
    }

    #[inline]
    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// True for the three per-worker terminal kinds.
    pub fn is_worker_terminal(&self) -> bool {
        matches!(
            self.kind,
            TickEventKind::WorkerFinished
                | TickEventKind::WorkerFailed
                | TickEventKind::WorkerTimedOut
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = TickEvent::now(TickEventKind::CycleStarted);
        let b = TickEvent::now(TickEventKind::CycleCompleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builder_sets_fields() {
        let ev = TickEvent::now(TickEventKind::WorkerTimedOut)
            .with_tick(3)
            .with_worker("market")
            .with_elapsed(Duration::from_millis(1500))
            .with_timeout(Duration::from_secs(1));

        assert_eq!(ev.tick, Some(3));
        assert_eq!(ev.worker.as_deref(), Some("market"));
        assert_eq!(ev.elapsed_ms, Some(1500));
        assert_eq!(ev.timeout_ms, Some(1000));
        assert!(ev.is_worker_terminal());
    }
}
