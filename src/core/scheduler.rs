//! # Tick scheduler: drives every registered worker once per interval.
//!
//! ## Cycle
//! ```text
//! tick += 1 ── publish CycleStarted
//!   registry.resolve()                       (fresh instances, priority first)
//!   priority worker ── run_once(priority_timeout)        (alone, awaited)
//!   normal workers  ── JoinSet + Semaphore(max_concurrent)
//!                       └─► run_once(worker_timeout) per worker
//!   join all ── record cycle duration ── publish CycleCompleted
//! sleep (IntervalMode) ── repeat
//! ```
//!
//! ## Rules
//! - The priority worker finishes (or times out) before any other worker starts.
//! - Worker errors, panics and timeouts are soft outcomes; siblings are unaffected.
//! - A panic outside any worker (e.g. in a factory) fails the cycle, is counted,
//!   and the loop still sleeps and retries.
//! - Worker scopes derive from the loop's scope, which shutdown cancels. Workers see
//!   that through their context and may exit early; none is aborted, and the cycle
//!   in flight is awaited to the end before the loop exits.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::config::{IntervalMode, SchedulerConfig};
use crate::core::registry::WorkerRegistry;
use crate::core::runner::{WorkerReport, run_once};
use crate::error::{SchedulerError, panic_message};
use crate::events::{Bus, TickEvent, TickEventKind};
use crate::metrics::Metrics;
use crate::observability::tick_span;
use crate::scope::Scope;
use crate::workers::WorkerOrder;

/// Result of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// 1-based cycle number.
    pub tick: u64,
    /// One report per worker: priority first, then registration order.
    pub reports: Vec<WorkerReport>,
    pub elapsed: Duration,
}

/// Fixed-interval loop over the [`WorkerRegistry`].
pub struct TickScheduler {
    cfg: SchedulerConfig,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<Metrics>,
    bus: Bus<TickEvent>,
    semaphore: Option<Arc<Semaphore>>,
    tick: AtomicU64,
}

impl TickScheduler {
    pub fn new(
        cfg: SchedulerConfig,
        registry: Arc<WorkerRegistry>,
        metrics: Arc<Metrics>,
        bus: Bus<TickEvent>,
    ) -> Self {
        let semaphore = cfg
            .concurrency_limit()
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            cfg,
            registry,
            metrics,
            bus,
            semaphore,
            tick: AtomicU64::new(0),
        }
    }

    /// Lifecycle notifications for every cycle and worker.
    pub fn bus(&self) -> &Bus<TickEvent> {
        &self.bus
    }

    /// Number of cycles started so far.
    pub fn ticks(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Runs cycles until `shutdown` is cancelled. Never fails.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_ms = self.cfg.interval.as_millis() as u64,
            mode = ?self.cfg.interval_mode,
            "scheduler started"
        );

        let scope = Scope::from_token(shutdown.child_token());
        while !shutdown.is_cancelled() {
            let started = Instant::now();
            // Failures are counted and published inside the cycle.
            let _ = self.run_cycle_in(&scope).await;

            let wake = match self.cfg.interval_mode {
                IntervalMode::FromStart => started + self.cfg.interval,
                IntervalMode::FromEnd => Instant::now() + self.cfg.interval,
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep_until(wake) => {}
            }
        }

        tracing::info!(ticks = self.ticks(), "scheduler stopped");
    }

    /// Runs exactly one cycle under a fresh root scope.
    pub async fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        self.run_cycle_in(&Scope::root()).await
    }

    async fn run_cycle_in(&self, scope: &Scope) -> Result<CycleReport, SchedulerError> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        self.cycle(tick, scope).instrument(tick_span(tick)).await
    }

    async fn cycle(&self, tick: u64, scope: &Scope) -> Result<CycleReport, SchedulerError> {
        self.bus
            .publish(TickEvent::now(TickEventKind::CycleStarted).with_tick(tick));
        let started = Instant::now();

        match AssertUnwindSafe(self.cycle_body(tick, scope)).catch_unwind().await {
            Ok(reports) => {
                let elapsed = started.elapsed();
                self.metrics.record_cycle_completed(elapsed);
                self.bus.publish(
                    TickEvent::now(TickEventKind::CycleCompleted)
                        .with_tick(tick)
                        .with_elapsed(elapsed),
                );
                let failed = reports.iter().filter(|r| !r.outcome.is_success()).count();
                tracing::info!(
                    workers = reports.len(),
                    failed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "cycle completed"
                );
                Ok(CycleReport {
                    tick,
                    reports,
                    elapsed,
                })
            }
            Err(panic) => {
                let info = panic_message(panic.as_ref());
                self.metrics.record_cycle_failed();
                self.bus.publish(
                    TickEvent::now(TickEventKind::CycleFailed)
                        .with_tick(tick)
                        .with_reason(info.clone()),
                );
                tracing::error!(error = %info, "cycle failed");
                Err(SchedulerError::CyclePanicked { tick, info })
            }
        }
    }

    async fn cycle_body(&self, tick: u64, scope: &Scope) -> Vec<WorkerReport> {
        let mut workers = self.registry.resolve().into_iter().peekable();
        let mut reports = Vec::with_capacity(workers.len());

        if let Some(priority) = workers.next_if(|w| w.order == WorkerOrder::Priority) {
            reports.push(
                run_once(
                    &priority,
                    scope,
                    self.cfg.priority_deadline(),
                    tick,
                    &self.bus,
                    &self.metrics,
                )
                .await,
            );
        }

        let timeout = self.cfg.worker_deadline();
        let mut set = JoinSet::new();
        for (idx, worker) in workers.enumerate() {
            // Acquired before spawning so workers start in registration order.
            let permit = match &self.semaphore {
                Some(sem) => Arc::clone(sem).acquire_owned().await.ok(),
                None => None,
            };
            let scope = scope.clone();
            let bus = self.bus.clone();
            let metrics = Arc::clone(&self.metrics);
            set.spawn(async move {
                let report = run_once(&worker, &scope, timeout, tick, &bus, &metrics).await;
                drop(permit);
                (idx, report)
            });
        }

        let mut normal = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => normal.push(entry),
                Err(err) => tracing::error!(error = %err, "worker task aborted"),
            }
        }
        normal.sort_by_key(|(idx, _)| *idx);
        reports.extend(normal.into_iter().map(|(_, r)| r));
        reports
    }
}
