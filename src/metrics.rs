//! # Runtime metrics.
//!
//! [`Metrics`] is a shared set of atomic counters written from the scheduler, the
//! dispatch consumer, the hub and the generation pool. [`Metrics::snapshot`] renders a
//! serializable [`MetricsSnapshot`] (served at `GET /metrics`).
//!
//! Every update is mirrored to the [`metrics`] facade under the names in [`names`], so
//! an installed recorder (Prometheus, statsd, ...) sees the same data. Without a
//! recorder the facade calls are no-ops.
//!
//! ## Metrics exported
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `worldtick_worker_runs_total` | Counter | `worker`, `outcome` |
//! | `worldtick_worker_duration_seconds` | Histogram | `worker` |
//! | `worldtick_cycles_total` | Counter | `status` |
//! | `worldtick_cycle_duration_seconds` | Histogram | - |
//! | `worldtick_dispatch_events_total` | Counter | `result` |
//! | `worldtick_hub_published_total` | Counter | `type` |
//! | `worldtick_sink_drops_total` | Counter | `sink`, `reason` |
//! | `worldtick_requests_total` | Counter | `result` |
//! | `worldtick_request_latency_seconds` | Histogram | - |
//! | `worldtick_generation_total` | Counter | `kind` |

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use parking_lot::RwLock;
use serde::Serialize;

use crate::workers::WorkerOutcome;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: worker executions by outcome.
    pub const WORKER_RUNS_TOTAL: &str = "worldtick_worker_runs_total";
    /// Histogram: worker execution time in seconds.
    pub const WORKER_DURATION_SECONDS: &str = "worldtick_worker_duration_seconds";
    /// Counter: cycles by status (completed, failed).
    pub const CYCLES_TOTAL: &str = "worldtick_cycles_total";
    /// Histogram: full cycle time in seconds.
    pub const CYCLE_DURATION_SECONDS: &str = "worldtick_cycle_duration_seconds";
    /// Counter: dispatch queue events by result.
    pub const DISPATCH_EVENTS_TOTAL: &str = "worldtick_dispatch_events_total";
    /// Counter: hub publishes by event type.
    pub const HUB_PUBLISHED_TOTAL: &str = "worldtick_hub_published_total";
    /// Counter: push sink drops by sink and reason.
    pub const SINK_DROPS_TOTAL: &str = "worldtick_sink_drops_total";
    /// Counter: generation requests by result.
    pub const REQUESTS_TOTAL: &str = "worldtick_requests_total";
    /// Histogram: enqueue-to-terminal latency in seconds.
    pub const REQUEST_LATENCY_SECONDS: &str = "worldtick_request_latency_seconds";
    /// Counter: generation pipeline decisions (reask, rewrite, sanitization, fallback).
    pub const GENERATION_TOTAL: &str = "worldtick_generation_total";
}

/// Describes every metric to the installed recorder.
///
/// Call once after installing a recorder; harmless without one.
pub fn register_metrics() {
    describe_counter!(names::WORKER_RUNS_TOTAL, "Worker executions by outcome");
    describe_histogram!(
        names::WORKER_DURATION_SECONDS,
        "Worker execution time in seconds"
    );
    describe_counter!(names::CYCLES_TOTAL, "Scheduler cycles by status");
    describe_histogram!(
        names::CYCLE_DURATION_SECONDS,
        "Scheduler cycle time in seconds"
    );
    describe_counter!(
        names::DISPATCH_EVENTS_TOTAL,
        "Dispatch queue events by result"
    );
    describe_counter!(names::HUB_PUBLISHED_TOTAL, "Hub publishes by event type");
    describe_counter!(names::SINK_DROPS_TOTAL, "Push sink drops by sink and reason");
    describe_counter!(names::REQUESTS_TOTAL, "Generation requests by result");
    describe_histogram!(
        names::REQUEST_LATENCY_SECONDS,
        "Generation request latency from enqueue to terminal event"
    );
    describe_counter!(
        names::GENERATION_TOTAL,
        "Generation pipeline reasks, rewrites, sanitizations and fallbacks"
    );
}

/// Count, total and maximum of a stream of durations.
#[derive(Debug, Default)]
pub struct DurationStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl DurationStats {
    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DurationSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        DurationSnapshot {
            count,
            total_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
            avg_ms: if count == 0 {
                0.0
            } else {
                total_ms as f64 / count as f64
            },
        }
    }
}

/// Outcome counters and timing for one worker name.
#[derive(Debug, Default)]
pub struct WorkerStats {
    success: AtomicU64,
    error: AtomicU64,
    timeout: AtomicU64,
    canceled: AtomicU64,
    duration: DurationStats,
}

impl WorkerStats {
    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            success: self.success.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            duration: self.duration.snapshot(),
        }
    }
}

/// Shared counters for the whole runtime.
#[derive(Debug, Default)]
pub struct Metrics {
    // scheduler
    cycles_completed: AtomicU64,
    cycle_failures: AtomicU64,
    cycle_duration: DurationStats,
    workers: RwLock<HashMap<Arc<str>, Arc<WorkerStats>>>,

    // dispatch
    dispatch_enqueued: AtomicU64,
    persisted: AtomicU64,
    persist_failed: AtomicU64,
    dispatch_dropped: AtomicU64,
    broadcast_failed: AtomicU64,

    // hub
    published: RwLock<HashMap<String, Arc<AtomicU64>>>,
    sink_dropped: AtomicU64,
    sink_panicked: AtomicU64,

    // generation
    requests_enqueued: AtomicU64,
    requests_processed: AtomicU64,
    requests_dropped: AtomicU64,
    requests_abandoned: AtomicU64,
    request_latency: DurationStats,
    reasks: AtomicU64,
    rewrites: AtomicU64,
    sanitizations: AtomicU64,
    fallbacks: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn worker_stats(&self, name: &Arc<str>) -> Arc<WorkerStats> {
        if let Some(stats) = self.workers.read().get(name) {
            return Arc::clone(stats);
        }
        let mut map = self.workers.write();
        Arc::clone(map.entry(Arc::clone(name)).or_default())
    }

    // === scheduler ===

    pub fn record_worker(&self, name: &Arc<str>, outcome: &WorkerOutcome, elapsed: Duration) {
        let stats = self.worker_stats(name);
        let slot = match outcome {
            WorkerOutcome::Succeeded => &stats.success,
            WorkerOutcome::Failed(_) => &stats.error,
            WorkerOutcome::TimedOut(_) => &stats.timeout,
            WorkerOutcome::Canceled => &stats.canceled,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        stats.duration.record(elapsed);

        counter!(
            names::WORKER_RUNS_TOTAL,
            "worker" => name.to_string(),
            "outcome" => outcome.as_label()
        )
        .increment(1);
        histogram!(names::WORKER_DURATION_SECONDS, "worker" => name.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn record_cycle_completed(&self, elapsed: Duration) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration.record(elapsed);
        counter!(names::CYCLES_TOTAL, "status" => "completed").increment(1);
        histogram!(names::CYCLE_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }

    pub fn record_cycle_failed(&self) {
        self.cycle_failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::CYCLES_TOTAL, "status" => "failed").increment(1);
    }

    // === dispatch ===

    pub fn record_dispatch_enqueued(&self) {
        self.dispatch_enqueued.fetch_add(1, Ordering::Relaxed);
        counter!(names::DISPATCH_EVENTS_TOTAL, "result" => "enqueued").increment(1);
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        counter!(names::DISPATCH_EVENTS_TOTAL, "result" => "persisted").increment(1);
    }

    pub fn record_persist_failed(&self) {
        self.persist_failed.fetch_add(1, Ordering::Relaxed);
        counter!(names::DISPATCH_EVENTS_TOTAL, "result" => "persist_failed").increment(1);
    }

    pub fn record_dispatch_dropped(&self) {
        self.dispatch_dropped.fetch_add(1, Ordering::Relaxed);
        counter!(names::DISPATCH_EVENTS_TOTAL, "result" => "dropped").increment(1);
    }

    pub fn record_broadcast_failed(&self) {
        self.broadcast_failed.fetch_add(1, Ordering::Relaxed);
        counter!(names::DISPATCH_EVENTS_TOTAL, "result" => "broadcast_failed").increment(1);
    }

    // === hub ===

    /// Counts one publish under `key` (event type, or `snapshot:<type>`).
    pub fn record_published(&self, key: &str) {
        let existing = self.published.read().get(key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => Arc::clone(self.published.write().entry(key.to_string()).or_default()),
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(names::HUB_PUBLISHED_TOTAL, "type" => key.to_string()).increment(1);
    }

    pub fn record_sink_dropped(&self, sink: &str) {
        self.sink_dropped.fetch_add(1, Ordering::Relaxed);
        counter!(names::SINK_DROPS_TOTAL, "sink" => sink.to_string(), "reason" => "overflow")
            .increment(1);
    }

    pub fn record_sink_panicked(&self, sink: &str) {
        self.sink_panicked.fetch_add(1, Ordering::Relaxed);
        counter!(names::SINK_DROPS_TOTAL, "sink" => sink.to_string(), "reason" => "panic")
            .increment(1);
    }

    // === generation ===

    pub fn record_request_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::Relaxed);
        counter!(names::REQUESTS_TOTAL, "result" => "enqueued").increment(1);
    }

    /// Counts one dropped request; `reason` is `overflow` or `shutdown`.
    pub fn record_request_dropped(&self, reason: &'static str) {
        self.requests_dropped.fetch_add(1, Ordering::Relaxed);
        counter!(names::REQUESTS_TOTAL, "result" => "dropped", "reason" => reason).increment(1);
    }

    pub fn record_request_abandoned(&self) {
        self.requests_abandoned.fetch_add(1, Ordering::Relaxed);
        counter!(names::REQUESTS_TOTAL, "result" => "abandoned").increment(1);
    }

    pub fn record_request_processed(&self, latency: Duration) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        self.request_latency.record(latency);
        counter!(names::REQUESTS_TOTAL, "result" => "processed").increment(1);
        histogram!(names::REQUEST_LATENCY_SECONDS).record(latency.as_secs_f64());
    }

    pub fn record_reask(&self) {
        self.reasks.fetch_add(1, Ordering::Relaxed);
        counter!(names::GENERATION_TOTAL, "kind" => "reask").increment(1);
    }

    pub fn record_rewrite(&self) {
        self.rewrites.fetch_add(1, Ordering::Relaxed);
        counter!(names::GENERATION_TOTAL, "kind" => "rewrite").increment(1);
    }

    pub fn record_sanitization(&self) {
        self.sanitizations.fetch_add(1, Ordering::Relaxed);
        counter!(names::GENERATION_TOTAL, "kind" => "sanitization").increment(1);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        counter!(names::GENERATION_TOTAL, "kind" => "fallback").increment(1);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);

        let mut workers: Vec<(String, WorkerSnapshot)> = self
            .workers
            .read()
            .iter()
            .map(|(name, stats)| (name.to_string(), stats.snapshot()))
            .collect();
        workers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut published: Vec<(String, u64)> = self
            .published
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), load(v)))
            .collect();
        published.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            scheduler: SchedulerSnapshot {
                cycles_completed: load(&self.cycles_completed),
                cycle_failures: load(&self.cycle_failures),
                cycle_duration: self.cycle_duration.snapshot(),
                workers: workers.into_iter().collect(),
            },
            dispatch: DispatchSnapshot {
                enqueued: load(&self.dispatch_enqueued),
                persisted: load(&self.persisted),
                persist_failed: load(&self.persist_failed),
                dropped: load(&self.dispatch_dropped),
                broadcast_failed: load(&self.broadcast_failed),
            },
            hub: HubSnapshot {
                published: published.into_iter().collect(),
                sink_dropped: load(&self.sink_dropped),
                sink_panicked: load(&self.sink_panicked),
            },
            generation: GenerationSnapshot {
                enqueued: load(&self.requests_enqueued),
                processed: load(&self.requests_processed),
                dropped: load(&self.requests_dropped),
                abandoned: load(&self.requests_abandoned),
                latency: self.request_latency.snapshot(),
                reasks: load(&self.reasks),
                rewrites: load(&self.rewrites),
                sanitizations: load(&self.sanitizations),
                fallbacks: load(&self.fallbacks),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationSnapshot {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub success: u64,
    pub error: u64,
    pub timeout: u64,
    pub canceled: u64,
    pub duration: DurationSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSnapshot {
    pub cycles_completed: u64,
    pub cycle_failures: u64,
    pub cycle_duration: DurationSnapshot,
    /// Keyed by worker name, sorted.
    pub workers: std::collections::BTreeMap<String, WorkerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchSnapshot {
    pub enqueued: u64,
    pub persisted: u64,
    pub persist_failed: u64,
    pub dropped: u64,
    pub broadcast_failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubSnapshot {
    /// Publish count per event type; snapshots appear as `snapshot:<type>`.
    pub published: std::collections::BTreeMap<String, u64>,
    pub sink_dropped: u64,
    pub sink_panicked: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSnapshot {
    pub enqueued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub abandoned: u64,
    pub latency: DurationSnapshot,
    pub reasks: u64,
    pub rewrites: u64,
    pub sanitizations: u64,
    pub fallbacks: u64,
}

/// Serializable copy of [`Metrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub scheduler: SchedulerSnapshot,
    pub dispatch: DispatchSnapshot,
    pub hub: HubSnapshot,
    pub generation: GenerationSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;

    #[test]
    fn worker_outcomes_are_tallied_per_name() {
        let m = Metrics::new();
        let market: Arc<str> = Arc::from("market");
        let weather: Arc<str> = Arc::from("weather");

        m.record_worker(&market, &WorkerOutcome::Succeeded, Duration::from_millis(10));
        m.record_worker(
            &market,
            &WorkerOutcome::Failed(WorkerError::fail("boom")),
            Duration::from_millis(30),
        );
        m.record_worker(
            &weather,
            &WorkerOutcome::TimedOut(Duration::from_millis(5)),
            Duration::from_millis(5),
        );

        let snap = m.snapshot();
        let market = &snap.scheduler.workers["market"];
        assert_eq!((market.success, market.error, market.timeout), (1, 1, 0));
        assert_eq!(market.duration.count, 2);
        assert_eq!(market.duration.max_ms, 30);
        assert_eq!(market.duration.avg_ms, 20.0);
        assert_eq!(snap.scheduler.workers["weather"].timeout, 1);
    }

    #[test]
    fn published_counts_are_keyed_by_type() {
        let m = Metrics::new();
        m.record_published("trade");
        m.record_published("trade");
        m.record_published("snapshot:weather");

        let snap = m.snapshot();
        assert_eq!(snap.hub.published["trade"], 2);
        assert_eq!(snap.hub.published["snapshot:weather"], 1);
    }

    #[test]
    fn average_latency_is_zero_without_samples() {
        let m = Metrics::new();
        assert_eq!(m.snapshot().generation.latency.avg_ms, 0.0);

        m.record_request_processed(Duration::from_millis(40));
        m.record_request_processed(Duration::from_millis(60));
        assert_eq!(m.snapshot().generation.latency.avg_ms, 50.0);
    }

    #[test]
    fn snapshot_serializes() {
        let m = Metrics::new();
        m.record_dispatch_dropped();
        let v = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(v["dispatch"]["dropped"], 1);
    }
}
