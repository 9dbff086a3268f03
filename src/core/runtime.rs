//! # Runtime: owns every component, starts them and stops them within a grace period.
//!
//! ```text
//! Runtime::run()
//!   spawn (stage 1, root token):      TickScheduler::run ── GenerationPool::run
//!   spawn (stage 2, dispatch token):  DispatchConsumer::run
//!
//! wait: OS signal | Runtime::shutdown() | every component exited
//!
//! shutdown (one grace deadline for everything):
//!   publish ShutdownRequested
//!   cancel root token ── join stage 1   (cycle in flight finishes, pool finishes
//!                                        in-flight requests and drops the queue)
//!   cancel dispatch token ── join stage 2  (consumer drains what stage 1 produced)
//!   flush push sinks
//!   ├─ all joined → publish AllStoppedWithin, Ok(())
//!   └─ deadline   → publish GraceExceeded, Err(GraceExceeded { stuck })
//! ```
//!
//! The dispatch consumer stops last so that the terminal events of the last cycle and
//! of in-flight generation requests are still persisted and broadcast.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Router;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::registry::WorkerRegistry;
use crate::core::scheduler::TickScheduler;
use crate::core::shutdown;
use crate::dispatch::{DispatchConsumer, DispatchHandle};
use crate::error::{RuntimeError, panic_message};
use crate::events::{Bus, TickEvent, TickEventKind};
use crate::generation::{GenerationPool, RequestHandle};
use crate::hub::{FanOutHub, http};
use crate::metrics::Metrics;

/// Long-running components, named as they appear in `GraceExceeded.stuck`.
const SCHEDULER: &str = "scheduler";
const GENERATION_POOL: &str = "generation_pool";
const DISPATCH_CONSUMER: &str = "dispatch_consumer";
const PUSH_SINKS: &str = "push_sinks";

/// Running set of named component tasks.
#[derive(Default)]
struct Stage {
    set: JoinSet<&'static str>,
    pending: Vec<&'static str>,
}

impl Stage {
    /// Spawns `fut`; a panic inside it is logged and the component counts as stopped.
    fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.push(name);
        self.set.spawn(async move {
            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                tracing::error!(
                    component = name,
                    info = %panic_message(panic.as_ref()),
                    "component panicked"
                );
            }
            name
        });
    }

    /// Joins until every task finished (`true`) or `deadline` passed (`false`).
    async fn join_until(&mut self, deadline: Instant) -> bool {
        let pending = &mut self.pending;
        let set = &mut self.set;
        let joined = time::timeout_at(deadline, async {
            while let Some(res) = set.join_next().await {
                match res {
                    Ok(name) => {
                        pending.retain(|n| *n != name);
                        tracing::debug!(component = name, "component stopped");
                    }
                    Err(err) => tracing::error!(error = %err, "component task failed"),
                }
            }
        })
        .await;
        joined.is_ok()
    }

    async fn join_all(&mut self) {
        while self.set.join_next().await.is_some() {}
        self.pending.clear();
    }
}

/// Owns the scheduler, both pipelines and the hub.
///
/// Built with [`RuntimeBuilder`](crate::RuntimeBuilder); driven by [`Runtime::run`].
pub struct Runtime {
    pub(super) cfg: Config,
    pub(super) registry: Arc<WorkerRegistry>,
    pub(super) metrics: Arc<Metrics>,
    pub(super) tick_bus: Bus<TickEvent>,
    pub(super) hub: Arc<FanOutHub>,
    pub(super) dispatch: DispatchHandle,
    pub(super) requests: RequestHandle,
    pub(super) consumer: Mutex<Option<DispatchConsumer>>,
    pub(super) pool: Mutex<Option<GenerationPool>>,
    /// Stage 1 components and HTTP streams.
    pub(super) token: CancellationToken,
    /// Stage 2: the dispatch consumer.
    pub(super) dispatch_token: CancellationToken,
}

impl Runtime {
    /// Runs every enabled component until an OS signal or [`Runtime::shutdown`],
    /// then stops them within [`Config::grace`].
    ///
    /// Returns `Ok(())` right away when no component is enabled. Components are
    /// taken on the first call, so a second call returns right away too.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let (mut stage_one, mut stage_two) = self.spawn_components();
        tracing::info!(
            scheduler = self.cfg.scheduler.enabled,
            dispatch = self.cfg.dispatch.enabled,
            generation = self.cfg.generation.enabled,
            workers = self.registry.len(),
            "runtime started"
        );

        let signal_error = tokio::select! {
            res = shutdown::wait_for_signal() => match res {
                Ok(sig) => {
                    tracing::info!(signal = %sig, "shutdown signal received");
                    None
                }
                Err(err) => {
                    tracing::error!(error = %err, "cannot listen for shutdown signals; stopping");
                    Some(err)
                }
            },
            _ = self.token.cancelled() => {
                tracing::info!("shutdown requested");
                None
            }
            _ = async {
                stage_one.join_all().await;
                stage_two.join_all().await;
            } => {
                return Ok(());
            }
        };

        let stopped = self.stop(stage_one, stage_two).await;
        match signal_error {
            Some(err) => Err(RuntimeError::Signal(err)),
            None => stopped,
        }
    }

    /// Requests a graceful shutdown of a running [`Runtime::run`].
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Token cancelled when shutdown begins; hand it to servers and custom loops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Worker registry; registrations made while running apply from the next tick.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Scheduler and shutdown lifecycle notifications.
    pub fn tick_bus(&self) -> &Bus<TickEvent> {
        &self.tick_bus
    }

    pub fn hub(&self) -> &Arc<FanOutHub> {
        &self.hub
    }

    /// Producer side of the dispatch queue.
    pub fn dispatch(&self) -> DispatchHandle {
        self.dispatch.clone()
    }

    /// Producer side of the generation queue.
    pub fn requests(&self) -> RequestHandle {
        self.requests.clone()
    }

    /// HTTP routes (SSE streams and metrics); streams end when shutdown begins.
    pub fn router(&self) -> Router {
        http::router(
            Arc::clone(&self.hub),
            Arc::clone(&self.metrics),
            self.shutdown_token(),
        )
    }

    fn spawn_components(&self) -> (Stage, Stage) {
        let mut stage_one = Stage::default();
        let mut stage_two = Stage::default();

        if self.cfg.scheduler.enabled {
            let scheduler = TickScheduler::new(
                self.cfg.scheduler.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.metrics),
                self.tick_bus.clone(),
            );
            let token = self.token.child_token();
            stage_one.spawn(SCHEDULER, async move { scheduler.run(token).await });
        }

        if let Some(pool) = self.pool.lock().take() {
            stage_one.spawn(GENERATION_POOL, pool.run(self.token.child_token()));
        }

        if let Some(consumer) = self.consumer.lock().take() {
            stage_two.spawn(DISPATCH_CONSUMER, consumer.run(self.dispatch_token.clone()));
        }

        (stage_one, stage_two)
    }

    async fn stop(&self, mut stage_one: Stage, mut stage_two: Stage) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let deadline = Instant::now() + grace;
        self.tick_bus
            .publish(TickEvent::now(TickEventKind::ShutdownRequested));

        self.token.cancel();
        let mut in_time = stage_one.join_until(deadline).await;

        self.dispatch_token.cancel();
        in_time &= stage_two.join_until(deadline).await;

        let mut stuck: Vec<String> = stage_one
            .pending
            .iter()
            .chain(stage_two.pending.iter())
            .map(|n| n.to_string())
            .collect();

        if time::timeout_at(deadline, self.hub.shutdown_sinks()).await.is_err() {
            stuck.push(PUSH_SINKS.to_string());
            in_time = false;
        }

        if in_time {
            self.tick_bus
                .publish(TickEvent::now(TickEventKind::AllStoppedWithin));
            tracing::info!("all components stopped within grace period");
            Ok(())
        } else {
            self.tick_bus.publish(
                TickEvent::now(TickEventKind::GraceExceeded).with_reason(stuck.join(",")),
            );
            tracing::warn!(grace_ms = grace.as_millis() as u64, ?stuck, "grace period exceeded");
            Err(RuntimeError::GraceExceeded { grace, stuck })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::RuntimeBuilder;
    use crate::workers::{WorkerFn, WorkerRegistration};
    use crate::{Event, WorkerContext, WorkerError};
    use std::time::Duration;

    fn quiet_config() -> Config {
        let mut cfg = Config::default();
        cfg.scheduler.interval = Duration::from_millis(20);
        cfg.grace = Duration::from_secs(2);
        cfg
    }

    #[tokio::test]
    async fn explicit_shutdown_stops_everything() {
        let rt = RuntimeBuilder::new(quiet_config()).build().unwrap();
        let mut lifecycle = rt.tick_bus().subscribe();

        let running = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move { rt.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        rt.shutdown();

        assert!(running.await.unwrap().is_ok());
        let mut kinds = Vec::new();
        while let Ok(ev) = lifecycle.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&TickEventKind::ShutdownRequested));
        assert_eq!(kinds.last(), Some(&TickEventKind::AllStoppedWithin));
    }

    #[tokio::test]
    async fn events_of_the_last_cycle_are_persisted() {
        let store = Arc::new(crate::dispatch::MemoryStore::new());
        let rt = RuntimeBuilder::new(quiet_config())
            .with_store(store.clone())
            .build()
            .unwrap();

        let dispatch = rt.dispatch();
        rt.registry()
            .register(WorkerRegistration::new("emitter", move || {
                let dispatch = dispatch.clone();
                WorkerFn::arc("emitter", move |_ctx: WorkerContext| {
                    let dispatch = dispatch.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        dispatch
                            .enqueue(Event::new("heartbeat", "square"))
                            .map_err(WorkerError::fail)
                    }
                })
            }))
            .unwrap();

        let running = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move { rt.run().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        rt.shutdown();
        running.await.unwrap().unwrap();

        // The cycle in flight at shutdown finished and its event went through dispatch.
        assert!(store.len() >= 1);
        assert_eq!(rt.metrics().snapshot().dispatch.dropped, 0);
    }

    #[tokio::test]
    async fn stuck_consumer_is_reported() {
        struct Stuck;

        #[async_trait::async_trait]
        impl crate::dispatch::EventStore for Stuck {
            async fn persist(&self, _event: &Event) -> Result<(), crate::error::StoreError> {
                std::future::pending().await
            }
        }

        let mut cfg = quiet_config();
        cfg.scheduler.enabled = false;
        cfg.generation.enabled = false;
        cfg.grace = Duration::from_millis(100);
        let rt = RuntimeBuilder::new(cfg)
            .with_store(Arc::new(Stuck))
            .build()
            .unwrap();
        rt.dispatch().enqueue(Event::new("x", "y")).unwrap();

        let running = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move { rt.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rt.shutdown();

        match running.await.unwrap() {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => {
                assert_eq!(stuck, vec!["dispatch_consumer".to_string()]);
            }
            other => panic!("expected GraceExceeded, got {other:?}"),
        }
    }
}
