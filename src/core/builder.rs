use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::registry::WorkerRegistry;
use crate::core::runtime::Runtime;
use crate::dispatch::{self, EventStore, MemoryStore};
use crate::error::RegistryError;
use crate::events::Bus;
use crate::generation::{GenerationClient, GenerationPool, OfflineClient};
use crate::hub::{FanOutHub, PushSink};
use crate::metrics::{Metrics, register_metrics};
use crate::workers::WorkerRegistration;

/// Assembles a [`Runtime`] from a [`Config`] and optional collaborators.
///
/// Defaults: [`MemoryStore`] for persistence, [`OfflineClient`] for generation
/// (every request ends in the fallback text), no push sinks, no workers.
pub struct RuntimeBuilder {
    cfg: Config,
    store: Option<Arc<dyn EventStore>>,
    client: Option<Arc<dyn GenerationClient>>,
    sinks: Vec<Arc<dyn PushSink>>,
    workers: Vec<WorkerRegistration>,
}

impl RuntimeBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            store: None,
            client: None,
            sinks: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// Persistence backend of the dispatch consumer.
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// External text-generation service.
    pub fn with_client(mut self, client: Arc<dyn GenerationClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Secondary push delivery for everything the hub publishes.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn PushSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Adds one worker registration.
    pub fn with_worker(mut self, reg: WorkerRegistration) -> Self {
        self.workers.push(reg);
        self
    }

    /// Adds worker registrations in order.
    pub fn with_workers(mut self, regs: impl IntoIterator<Item = WorkerRegistration>) -> Self {
        self.workers.extend(regs);
        self
    }

    /// Builds the runtime. Push sinks start their workers here, so call this
    /// inside a tokio runtime when sinks are configured.
    ///
    /// Fails if two workers share a name.
    pub fn build(self) -> Result<Arc<Runtime>, RegistryError> {
        register_metrics();

        let metrics = Metrics::new();
        let bus_capacity = self.cfg.bus_capacity_clamped();

        let registry = Arc::new(WorkerRegistry::new());
        for reg in self.workers {
            registry.register(reg)?;
        }

        let hub = Arc::new(if self.sinks.is_empty() {
            FanOutHub::new(bus_capacity, Arc::clone(&metrics))
        } else {
            FanOutHub::with_sinks(
                bus_capacity,
                self.sinks,
                self.cfg.hub.sink_queue_capacity,
                Arc::clone(&metrics),
            )
        });

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn EventStore>);
        let (dispatch, consumer) = dispatch::channel(store, Arc::clone(&hub), Arc::clone(&metrics));
        // Without a consumer the queue is closed: every enqueue is counted as dropped.
        let consumer = if self.cfg.dispatch.enabled {
            Some(consumer)
        } else {
            drop(consumer);
            tracing::info!("dispatch disabled; events will be dropped");
            None
        };

        let client = self
            .client
            .unwrap_or_else(|| Arc::new(OfflineClient) as Arc<dyn GenerationClient>);
        let (pool, requests) = GenerationPool::new(
            self.cfg.generation.clone(),
            client,
            dispatch.clone(),
            Arc::clone(&metrics),
        );
        let pool = if self.cfg.generation.enabled {
            Some(pool)
        } else {
            pool.close_intake();
            None
        };

        Ok(Arc::new(Runtime {
            tick_bus: Bus::new(bus_capacity),
            cfg: self.cfg,
            registry,
            metrics,
            hub,
            dispatch,
            requests,
            consumer: Mutex::new(consumer),
            pool: Mutex::new(pool),
            token: CancellationToken::new(),
            dispatch_token: CancellationToken::new(),
        }))
    }
}

impl Runtime {
    /// Shorthand for [`RuntimeBuilder::new`].
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::generation::{Admission, GenerationRequest};
    use crate::scope::Scope;
    use crate::workers::{WorkerContext, WorkerFn};

    fn noop(name: &'static str) -> WorkerRegistration {
        WorkerRegistration::shared(WorkerFn::arc(name, |_ctx: WorkerContext| async {
            Ok::<_, crate::WorkerError>(())
        }))
    }

    #[test]
    fn duplicate_worker_names_fail_the_build() {
        let res = RuntimeBuilder::new(Config::default())
            .with_worker(noop("market"))
            .with_worker(noop("market"))
            .build();
        assert!(matches!(res, Err(RegistryError::Duplicate { name }) if name == "market"));
    }

    #[test]
    fn disabled_pipelines_drop_and_count() {
        let mut cfg = Config::default();
        cfg.dispatch.enabled = false;
        cfg.generation.enabled = false;
        let rt = RuntimeBuilder::new(cfg).build().unwrap();

        assert!(rt.dispatch().enqueue(Event::new("x", "y")).is_err());
        assert_eq!(
            rt.requests()
                .enqueue(GenerationRequest::new("npc", "baker", Scope::root())),
            Admission::Closed
        );
        let snap = rt.metrics().snapshot();
        assert_eq!(snap.dispatch.dropped, 1);
        assert_eq!(snap.generation.dropped, 1);
    }

    #[test]
    fn workers_are_registered_in_order() {
        let rt = Runtime::builder(Config::default())
            .with_workers([noop("weather"), noop("market"), noop("npcs")])
            .build()
            .unwrap();
        assert_eq!(rt.registry().names(), vec!["weather", "market", "npcs"]);
    }
}
