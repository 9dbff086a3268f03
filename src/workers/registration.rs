//! # Worker registrations.
//!
//! A [`WorkerRegistration`] is what the registry stores: a unique name, a
//! [`WorkerOrder`] and a factory producing the worker instance used for a cycle.
//! Factories run once per cycle, so a worker can be rebuilt with fresh state each
//! tick or shared across ticks ([`WorkerRegistration::shared`]).
//!
//! ## Example
//! ```rust
//! use worldtick::{WorkerFn, WorkerContext, WorkerError, WorkerOrder, WorkerRegistration};
//!
//! let reg = WorkerRegistration::shared(WorkerFn::arc("world-state", |_ctx: WorkerContext| async {
//!     Ok::<_, WorkerError>(())
//! }))
//! .priority();
//!
//! assert_eq!(reg.name(), "world-state");
//! assert_eq!(reg.order(), WorkerOrder::Priority);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::workers::worker::WorkerRef;

/// Builds the worker instance for one cycle.
pub type WorkerFactory = Arc<dyn Fn() -> WorkerRef + Send + Sync>;

/// Execution order within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerOrder {
    /// Runs alone, before every other worker. At most one is honored per cycle.
    Priority,
    /// Runs concurrently with the other normal workers.
    #[default]
    Normal,
}

/// Registered worker: name, order and factory.
#[derive(Clone)]
pub struct WorkerRegistration {
    name: Arc<str>,
    order: WorkerOrder,
    factory: WorkerFactory,
}

impl WorkerRegistration {
    /// Registers a factory under `name` with [`WorkerOrder::Normal`].
    pub fn new<F>(name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn() -> WorkerRef + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            order: WorkerOrder::Normal,
            factory: Arc::new(factory),
        }
    }

    /// Registers one shared instance, named after [`Worker::name`](crate::Worker::name).
    pub fn shared(worker: WorkerRef) -> Self {
        let name: Arc<str> = Arc::from(worker.name());
        Self::new(name, move || worker.clone())
    }

    /// Marks this registration as the priority worker.
    pub fn priority(self) -> Self {
        self.with_order(WorkerOrder::Priority)
    }

    pub fn with_order(mut self, order: WorkerOrder) -> Self {
        self.order = order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn order(&self) -> WorkerOrder {
        self.order
    }

    /// Produces the instance for one cycle.
    pub fn instantiate(&self) -> WorkerRef {
        (self.factory)()
    }
}

impl fmt::Debug for WorkerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistration")
            .field("name", &self.name)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
