//! # Worker registry.
//!
//! Holds the [`WorkerRegistration`]s the scheduler drives. Registration normally
//! happens once at startup, but the registry can be changed at any time: every cycle
//! resolves a fresh worker list.
//!
//! ## Resolution
//! ```text
//! registrations (registration order)
//!   └─► stable partition: first Priority registration → front
//!         └─► factories invoked → Vec<ResolvedWorker>
//! ```
//!
//! ## Rules
//! - Names are unique; registering a duplicate name fails.
//! - At most one worker is priority per cycle: the first registered `Priority` wins,
//!   later ones run as normal workers (a warning is logged).
//! - Every other worker keeps its registration order.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::workers::{WorkerOrder, WorkerRef, WorkerRegistration};

/// A worker instance produced for one cycle.
pub struct ResolvedWorker {
    pub name: Arc<str>,
    pub order: WorkerOrder,
    pub worker: WorkerRef,
}

/// Ordered, name-unique set of worker registrations.
#[derive(Default)]
pub struct WorkerRegistry {
    entries: RwLock<Vec<WorkerRegistration>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration at the end of the order.
    pub fn register(&self, reg: WorkerRegistration) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.name() == reg.name()) {
            return Err(RegistryError::Duplicate {
                name: reg.name().to_string(),
            });
        }
        entries.push(reg);
        Ok(())
    }

    /// Removes a registration by name. Returns `true` if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name() != name);
        entries.len() != before
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Instantiates the worker list for one cycle, priority worker first.
    ///
    /// Factories run outside the lock.
    pub fn resolve(&self) -> Vec<ResolvedWorker> {
        let regs: Vec<WorkerRegistration> = self.entries.read().clone();

        let mut priority: Option<usize> = None;
        for (idx, reg) in regs.iter().enumerate() {
            if reg.order() != WorkerOrder::Priority {
                continue;
            }
            match priority {
                None => priority = Some(idx),
                Some(first) => tracing::warn!(
                    worker = reg.name(),
                    priority = regs[first].name(),
                    "more than one priority worker registered; running as normal"
                ),
            }
        }

        let mut out = Vec::with_capacity(regs.len());
        if let Some(idx) = priority {
            out.push(resolve_one(&regs[idx], WorkerOrder::Priority));
        }
        out.extend(
            regs.iter()
                .enumerate()
                .filter(|(idx, _)| Some(*idx) != priority)
                .map(|(_, reg)| resolve_one(reg, WorkerOrder::Normal)),
        );
        out
    }
}

fn resolve_one(reg: &WorkerRegistration, order: WorkerOrder) -> ResolvedWorker {
    ResolvedWorker {
        name: reg.name_arc(),
        order,
        worker: reg.instantiate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::workers::{WorkerContext, WorkerFn};

    fn reg(name: &'static str) -> WorkerRegistration {
        WorkerRegistration::shared(WorkerFn::arc(name, |_ctx: WorkerContext| async {
            Ok::<_, WorkerError>(())
        }))
    }

    fn order_of(resolved: &[ResolvedWorker]) -> Vec<(&str, WorkerOrder)> {
        resolved.iter().map(|r| (&*r.name, r.order)).collect()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = WorkerRegistry::new();
        registry.register(reg("market")).unwrap();
        let err = registry.register(reg("market")).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate { name: "market".into() });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn priority_moves_to_front_others_keep_order() {
        let registry = WorkerRegistry::new();
        registry.register(reg("a")).unwrap();
        registry.register(reg("b")).unwrap();
        registry.register(reg("world").priority()).unwrap();
        registry.register(reg("c")).unwrap();

        let resolved = registry.resolve();
        assert_eq!(
            order_of(&resolved),
            vec![
                ("world", WorkerOrder::Priority),
                ("a", WorkerOrder::Normal),
                ("b", WorkerOrder::Normal),
                ("c", WorkerOrder::Normal),
            ]
        );
    }

    #[test]
    fn only_first_priority_is_honored() {
        let registry = WorkerRegistry::new();
        registry.register(reg("a")).unwrap();
        registry.register(reg("p1").priority()).unwrap();
        registry.register(reg("p2").priority()).unwrap();

        let resolved = registry.resolve();
        assert_eq!(
            order_of(&resolved),
            vec![
                ("p1", WorkerOrder::Priority),
                ("a", WorkerOrder::Normal),
                ("p2", WorkerOrder::Normal),
            ]
        );
    }

    #[test]
    fn factory_runs_on_every_resolve() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let registry = WorkerRegistry::new();
        registry
            .register(WorkerRegistration::new("fresh", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                WorkerFn::arc("fresh", |_ctx: WorkerContext| async {
                    Ok::<_, WorkerError>(())
                }) as WorkerRef
            }))
            .unwrap();

        registry.resolve();
        registry.resolve();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister_removes_by_name() {
        let registry = WorkerRegistry::new();
        registry.register(reg("a")).unwrap();
        registry.register(reg("b")).unwrap();
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.names(), vec!["b".to_string()]);
    }
}
