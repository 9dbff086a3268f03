//! # Event persistence boundary.
//!
//! [`EventStore`] is the only thing the dispatch consumer knows about storage.
//! [`MemoryStore`] keeps events and snapshots in process and can be told to reject
//! types, which is how tests exercise persistence failures.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::events::{Event, Snapshot};

/// Durable sink for dispatched events.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persists one event. Called sequentially, in queue order.
    async fn persist(&self, event: &Event) -> Result<(), StoreError>;

    /// Persists one snapshot. Defaults to storing its event shape via [`persist`].
    ///
    /// [`persist`]: EventStore::persist
    async fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.persist(snapshot.event()).await
    }
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<Event>>,
    snapshots: Mutex<Vec<Snapshot>>,
    reject: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every later event or snapshot of type `kind` with [`StoreError::Rejected`].
    pub fn fail_on_type(&self, kind: impl Into<String>) {
        self.reject.lock().insert(kind.into());
    }

    /// Copy of the stored events in persistence order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Copy of the stored snapshots in persistence order.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().clone()
    }

    /// Stored events, snapshots excluded.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl MemoryStore {
    fn check(&self, kind: &str) -> Result<(), StoreError> {
        if self.reject.lock().contains(kind) {
            return Err(StoreError::Rejected {
                reason: format!("type '{kind}' is rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn persist(&self, event: &Event) -> Result<(), StoreError> {
        self.check(event.kind())?;
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.check(snapshot.kind())?;
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}
