//! # Broadcast bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking publishing from many sources (scheduler, runner, hub).
//!
//! ## Architecture
//! ```text
//! Publishers (many):              Receivers (many):
//!   scheduler ──┐                  ┌──► SSE client 1
//!   runner    ──┼────► Bus ────────┼──► SSE client 2
//!   hub       ──┘  (ring buffer)   └──► test observer
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent items for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No replay**: receivers only observe items sent after they subscribed.

use tokio::sync::broadcast;

use crate::error::BroadcastError;

/// Broadcast channel shared by many publishers and many receivers.
///
/// Cheap to clone (internally an `Arc`-backed sender).
#[derive(Debug)]
pub struct Bus<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Bus<T> {
    /// Creates a new bus with the given ring-buffer capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<T>(capacity.max(1));
        Self { tx }
    }

    /// Sends to every live receiver and reports how many there were.
    ///
    /// Returns [`BroadcastError::NoSubscribers`] when nobody is listening; the item is gone.
    pub fn send(&self, item: T) -> Result<usize, BroadcastError> {
        self.tx
            .send(item)
            .map_err(|_| BroadcastError::NoSubscribers)
    }

    /// Fire-and-forget variant of [`send`](Self::send).
    pub fn publish(&self, item: T) {
        let _ = self.tx.send(item);
    }

    /// Creates a receiver that observes items sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
