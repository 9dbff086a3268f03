//! # Dispatch queue: enqueue now, persist and broadcast later.
//!
//! ```text
//! producers (workers, generation pool)
//!   DispatchHandle::enqueue(event)             ──► [unbounded mpsc] ──► DispatchConsumer
//!   DispatchHandle::enqueue_snapshot(snapshot) ──┘                        ├─► store.persist*(..)
//!                                                                         │     └─ Err → count, log, skip broadcast
//!                                                                         └─► hub.publish / publish_snapshot
//!                                                                               └─ Err → count, log at debug
//! ```
//!
//! ## Rules
//! - Events and snapshots share one queue and one lifecycle: persisted, then broadcast
//!   on their own hub channel.
//! - Enqueueing never blocks. It fails only once the consumer has closed the queue;
//!   the entry is then counted as dropped.
//! - One consumer, strict FIFO: persistence order equals enqueue order.
//! - Persistence and broadcast failures (including panics in the store) are isolated
//!   to the event at hand.
//! - On shutdown the consumer closes the queue and drains what was already queued.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::store::EventStore;
use crate::error::{DispatchError, StoreError, panic_message};
use crate::events::{Event, Snapshot};
use crate::hub::{FanOutHub, HubMessage};
use crate::metrics::Metrics;

/// Creates a connected handle/consumer pair.
pub fn channel(
    store: Arc<dyn EventStore>,
    hub: Arc<FanOutHub>,
    metrics: Arc<Metrics>,
) -> (DispatchHandle, DispatchConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = DispatchHandle {
        tx,
        metrics: Arc::clone(&metrics),
    };
    let consumer = DispatchConsumer {
        rx,
        store,
        hub,
        metrics,
    };
    (handle, consumer)
}

/// Producer side. Cheap to clone; hand one to every worker that emits events.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<HubMessage>,
    metrics: Arc<Metrics>,
}

impl DispatchHandle {
    /// Queues `event` for persistence and broadcast. Returns immediately.
    pub fn enqueue(&self, event: Event) -> Result<(), DispatchError> {
        self.send(HubMessage::Event(event))
    }

    /// Queues `snapshot` for persistence and broadcast on the snapshot channel.
    pub fn enqueue_snapshot(&self, snapshot: Snapshot) -> Result<(), DispatchError> {
        self.send(HubMessage::Snapshot(snapshot))
    }

    fn send(&self, msg: HubMessage) -> Result<(), DispatchError> {
        match self.tx.send(msg) {
            Ok(()) => {
                self.metrics.record_dispatch_enqueued();
                Ok(())
            }
            Err(mpsc::error::SendError(msg)) => {
                self.metrics.record_dispatch_dropped();
                tracing::warn!(
                    kind = msg.kind(),
                    trace_id = %msg.event().meta().trace_id,
                    "dispatch queue closed; entry dropped"
                );
                Err(DispatchError::Closed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single consumer of the dispatch queue.
pub struct DispatchConsumer {
    rx: mpsc::UnboundedReceiver<HubMessage>,
    store: Arc<dyn EventStore>,
    hub: Arc<FanOutHub>,
    metrics: Arc<Metrics>,
}

impl DispatchConsumer {
    /// Processes events until `shutdown` fires, then closes the queue and drains it.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("dispatch consumer started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(msg) => self.process(msg).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(msg) = self.rx.recv().await {
            self.process(msg).await;
            drained += 1;
        }
        tracing::info!(drained, "dispatch consumer stopped");
    }

    /// Processes whatever is queued right now without waiting for more.
    pub async fn drain_pending(&mut self) -> usize {
        let mut n = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.process(msg).await;
            n += 1;
        }
        n
    }

    async fn process(&self, msg: HubMessage) {
        let persist = match &msg {
            HubMessage::Event(event) => self.store.persist(event),
            HubMessage::Snapshot(snapshot) => self.store.persist_snapshot(snapshot),
        };
        let persisted = AssertUnwindSafe(persist)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(StoreError::Unavailable {
                    reason: format!("store panicked: {}", panic_message(panic.as_ref())),
                })
            });

        if let Err(err) = persisted {
            self.metrics.record_persist_failed();
            tracing::warn!(
                kind = msg.kind(),
                id = %msg.event().id(),
                error = %err,
                label = err.as_label(),
                "persist failed; entry not broadcast"
            );
            return;
        }
        self.metrics.record_persisted();

        let kind = msg.kind().to_string();
        let published = match msg {
            HubMessage::Event(event) => self.hub.publish(event),
            HubMessage::Snapshot(snapshot) => self.hub.publish_snapshot(snapshot),
        };
        if let Err(err) = published {
            self.metrics.record_broadcast_failed();
            tracing::debug!(kind, error = %err, "broadcast skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<FanOutHub>, Arc<Metrics>, DispatchHandle, DispatchConsumer) {
        let metrics = Metrics::new();
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(FanOutHub::new(64, Arc::clone(&metrics)));
        let (handle, consumer) = channel(store.clone(), Arc::clone(&hub), Arc::clone(&metrics));
        (store, hub, metrics, handle, consumer)
    }

    #[tokio::test]
    async fn single_producer_order_is_preserved() {
        let (store, hub, _metrics, handle, mut consumer) = setup();
        let mut rx = hub.subscribe_events();

        for name in ["a", "b", "c"] {
            handle.enqueue(Event::new(name, "x")).unwrap();
        }
        assert_eq!(consumer.drain_pending().await, 3);

        let stored: Vec<String> = store.events().iter().map(|e| e.kind().to_string()).collect();
        assert_eq!(stored, vec!["a", "b", "c"]);
        for expected in ["a", "b", "c"] {
            assert_eq!(rx.recv().await.unwrap().kind(), expected);
        }
    }

    #[tokio::test]
    async fn persist_failure_skips_broadcast_and_continues() {
        let (store, hub, metrics, handle, mut consumer) = setup();
        let mut rx = hub.subscribe_events();
        store.fail_on_type("bad");

        handle.enqueue(Event::new("bad", "x")).unwrap();
        handle.enqueue(Event::new("good", "x")).unwrap();
        consumer.drain_pending().await;

        assert_eq!(rx.recv().await.unwrap().kind(), "good");
        assert!(rx.try_recv().is_err());
        let snap = metrics.snapshot().dispatch;
        assert_eq!((snap.persisted, snap.persist_failed), (1, 1));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_counted_not_fatal() {
        let (store, _hub, metrics, handle, mut consumer) = setup();
        handle.enqueue(Event::new("lonely", "x")).unwrap();
        consumer.drain_pending().await;

        assert_eq!(store.len(), 1);
        assert_eq!(metrics.snapshot().dispatch.broadcast_failed, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_then_rejects() {
        let (store, _hub, metrics, handle, consumer) = setup();
        handle.enqueue(Event::new("queued", "x")).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        consumer.run(token).await;

        assert_eq!(store.len(), 1);
        assert!(handle.is_closed());
        assert_eq!(handle.enqueue(Event::new("late", "x")), Err(DispatchError::Closed));
        assert_eq!(metrics.snapshot().dispatch.dropped, 1);
    }

    #[tokio::test]
    async fn snapshots_are_persisted_then_broadcast_on_their_channel() {
        let (store, hub, metrics, handle, mut consumer) = setup();
        let mut snapshots = hub.subscribe_snapshots();
        let mut events = hub.subscribe_events();
        store.fail_on_type("storm");

        handle.enqueue_snapshot(Snapshot::new("storm", "valley")).unwrap();
        handle.enqueue_snapshot(Snapshot::new("weather", "valley")).unwrap();
        assert_eq!(consumer.drain_pending().await, 2);

        assert_eq!(snapshots.recv().await.unwrap().kind(), "weather");
        assert!(snapshots.try_recv().is_err());
        assert!(events.try_recv().is_err());

        let stored: Vec<String> = store.snapshots().iter().map(|s| s.kind().to_string()).collect();
        assert_eq!(stored, vec!["weather"]);
        assert!(store.events().is_empty());
        let snap = metrics.snapshot().dispatch;
        assert_eq!((snap.persisted, snap.persist_failed), (1, 1));
    }
}
