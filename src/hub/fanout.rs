//! # Fan-out hub: broadcasts persisted events and environment snapshots.
//!
//! ```text
//! publish(event) ───────► per-type counter
//!        │           ├──► Bus<Event>     ──► subscribe_events()    (SSE, tests)
//!        │           └──► SinkSet        ──► push sinks (bounded, isolated)
//! publish_snapshot(snap) ► counter "snapshot:<type>"
//!                    ├──► Bus<Snapshot>  ──► subscribe_snapshots()
//!                    └──► SinkSet
//! ```
//!
//! ## Rules
//! - No replay: a subscriber sees only publishes made after it subscribed.
//! - A lagging subscriber skips the oldest messages and is told how many.
//! - Push sinks never block or fail the primary channels.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::BroadcastError;
use crate::events::{Bus, Event, Snapshot};
use crate::hub::sink::{HubMessage, PushSink};
use crate::hub::sink_set::SinkSet;
use crate::metrics::Metrics;

/// Prefix for snapshot publish counters.
pub const SNAPSHOT_KEY_PREFIX: &str = "snapshot:";

pub struct FanOutHub {
    events: Bus<Event>,
    snapshots: Bus<Snapshot>,
    sinks: RwLock<Option<SinkSet>>,
    metrics: Arc<Metrics>,
}

impl FanOutHub {
    /// Hub without push sinks.
    pub fn new(bus_capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            events: Bus::new(bus_capacity),
            snapshots: Bus::new(bus_capacity),
            sinks: RwLock::new(None),
            metrics,
        }
    }

    /// Hub with push sinks; spawns one worker per sink (requires a tokio runtime).
    pub fn with_sinks(
        bus_capacity: usize,
        sinks: Vec<Arc<dyn PushSink>>,
        sink_queue_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let hub = Self::new(bus_capacity, Arc::clone(&metrics));
        if !sinks.is_empty() {
            *hub.sinks.write() = Some(SinkSet::new(sinks, sink_queue_capacity, metrics));
        }
        hub
    }

    /// Broadcasts a persisted event.
    ///
    /// Returns the number of live subscribers reached, or
    /// [`BroadcastError::NoSubscribers`]. Push sinks are served either way.
    pub fn publish(&self, event: Event) -> Result<usize, BroadcastError> {
        self.metrics.record_published(event.kind());
        self.emit_to_sinks(|| HubMessage::Event(event.clone()));
        self.events.send(event)
    }

    /// Broadcasts a persisted environment snapshot on the snapshot channel.
    pub fn publish_snapshot(&self, snapshot: Snapshot) -> Result<usize, BroadcastError> {
        self.metrics
            .record_published(&format!("{SNAPSHOT_KEY_PREFIX}{}", snapshot.kind()));
        self.emit_to_sinks(|| HubMessage::Snapshot(snapshot.clone()));
        self.snapshots.send(snapshot)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Live receivers on the event channel.
    pub fn event_subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    /// Live receivers on the snapshot channel.
    pub fn snapshot_subscribers(&self) -> usize {
        self.snapshots.receiver_count()
    }

    /// Detaches push sinks and waits for them to flush their queues.
    ///
    /// Later publishes reach only the broadcast channels.
    pub async fn shutdown_sinks(&self) {
        let sinks = self.sinks.write().take();
        if let Some(set) = sinks {
            set.shutdown().await;
        }
    }

    fn emit_to_sinks(&self, msg: impl FnOnce() -> HubMessage) {
        if let Some(set) = self.sinks.read().as_ref() {
            set.emit(msg());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushSink for Recorder {
        async fn on_message(&self, msg: &HubMessage) {
            self.seen.lock().push(msg.kind().to_string());
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Exploding;

    #[async_trait]
    impl PushSink for Exploding {
        async fn on_message(&self, _msg: &HubMessage) {
            panic!("sink exploded");
        }
        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    struct Stalled;

    #[async_trait]
    impl PushSink for Stalled {
        async fn on_message(&self, _msg: &HubMessage) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn queue_capacity(&self) -> Option<usize> {
            Some(1)
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_reports_error_but_counts() {
        let metrics = Metrics::new();
        let hub = FanOutHub::new(8, Arc::clone(&metrics));
        assert_eq!(
            hub.publish(Event::new("trade", "harbor")),
            Err(BroadcastError::NoSubscribers)
        );
        assert_eq!(metrics.snapshot().hub.published["trade"], 1);
    }

    #[tokio::test]
    async fn channels_are_separate() {
        let metrics = Metrics::new();
        let hub = FanOutHub::new(8, Arc::clone(&metrics));
        let mut events = hub.subscribe_events();
        let mut snaps = hub.subscribe_snapshots();

        hub.publish(Event::new("trade", "harbor")).unwrap();
        hub.publish_snapshot(Snapshot::new("weather", "valley")).unwrap();

        assert_eq!(events.recv().await.unwrap().kind(), "trade");
        assert!(events.try_recv().is_err());
        assert_eq!(snaps.recv().await.unwrap().kind(), "weather");
        assert_eq!(metrics.snapshot().hub.published["snapshot:weather"], 1);
    }

    #[tokio::test]
    async fn panicking_sink_does_not_affect_others() {
        let metrics = Metrics::new();
        let recorder = Arc::new(Recorder::default());
        let hub = FanOutHub::with_sinks(
            8,
            vec![Arc::new(Exploding), recorder.clone()],
            16,
            Arc::clone(&metrics),
        );

        hub.publish(Event::new("a", "x")).ok();
        hub.publish_snapshot(Snapshot::new("b", "x")).ok();
        hub.shutdown_sinks().await;

        assert_eq!(*recorder.seen.lock(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(metrics.snapshot().hub.sink_panicked, 2);
    }

    #[tokio::test]
    async fn full_sink_queue_drops_for_that_sink_only() {
        let metrics = Metrics::new();
        let hub = FanOutHub::with_sinks(8, vec![Arc::new(Stalled)], 16, Arc::clone(&metrics));
        let mut rx = hub.subscribe_events();

        for _ in 0..5 {
            hub.publish(Event::new("tick", "x")).unwrap();
        }
        for _ in 0..5 {
            assert_eq!(rx.recv().await.unwrap().kind(), "tick");
        }
        // One message in flight, one queued, the rest dropped.
        assert!(metrics.snapshot().hub.sink_dropped >= 3);
    }
}
