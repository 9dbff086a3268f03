//! # SinkSet: non-blocking fan-out over push sinks.
//!
//! ## What it guarantees
//! - `emit` returns immediately.
//! - Per-sink FIFO (queue order).
//! - Panics inside sinks are caught, logged and counted.
//!
//! ## What it does **not** guarantee
//! - No ordering across different sinks.
//! - No retries on per-sink queue overflow (the message is dropped for that sink).
//!
//! ```text
//!    emit(msg)
//!        │                        (Arc-clone per sink)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_message()
//!        ├────────────────► [queue S2] ─► worker S2 ─► on_message()
//!        └────────────────► [queue SN] ─► worker SN ─► on_message()
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::panic_message;
use crate::hub::sink::{HubMessage, PushSink};
use crate::metrics::Metrics;

struct SinkChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<HubMessage>>,
}

/// Per-sink bounded queues and worker tasks.
pub struct SinkSet {
    channels: Vec<SinkChannel>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl SinkSet {
    /// Spawns one worker per sink. Must be called inside a tokio runtime.
    pub fn new(sinks: Vec<Arc<dyn PushSink>>, default_capacity: usize, metrics: Arc<Metrics>) -> Self {
        let mut channels = Vec::with_capacity(sinks.len());
        let mut workers = Vec::with_capacity(sinks.len());

        for sink in sinks {
            let cap = sink.queue_capacity().unwrap_or(default_capacity).max(1);
            let name = sink.name();
            let (tx, mut rx) = mpsc::channel::<Arc<HubMessage>>(cap);
            let metrics = Arc::clone(&metrics);

            let handle = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let fut = sink.on_message(msg.as_ref());
                    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                        metrics.record_sink_panicked(name);
                        tracing::error!(
                            sink = name,
                            info = %panic_message(panic.as_ref()),
                            "push sink panicked"
                        );
                    }
                }
            });

            channels.push(SinkChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            metrics,
        }
    }

    /// Offers one message to every sink without waiting.
    pub fn emit(&self, msg: HubMessage) {
        if self.channels.is_empty() {
            return;
        }
        let msg = Arc::new(msg);
        for channel in &self.channels {
            match channel.sender.try_send(Arc::clone(&msg)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.metrics.record_sink_dropped(channel.name);
                    tracing::warn!(sink = channel.name, kind = msg.kind(), "push sink queue full; dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.metrics.record_sink_dropped(channel.name);
                    tracing::warn!(sink = channel.name, kind = msg.kind(), "push sink worker closed; dropped");
                }
            }
        }
    }

    /// Closes all queues and waits for workers to deliver what is already queued.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushSink for Collect {
        async fn on_message(&self, msg: &HubMessage) {
            self.seen.lock().push(msg.kind().to_string());
        }

        fn name(&self) -> &'static str {
            "collect"
        }
    }

    /// Blocks on every message until a permit is released.
    struct Gated {
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl PushSink for Gated {
        async fn on_message(&self, _msg: &HubMessage) {
            self.entered.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        fn name(&self) -> &'static str {
            "gated"
        }

        fn queue_capacity(&self) -> Option<usize> {
            Some(1)
        }
    }

    struct Explodes;

    #[async_trait]
    impl PushSink for Explodes {
        async fn on_message(&self, msg: &HubMessage) {
            if msg.kind() == "boom" {
                panic!("sink exploded");
            }
        }

        fn name(&self) -> &'static str {
            "explodes"
        }
    }

    fn msg(kind: &str) -> HubMessage {
        HubMessage::Event(Event::new(kind, "here"))
    }

    #[tokio::test]
    async fn delivers_in_order_and_flushes_on_shutdown() {
        let metrics = Metrics::new();
        let sink = Arc::new(Collect::default());
        let set = SinkSet::new(vec![sink.clone() as Arc<dyn PushSink>], 16, Arc::clone(&metrics));

        for kind in ["a", "b", "c"] {
            set.emit(msg(kind));
        }
        set.shutdown().await;

        assert_eq!(*sink.seen.lock(), vec!["a", "b", "c"]);
        assert_eq!(metrics.snapshot().hub.sink_dropped, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_sink_only() {
        let metrics = Metrics::new();
        let gated = Arc::new(Gated {
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let collect = Arc::new(Collect::default());
        let set = SinkSet::new(
            vec![gated.clone() as Arc<dyn PushSink>, collect.clone() as Arc<dyn PushSink>],
            16,
            Arc::clone(&metrics),
        );

        set.emit(msg("first"));
        gated.entered.notified().await;
        set.emit(msg("second"));
        set.emit(msg("third"));

        assert_eq!(metrics.snapshot().hub.sink_dropped, 1);

        gated.gate.add_permits(2);
        set.shutdown().await;
        assert_eq!(*collect.seen.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn panicking_sink_keeps_receiving() {
        let metrics = Metrics::new();
        let set = SinkSet::new(vec![Arc::new(Explodes) as Arc<dyn PushSink>], 4, Arc::clone(&metrics));

        set.emit(msg("boom"));
        set.emit(msg("fine"));
        set.shutdown().await;

        let hub = metrics.snapshot().hub;
        assert_eq!(hub.sink_panicked, 1);
        assert_eq!(hub.sink_dropped, 0);
    }
}
