//! # Generation pool: N workers draining the request queue.
//!
//! ```text
//! RequestHandle ──► RequestQueue ──► worker #0 ─┐
//!                                ──► worker #1 ─┼─► Pipeline::process ──► DispatchHandle
//!                                ──► worker #N ─┘
//! shutdown: close queue ─► leftovers counted as dropped("shutdown")
//!           in-flight requests finish within their own deadlines
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::config::GenerationConfig;
use crate::dispatch::DispatchHandle;
use crate::error::panic_message;
use crate::generation::client::GenerationClient;
use crate::generation::pipeline::Pipeline;
use crate::generation::queue::{RequestHandle, RequestQueue};
use crate::generation::request::GenerationRequest;
use crate::metrics::Metrics;

pub struct GenerationPool {
    queue: Arc<RequestQueue<GenerationRequest>>,
    pipeline: Arc<Pipeline>,
    workers: usize,
    metrics: Arc<Metrics>,
}

impl GenerationPool {
    /// Creates the pool and the producer handle feeding it.
    pub fn new(
        cfg: GenerationConfig,
        client: Arc<dyn GenerationClient>,
        dispatch: DispatchHandle,
        metrics: Arc<Metrics>,
    ) -> (Self, RequestHandle) {
        let queue = Arc::new(RequestQueue::new(cfg.capacity, cfg.overflow));
        let handle = RequestHandle::new(Arc::clone(&queue), Arc::clone(&metrics));
        let workers = cfg.workers.max(1);
        let pipeline = Arc::new(Pipeline::new(
            client,
            Arc::new(cfg),
            Arc::clone(&metrics),
            dispatch,
        ));
        (
            Self {
                queue,
                pipeline,
                workers,
                metrics,
            },
            handle,
        )
    }

    /// Refuses all further requests without starting any worker.
    pub(crate) fn close_intake(self) {
        let leftovers = self.queue.close();
        for _ in &leftovers {
            self.metrics.record_request_dropped("closed");
        }
        tracing::info!("generation pool disabled; requests will be dropped");
    }

    /// Runs the workers until `shutdown` fires, then closes the queue and waits
    /// for requests already being processed.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(workers = self.workers, capacity = self.queue.capacity(), "generation pool started");

        let mut set = JoinSet::new();
        for id in 0..self.workers {
            let queue = Arc::clone(&self.queue);
            let pipeline = Arc::clone(&self.pipeline);
            set.spawn(async move {
                while let Some(req) = queue.pop().await {
                    let subject_id = req.subject_id.clone();
                    if let Err(panic) = AssertUnwindSafe(pipeline.process(req)).catch_unwind().await {
                        tracing::error!(
                            worker = id,
                            subject_id = %subject_id,
                            info = %panic_message(panic.as_ref()),
                            "request processing panicked"
                        );
                    }
                }
            });
        }

        shutdown.cancelled().await;

        let leftovers = self.queue.close();
        for req in &leftovers {
            self.metrics.record_request_dropped("shutdown");
            tracing::debug!(subject_id = %req.subject_id, trace_id = %req.trace_id, "queued request dropped on shutdown");
        }
        if !leftovers.is_empty() {
            tracing::warn!(dropped = leftovers.len(), "generation pool dropped queued requests");
        }

        while let Some(res) = set.join_next().await {
            if let Err(err) = res {
                tracing::error!(error = %err, "generation worker task failed");
            }
        }
        tracing::info!("generation pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{self, MemoryStore};
    use crate::error::GenerationError;
    use crate::generation::prompt::Prompt;
    use crate::hub::FanOutHub;
    use crate::policies::BackoffPolicy;
    use crate::scope::Scope;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Blocks every call until released, then answers with a fixed reply.
    struct Gate {
        open: Notify,
    }

    #[async_trait]
    impl GenerationClient for Gate {
        async fn send(&self, _prompt: &Prompt, _deadline: Duration) -> Result<String, GenerationError> {
            self.open.notified().await;
            Ok(r#"{"text":"done"}"#.to_string())
        }
    }

    struct Echo;

    #[async_trait]
    impl GenerationClient for Echo {
        async fn send(&self, _prompt: &Prompt, _deadline: Duration) -> Result<String, GenerationError> {
            Ok(r#"{"text":"hello"}"#.to_string())
        }
    }

    fn setup(
        client: Arc<dyn GenerationClient>,
        workers: usize,
    ) -> (GenerationPool, RequestHandle, Arc<Metrics>, Arc<MemoryStore>, dispatch::DispatchConsumer) {
        let metrics = Metrics::new();
        let hub = Arc::new(FanOutHub::new(16, Arc::clone(&metrics)));
        let store = Arc::new(MemoryStore::new());
        let (dispatch, consumer) = dispatch::channel(store.clone(), hub, Arc::clone(&metrics));
        let cfg = GenerationConfig {
            workers,
            backoff: BackoffPolicy::none(),
            ..GenerationConfig::default()
        };
        let (pool, handle) = GenerationPool::new(cfg, client, dispatch, Arc::clone(&metrics));
        (pool, handle, metrics, store, consumer)
    }

    #[tokio::test]
    async fn every_request_yields_one_reply() {
        let (pool, handle, metrics, store, mut consumer) = setup(Arc::new(Echo), 2);
        let token = CancellationToken::new();
        let running = tokio::spawn(pool.run(token.clone()));

        for i in 0..5 {
            handle.enqueue(GenerationRequest::new(format!("npc-{i}"), "baker", Scope::root()));
        }
        while metrics.snapshot().generation.processed < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        running.await.unwrap();

        assert_eq!(consumer.drain_pending().await, 5);
        assert_eq!(store.len(), 5);
        assert!(store.events().iter().all(|e| e.kind() == "reply"));
    }

    #[tokio::test]
    async fn shutdown_drops_queued_and_finishes_in_flight() {
        let gate = Arc::new(Gate { open: Notify::new() });
        let (pool, handle, metrics, _store, mut consumer) = setup(gate.clone(), 1);
        let token = CancellationToken::new();
        let running = tokio::spawn(pool.run(token.clone()));

        for i in 0..3 {
            handle.enqueue(GenerationRequest::new(format!("npc-{i}"), "guard", Scope::root()));
        }
        // Wait until the single worker has taken the first request.
        while handle.pending() != 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.open.notify_one();
        running.await.unwrap();

        let snap = metrics.snapshot().generation;
        assert_eq!((snap.processed, snap.dropped), (1, 2));
        assert_eq!(consumer.drain_pending().await, 1);
        assert_eq!(
            handle.enqueue(GenerationRequest::new("late", "guard", Scope::root())),
            crate::generation::queue::Admission::Closed
        );
    }
}
