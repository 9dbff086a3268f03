//! # Bounded request queue with an overflow policy.
//!
//! ```text
//! RequestHandle::enqueue ──► RequestQueue (VecDeque, capacity N) ──► pop() × pool workers
//!                              full? DropOldest → evict front, accept new
//!                                    DropNewest → reject incoming
//! ```
//!
//! ## Rules
//! - `push` never waits; every dropped request is counted before it is discarded.
//! - `pop` waits until an item arrives or the queue is closed.
//! - `close` hands back everything still queued and wakes every waiting `pop`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::generation::request::GenerationRequest;
use crate::metrics::Metrics;

/// What to do with a push that finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item and accept the new one.
    #[default]
    DropOldest,
    /// Keep the queue as is and reject the new item.
    DropNewest,
}

/// Result of [`RequestQueue::push`]; dropped items are handed back.
#[derive(Debug, PartialEq)]
pub enum PushOutcome<T> {
    Accepted,
    /// Accepted after evicting this (oldest) item.
    Evicted(T),
    /// Queue full under [`OverflowPolicy::DropNewest`].
    Rejected(T),
    /// Queue closed.
    Closed(T),
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-producer, multi-consumer bounded queue.
pub struct RequestQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
    overflow: OverflowPolicy,
}

impl<T> RequestQueue<T> {
    /// Creates a queue holding at most `capacity` items (min 1).
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            overflow,
        }
    }

    pub fn push(&self, item: T) -> PushOutcome<T> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PushOutcome::Closed(item);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                PushOutcome::Accepted
            } else {
                match self.overflow {
                    OverflowPolicy::DropNewest => return PushOutcome::Rejected(item),
                    OverflowPolicy::DropOldest => {
                        let evicted = inner.items.pop_front();
                        inner.items.push_back(item);
                        match evicted {
                            Some(old) => PushOutcome::Evicted(old),
                            None => PushOutcome::Accepted,
                        }
                    }
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Takes the oldest item, waiting for one. `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Takes the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Closes the queue and returns the items that were still queued.
    pub fn close(&self) -> Vec<T> {
        let drained = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.items.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// How the queue treated one [`RequestHandle::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Accepted; the oldest queued request was dropped to make room.
    AcceptedEvictedOldest,
    /// Dropped: queue full under [`OverflowPolicy::DropNewest`].
    Rejected,
    /// Dropped: the pool is shut down or disabled.
    Closed,
    /// Dropped: the caller's scope was already cancelled; no event will follow.
    Abandoned,
}

/// Producer side of the generation queue. Cheap to clone.
#[derive(Clone)]
pub struct RequestHandle {
    queue: Arc<RequestQueue<GenerationRequest>>,
    metrics: Arc<Metrics>,
}

impl RequestHandle {
    pub(crate) fn new(queue: Arc<RequestQueue<GenerationRequest>>, metrics: Arc<Metrics>) -> Self {
        Self { queue, metrics }
    }

    /// Queues `req` for the pool. Returns immediately.
    ///
    /// A request whose scope is already cancelled is abandoned here. Any request
    /// admitted past this point gets exactly one terminal `reply` event.
    pub fn enqueue(&self, mut req: GenerationRequest) -> Admission {
        if req.scope.is_cancelled() {
            self.metrics.record_request_abandoned();
            tracing::debug!(
                subject_id = %req.subject_id,
                trace_id = %req.trace_id,
                "caller cancelled before intake; request abandoned"
            );
            return Admission::Abandoned;
        }
        req.enqueued_at = Instant::now();
        match self.queue.push(req) {
            PushOutcome::Accepted => {
                self.metrics.record_request_enqueued();
                Admission::Accepted
            }
            PushOutcome::Evicted(old) => {
                self.metrics.record_request_enqueued();
                self.metrics.record_request_dropped("overflow");
                tracing::warn!(
                    subject_id = %old.subject_id,
                    trace_id = %old.trace_id,
                    "request queue full; oldest request dropped"
                );
                Admission::AcceptedEvictedOldest
            }
            PushOutcome::Rejected(req) => {
                self.metrics.record_request_dropped("overflow");
                tracing::warn!(
                    subject_id = %req.subject_id,
                    trace_id = %req.trace_id,
                    "request queue full; request rejected"
                );
                Admission::Rejected
            }
            PushOutcome::Closed(req) => {
                self.metrics.record_request_dropped("closed");
                tracing::warn!(
                    subject_id = %req.subject_id,
                    trace_id = %req.trace_id,
                    "request queue closed; request dropped"
                );
                Admission::Closed
            }
        }
    }

    /// Requests waiting for a pool worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
