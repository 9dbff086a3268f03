//! # worldtick
//!
//! **worldtick** is the concurrency backbone of a simulated, continuously-running world.
//!
//! It drives a set of independent workers ("agents") once per tick, and decouples what
//! they produce from two slow paths: persisting and broadcasting events, and calling a
//! rate-limited external text-generation service.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ Registration │   │ Registration │   │ Registration │
//!     │  (priority)  │   │   (normal)   │   │   (normal)   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  TickScheduler (every interval)                                   │
//! │  - resolve registry (fresh instances, priority first)             │
//! │  - priority worker alone, then Semaphore(max_concurrent) fan-out  │
//! │  - per-worker deadline, panic isolation, metrics, TickEvents      │
//! └──────┬─────────────────────────────────────────────┬──────────────┘
//!        │ DispatchHandle::enqueue(Event)               │ RequestHandle::enqueue(req)
//!        ▼                                              ▼
//! ┌──────────────────────────┐            ┌──────────────────────────────┐
//! │ Dispatch queue (mpsc)    │◄───────────│ RequestQueue (bounded,       │
//! │ single consumer, FIFO    │  terminal  │ DropOldest) ─► pool × N      │
//! │ persist ─► publish       │  `reply`   │ primary/reask/rewrite,       │
//! └────────────┬─────────────┘   event    │ sanitize, fallback           │
//!              ▼                          └──────────────────────────────┘
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  FanOutHub                                                        │
//! │  - Bus<Event>     ─► SSE /stream/events                           │
//! │  - Bus<Snapshot>  ─► SSE /stream/snapshots                        │
//! │  - SinkSet        ─► PushSink × N (bounded queue each)            │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Shutdown
//! ```text
//! OS signal | Runtime::shutdown()
//!   └─► cancel root token: workers see it through their scope,
//!                          scheduler finishes the cycle in flight,
//!                          pool finishes in-flight requests, drops the queue
//!   └─► cancel dispatch token: consumer drains what is queued
//!   └─► flush push sinks
//!   (all within Config::grace, else RuntimeError::GraceExceeded)
//! ```
//!
//! ## Features
//! | Area | Description | Key types / traits |
//! |------|-------------|--------------------|
//! | **Workers** | Units of work driven once per tick | [`Worker`], [`WorkerFn`], [`WorkerRegistration`] |
//! | **Scheduling** | Tick loop with priority and bounded fan-out | [`TickScheduler`], [`SchedulerConfig`] |
//! | **Dispatch** | Non-blocking persist-then-broadcast queue | [`DispatchHandle`], [`EventStore`] |
//! | **Hub** | Live channels and push sinks | [`FanOutHub`], [`PushSink`] |
//! | **Generation** | Bounded requests, validation, guaranteed reply | [`RequestHandle`], [`GenerationClient`], [`ContentPolicy`] |
//! | **Runtime** | Wiring and graceful shutdown | [`Runtime`], [`RuntimeBuilder`], [`Config`] |
//! | **Errors** | Typed errors with stable labels | [`WorkerError`], [`RuntimeError`] |
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use worldtick::{Config, Event, Runtime, WorkerContext, WorkerError, WorkerFn, WorkerRegistration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::from_env()?;
//!     cfg.scheduler.interval = Duration::from_secs(1);
//!     let rt = Runtime::builder(cfg).build()?;
//!
//!     let dispatch = rt.dispatch();
//!     rt.registry().register(WorkerRegistration::new("weather", move || {
//!         let dispatch = dispatch.clone();
//!         WorkerFn::arc("weather", move |ctx: WorkerContext| {
//!             let dispatch = dispatch.clone();
//!             async move {
//!                 let event = Event::new("rain", "valley")
//!                     .with_payload(serde_json::json!({ "tick": ctx.tick() }));
//!                 dispatch.enqueue(event).map_err(WorkerError::fail)
//!             }
//!         })
//!     }))?;
//!
//!     rt.run().await?;
//!     Ok(())
//! }
//! ```

mod core;
mod dispatch;
mod error;
mod events;
mod generation;
mod hub;
pub mod metrics;
pub mod observability;
mod policies;
mod scope;
mod workers;

// ---- Public re-exports ----

pub use crate::core::{
    Config, CycleReport, DispatchConfig, GenerationConfig, HubConfig, IntervalMode,
    ResolvedWorker, Runtime, RuntimeBuilder, SchedulerConfig, ShutdownSignal, TickScheduler,
    WorkerRegistry, WorkerReport, run_once, wait_for_signal,
};
pub use crate::dispatch::{DispatchConsumer, DispatchHandle, EventStore, MemoryStore, channel};
pub use crate::error::{
    BroadcastError, ConfigError, DispatchError, GenerationError, RegistryError, RuntimeError,
    SchedulerError, StoreError, WorkerError,
};
pub use crate::events::{Bus, Event, EventMeta, Snapshot, TickEvent, TickEventKind};
pub use crate::generation::{
    Admission, AttemptRecord, ContentPolicy, GenerationClient, GenerationPool,
    GenerationRequest, OfflineClient, OverflowPolicy, ParsedReply, Pipeline, Prompt,
    PromptVariant, PushOutcome, REPLY_EVENT_TYPE, Reply, RequestHandle, RequestQueue, Script,
    Violation, parse_reply,
};
pub use crate::hub::{FanOutHub, HubMessage, LogSink, PushSink, SNAPSHOT_KEY_PREFIX, http};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use crate::policies::{BackoffPolicy, JitterPolicy};
pub use crate::scope::{Scope, ScopeExit};
pub use crate::workers::{
    Worker, WorkerContext, WorkerFactory, WorkerFn, WorkerOrder, WorkerOutcome, WorkerRef,
    WorkerRegistration,
};
