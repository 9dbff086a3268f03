//! Events: the domain data model and the broadcast bus that carries it.
//!
//! ## Contents
//! - [`Event`], [`EventMeta`], [`Snapshot`]: immutable domain facts produced by workers
//!   and by the generation pipeline, persisted by the dispatch consumer and fanned out
//!   by the hub.
//! - [`TickEvent`], [`TickEventKind`]: scheduler lifecycle notifications (cycle and
//!   worker start/finish), sequenced for ordering.
//! - [`Bus`]: thin wrapper over `tokio::sync::broadcast`, generic over the payload.
//!
//! ## Quick reference
//! - **Domain publishers**: workers (via [`DispatchHandle`](crate::DispatchHandle)),
//!   the generation pipeline (terminal `reply` events).
//! - **Domain consumers**: the dispatch consumer, then [`FanOutHub`](crate::FanOutHub).
//! - **Tick publishers**: `TickScheduler`, `core::runner`, `Runtime` (shutdown).

mod bus;
mod event;
mod tick;

pub use bus::Bus;
pub use event::{Event, EventMeta, Snapshot};
pub use tick::{TickEvent, TickEventKind};
