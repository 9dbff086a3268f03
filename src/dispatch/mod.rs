//! Dispatch pipeline: decouples event production from persistence and broadcast.
//!
//! - [`channel`] - creates the [`DispatchHandle`] / [`DispatchConsumer`] pair
//! - [`EventStore`] - persistence boundary, [`MemoryStore`] in-process implementation

mod queue;
mod store;

pub use queue::{DispatchConsumer, DispatchHandle, channel};
pub use store::{EventStore, MemoryStore};
