//! # Fan-out hub: live delivery of persisted events and snapshots.
//!
//! - [`FanOutHub`] - two broadcast channels (events, snapshots) plus push sinks
//! - [`PushSink`] - secondary delivery path with its own bounded queue
//! - [`LogSink`] - built-in sink writing every publish to `tracing`
//! - [`http`] - axum router exposing SSE streams and the metrics snapshot
//!
//! ```text
//! DispatchConsumer ── persist ──► FanOutHub::publish ──────────┬─► SSE /stream/events
//!                  ── persist ──► FanOutHub::publish_snapshot ─┼─► SSE /stream/snapshots
//!                                                              └─► SinkSet ─► PushSink...
//! ```

mod fanout;
pub mod http;
mod log;
mod sink;
mod sink_set;

pub use fanout::{FanOutHub, SNAPSHOT_KEY_PREFIX};
pub use log::LogSink;
pub use sink::{HubMessage, PushSink};
