//! # Push sinks: secondary delivery path of the hub.
//!
//! A [`PushSink`] mirrors every hub publish to some outside channel (a websocket
//! hub, a webhook, a log). Each sink gets:
//! - a **dedicated worker task**
//! - a **bounded queue** (capacity via [`PushSink::queue_capacity`])
//! - **panic isolation** (panics are caught, logged and counted)
//!
//! ## Rules
//! - A slow sink only affects its own queue.
//! - Queue overflow drops the message **for this sink only** and is counted.
//! - Messages are delivered sequentially (FIFO) per sink.
//! - Sinks never block the primary broadcast channels.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use worldtick::{HubMessage, PushSink};
//!
//! struct Webhook;
//!
//! #[async_trait]
//! impl PushSink for Webhook {
//!     async fn on_message(&self, msg: &HubMessage) {
//!         let _body = serde_json::to_string(msg);
//!         // POST it somewhere...
//!     }
//!
//!     fn name(&self) -> &'static str { "webhook" }
//!     fn queue_capacity(&self) -> Option<usize> { Some(64) }
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::events::{Event, Snapshot};

/// One hub publish, as seen by push sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "data", rename_all = "snake_case")]
pub enum HubMessage {
    Event(Event),
    Snapshot(Snapshot),
}

impl HubMessage {
    /// Type of the carried event or snapshot.
    pub fn kind(&self) -> &str {
        match self {
            HubMessage::Event(ev) => ev.kind(),
            HubMessage::Snapshot(snap) => snap.kind(),
        }
    }

    /// The carried event, or the event shape of the snapshot.
    pub fn event(&self) -> &Event {
        match self {
            HubMessage::Event(ev) => ev,
            HubMessage::Snapshot(snap) => snap.event(),
        }
    }
}

/// Secondary consumer of everything the hub publishes.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait PushSink: Send + Sync + 'static {
    /// Handles one message. Called from the sink's own worker task.
    async fn on_message(&self, msg: &HubMessage);

    /// Name used in logs and metrics.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity; `None` uses the hub default. Clamped to at least 1.
    fn queue_capacity(&self) -> Option<usize> {
        None
    }
}
