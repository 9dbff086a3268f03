//! # LogSink: push sink that writes every publish to `tracing`.
//!
//! ## Example output
//! ```text
//! INFO hub: published channel="event" kind="trade" location="harbor" trace_id=9f2c...
//! INFO hub: published channel="snapshot" kind="weather" location="valley" trace_id=41aa...
//! ```

use async_trait::async_trait;

use crate::hub::sink::{HubMessage, PushSink};

#[derive(Default)]
pub struct LogSink;

impl LogSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushSink for LogSink {
    async fn on_message(&self, msg: &HubMessage) {
        let (channel, ev) = match msg {
            HubMessage::Event(ev) => ("event", ev),
            HubMessage::Snapshot(snap) => ("snapshot", snap.event()),
        };
        tracing::info!(
            target: "hub",
            channel,
            kind = ev.kind(),
            location = ev.location(),
            trace_id = %ev.meta().trace_id,
            "published"
        );
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
