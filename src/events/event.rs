//! # Domain events and environment snapshots.
//!
//! An [`Event`] is an immutable fact about the world: who/what (`type`), where
//! (`location`), an opaque JSON `payload`, and tracing metadata. Events are built once
//! with the `with_*` builder methods and then handed to the dispatch queue; after that
//! they are only ever read or cloned.
//!
//! A [`Snapshot`] has exactly the same shape but travels on the hub's second channel
//! (environment facts such as weather).
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use worldtick::Event;
//!
//! let ev = Event::new("trade", "harbor")
//!     .with_payload(json!({ "buyer": "npc-7", "price": 12 }))
//!     .with_trace_id("trace-1");
//!
//! assert_eq!(ev.kind(), "trade");
//! assert_eq!(ev.location(), "harbor");
//! assert_eq!(ev.meta().trace_id, "trace-1");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tracing and pipeline metadata carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Correlates an event with the request or tick that produced it.
    pub trace_id: String,
    /// Generation attempts issued after the first one (terminal replies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts_reasked: Option<u32>,
    /// Times the reply text was sanitized (terminal replies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitizations: Option<u32>,
}

impl EventMeta {
    fn fresh() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            attempts_reasked: None,
            sanitizations: None,
        }
    }
}

/// Immutable domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: String,
    location: String,
    payload: Value,
    meta: EventMeta,
}

impl Event {
    /// Creates an event of the given type at the given location, stamped now.
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: kind.into(),
            location: location.into(),
            payload: Value::Null,
            meta: EventMeta::fresh(),
        }
    }

    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[inline]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.meta.trace_id = trace_id.into();
        self
    }

    #[inline]
    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event type (`type` on the wire).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn meta(&self) -> &EventMeta {
        &self.meta
    }
}

/// Environment snapshot: an [`Event`] delivered on the snapshot channel.
///
/// Serializes exactly like the wrapped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Event);

impl Snapshot {
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self(Event::new(kind, location))
    }

    #[inline]
    pub fn with_payload(self, payload: Value) -> Self {
        Self(self.0.with_payload(payload))
    }

    #[inline]
    pub fn with_trace_id(self, trace_id: impl Into<String>) -> Self {
        Self(self.0.with_trace_id(trace_id))
    }

    /// The underlying event shape.
    pub fn event(&self) -> &Event {
        &self.0
    }

    pub fn kind(&self) -> &str {
        self.0.kind()
    }
}

impl From<Event> for Snapshot {
    fn from(ev: Event) -> Self {
        Self(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_type_and_omits_unset_meta() {
        let ev = Event::new("birth", "village")
            .with_payload(json!({ "child": "npc-3" }))
            .with_trace_id("t-1");
        let v = serde_json::to_value(&ev).unwrap();

        assert_eq!(v["type"], "birth");
        assert_eq!(v["location"], "village");
        assert_eq!(v["payload"]["child"], "npc-3");
        assert_eq!(v["meta"]["trace_id"], "t-1");
        assert!(v["meta"].get("attempts_reasked").is_none());
        assert!(v.get("kind").is_none());
    }

    #[test]
    fn snapshot_serializes_like_event() {
        let snap = Snapshot::new("weather", "valley").with_payload(json!({ "rain": true }));
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["type"], "weather");
        assert_eq!(v["payload"]["rain"], true);

        let back: Snapshot = serde_json::from_value(v).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn every_event_gets_distinct_id_and_trace() {
        let a = Event::new("x", "y");
        let b = Event::new("x", "y");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.meta().trace_id, b.meta().trace_id);
    }
}
