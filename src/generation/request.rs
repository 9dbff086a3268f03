use tokio::time::Instant;
use uuid::Uuid;

use crate::scope::Scope;

/// One call for generated text on behalf of a subject.
///
/// Every request admitted by [`RequestHandle::enqueue`](crate::RequestHandle::enqueue)
/// is answered with exactly one terminal `reply` event, even if the caller cancels
/// its scope while the request waits in the queue. A request whose scope is already
/// cancelled at enqueue is abandoned instead.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub subject_id: String,
    pub archetype: String,
    /// Copied to the terminal event.
    pub location: String,
    /// Free-form seed for the primary prompt.
    pub context: String,
    pub trace_id: String,
    /// Caller-owned cancellation; composes with the pipeline deadlines.
    pub scope: Scope,
    pub(crate) enqueued_at: Instant,
}

impl GenerationRequest {
    pub fn new(subject_id: impl Into<String>, archetype: impl Into<String>, scope: Scope) -> Self {
        Self {
            subject_id: subject_id.into(),
            archetype: archetype.into(),
            location: String::new(),
            context: String::new(),
            trace_id: Uuid::new_v4().simple().to_string(),
            scope,
            enqueued_at: Instant::now(),
        }
    }

    #[inline]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    #[inline]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    #[inline]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// When the request entered the queue.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}
