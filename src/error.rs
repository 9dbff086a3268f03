//! Error types used by the worldtick runtime, its workers and pipelines.
//!
//! Every failure this crate can observe is resolved at the smallest possible scope:
//! a worker, an attempt, an event. None of the enums below stop a loop on their own;
//! they are reported, counted and logged. Only [`RuntimeError`] ever reaches the caller
//! of [`Runtime::run`](crate::Runtime::run).
//!
//! All enums provide `as_label()` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some components did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Components that were still running when the grace period ran out.
        stuck: Vec<String>,
    },

    /// OS signal listeners could not be installed.
    #[error("failed to install shutdown signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// The HTTP surface failed to bind or serve.
    #[error("http server failed: {0}")]
    Serve(#[source] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use worldtick::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Serve(_) => "runtime_serve",
        }
    }
}

/// # Errors produced by a single worker execution.
///
/// All of them are soft outcomes: the scheduler tallies them and moves on.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    /// Worker exceeded its deadline.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Worker reported a failure.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Worker panicked; the panic was caught at the worker boundary.
    #[error("worker panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Worker observed cancellation and exited early.
    #[error("context cancelled")]
    Canceled,
}

impl WorkerError {
    /// Shorthand for [`WorkerError::Fail`] from anything displayable.
    pub fn fail(error: impl std::fmt::Display) -> Self {
        WorkerError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use worldtick::WorkerError;
    /// use std::time::Duration;
    ///
    /// let err = WorkerError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "worker_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Timeout { .. } => "worker_timeout",
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Panicked { .. } => "worker_panicked",
            WorkerError::Canceled => "worker_canceled",
        }
    }
}

/// Worker registration failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A worker with this name is already registered.
    #[error("worker '{name}' is already registered")]
    Duplicate {
        /// Conflicting worker name.
        name: String,
    },
}

impl RegistryError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::Duplicate { .. } => "registry_duplicate",
        }
    }
}

/// A cycle failed for a reason not attributable to a single worker.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The cycle body panicked (e.g. a worker factory panicked during resolution).
    #[error("cycle {tick} panicked: {info}")]
    CyclePanicked {
        /// Tick number of the failed cycle.
        tick: u64,
        /// Panic payload rendered as text.
        info: String,
    },
}

impl SchedulerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedulerError::CyclePanicked { .. } => "cycle_panicked",
        }
    }
}

/// The dispatch queue refused an event.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Queue was closed (shutdown in progress); the event was dropped and counted.
    #[error("dispatch queue closed")]
    Closed,
}

impl DispatchError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Closed => "dispatch_closed",
        }
    }
}

/// Persistence failures reported by an [`EventStore`](crate::EventStore).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be reached.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Underlying reason.
        reason: String,
    },

    /// Store refused this particular event.
    #[error("store rejected event: {reason}")]
    Rejected {
        /// Underlying reason.
        reason: String,
    },
}

impl StoreError {
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
            StoreError::Rejected { .. } => "store_rejected",
        }
    }
}

/// Primary broadcast failures (the hub's live channels).
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastError {
    /// Nobody is listening right now; the message is gone.
    #[error("no live subscribers")]
    NoSubscribers,
}

impl BroadcastError {
    pub fn as_label(&self) -> &'static str {
        match self {
            BroadcastError::NoSubscribers => "broadcast_no_subscribers",
        }
    }
}

/// Failures of a single call to the external generation service.
///
/// The pipeline treats every variant like an empty response and moves on to the
/// next attempt.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The call did not return before its deadline.
    #[error("generation timed out after {timeout:?}")]
    Timeout {
        /// Deadline handed to the service.
        timeout: Duration,
    },

    /// The caller's scope was cancelled.
    #[error("generation cancelled")]
    Canceled,

    /// The service reported an error.
    #[error("generation service error: {reason}")]
    Service {
        /// Underlying reason.
        reason: String,
    },

    /// The service returned nothing.
    #[error("generation service returned an empty response")]
    Empty,
}

impl GenerationError {
    pub fn as_label(&self) -> &'static str {
        match self {
            GenerationError::Timeout { .. } => "generation_timeout",
            GenerationError::Canceled => "generation_canceled",
            GenerationError::Service { .. } => "generation_service",
            GenerationError::Empty => "generation_empty",
        }
    }
}

/// Configuration could not be read from the environment.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(WorkerError::Canceled.as_label(), "worker_canceled");
        assert_eq!(WorkerError::fail("boom").as_label(), "worker_failed");
        assert_eq!(DispatchError::Closed.as_label(), "dispatch_closed");
        assert_eq!(
            GenerationError::Service { reason: "503".into() }.as_label(),
            "generation_service"
        );
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");

        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");

        let other: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
