use std::time::Duration;

use crate::error::WorkerError;

/// How one worker execution ended. Every variant is a soft outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Succeeded,
    /// Returned an error or panicked.
    Failed(WorkerError),
    /// Exceeded its deadline; the future was dropped.
    TimedOut(Duration),
    /// Observed cancellation and exited.
    Canceled,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded)
    }

    /// Short stable label for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerOutcome::Succeeded => "success",
            WorkerOutcome::Failed(_) => "error",
            WorkerOutcome::TimedOut(_) => "timeout",
            WorkerOutcome::Canceled => "canceled",
        }
    }
}
