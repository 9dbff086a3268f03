//! Runtime core: scheduling, orchestration and lifecycle.
//!
//! The public entry points are [`RuntimeBuilder`] / [`Runtime`] (wire everything and
//! run it until shutdown) and [`TickScheduler`] (drive a [`WorkerRegistry`] directly).
//!
//! Internal modules:
//! - [`config`]: runtime settings and their `WORLDTICK_*` environment variables;
//! - `registry`: ordered, name-unique worker registrations;
//! - `runner`: executes one worker with a deadline and lifecycle events;
//! - `scheduler`: the tick loop (priority first, bounded fan-out for the rest);
//! - `runtime`: starts components and stops them within the grace period;
//! - `builder`: assembles a runtime from its collaborators;
//! - `shutdown`: cross-platform shutdown signal handling.

mod builder;
pub mod config;
pub(crate) mod registry;
pub(crate) mod runner;
pub(crate) mod runtime;
pub(crate) mod scheduler;
mod shutdown;

pub use builder::RuntimeBuilder;
pub use config::{
    Config, DispatchConfig, GenerationConfig, HubConfig, IntervalMode, SchedulerConfig,
};
pub use registry::{ResolvedWorker, WorkerRegistry};
pub use runner::{WorkerReport, run_once};
pub use runtime::Runtime;
pub use scheduler::{CycleReport, TickScheduler};
pub use shutdown::{ShutdownSignal, wait_for_signal};
