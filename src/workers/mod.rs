//! # Workers: the units of work the tick scheduler drives.
//!
//! - [`Worker`] - trait for a named, cancel-aware unit executed once per tick
//! - [`WorkerFn`] - closure-backed implementation
//! - [`WorkerRef`] - shared handle (`Arc<dyn Worker>`)
//! - [`WorkerContext`] - what one execution receives (scope + tick number)
//! - [`WorkerRegistration`] - name, [`WorkerOrder`] and factory, as stored in the registry
//! - [`WorkerOutcome`] - how one execution ended

mod outcome;
mod registration;
mod worker;
mod worker_fn;

pub use outcome::WorkerOutcome;
pub use registration::{WorkerFactory, WorkerOrder, WorkerRegistration};
pub use worker::{Worker, WorkerContext, WorkerRef};
pub use worker_fn::WorkerFn;
