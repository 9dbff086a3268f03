//! Retry pacing for calls to the external generation service.
//!
//! The generation pipeline never retries forever: it has a fixed attempt budget and an
//! overall deadline. What these policies control is **how long to wait** between two
//! attempts after the service failed outright (an error rather than a bad response),
//! so a struggling rate-limited service is not hammered by a whole worker pool.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=250ms, factor=2.0, max=2s, jitter=Equal.
//! - `BackoffPolicy::none()` → no delay at all (tests, offline runs).

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
