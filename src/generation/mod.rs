//! # Generation: bounded request queue and validation pipeline.
//!
//! Mediates calls to a slow, unreliable text-generation service. Producers enqueue
//! a [`GenerationRequest`] and return immediately; a fixed [`GenerationPool`] drains
//! the queue and answers every request with exactly one terminal `reply` event on the
//! dispatch queue.
//!
//! - [`RequestQueue`], [`RequestHandle`], [`OverflowPolicy`] - admission and backpressure
//! - [`Pipeline`] - the attempt loop (primary, reask, rewrite, sanitize, fallback)
//! - [`ContentPolicy`] - banned tokens and script checks
//! - [`parse_reply`] - tolerant extraction of `{text, value?}` from raw output
//! - [`GenerationClient`] - boundary to the external service

mod client;
mod pipeline;
mod policy;
mod pool;
mod prompt;
mod queue;
mod request;
mod response;

pub use client::{GenerationClient, OfflineClient};
pub use pipeline::{AttemptRecord, Pipeline, REPLY_EVENT_TYPE, Reply};
pub use policy::{ContentPolicy, Script, Violation};
pub use pool::GenerationPool;
pub use prompt::{Prompt, PromptVariant};
pub use queue::{Admission, OverflowPolicy, PushOutcome, RequestHandle, RequestQueue};
pub use request::GenerationRequest;
pub use response::{ParsedReply, parse_reply};
