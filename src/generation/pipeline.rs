//! # Validation pipeline: one request in, exactly one `reply` event out.
//!
//! ```text
//! RequestHandle::enqueue: caller scope cancelled? ── yes ─► abandoned (no event, counted)
//!   │
//!   ▼  request scope = caller scope ∩ overall deadline
//!      (cancelled while queued → no attempt, straight to fallback)
//! attempt 1   Primary ─┐
//! attempt n>1 Reask    │  (nothing parseable yet)
//!             Rewrite  │  (best-so-far parses but violates policy)
//!                      ▼
//!        send(prompt) within attempt deadline
//!          ├─ parses + passes policy ──► accept
//!          ├─ parses, violates ────────► best-so-far, next attempt
//!          ├─ unparseable ─────────────► next attempt
//!          └─ service error ───────────► backoff (bounded by scope), next attempt
//! attempts/time exhausted:
//!   best-so-far? ── sanitize ── non-empty ─► accept (sanitizations = 1)
//!   otherwise ────────────────────────────► fallback text
//!   │
//!   ▼
//! Event{type: "reply"} ──► DispatchHandle::enqueue
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value, json};
use tracing::Instrument;

use crate::core::config::GenerationConfig;
use crate::dispatch::DispatchHandle;
use crate::error::{GenerationError, panic_message};
use crate::events::{Event, EventMeta};
use crate::generation::client::GenerationClient;
use crate::generation::policy::Violation;
use crate::generation::prompt::{Prompt, PromptVariant};
use crate::generation::request::GenerationRequest;
use crate::generation::response::{ParsedReply, parse_reply};
use crate::metrics::Metrics;
use crate::observability::request_span;
use crate::scope::ScopeExit;

/// Type of the terminal event.
pub const REPLY_EVENT_TYPE: &str = "reply";

/// One call to the service, kept only to decide what to do next.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub prompt_variant: PromptVariant,
    /// `None` when the call failed.
    pub raw_response: Option<String>,
    pub accepted: bool,
}

/// Final outcome of the attempt loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub value: Option<f64>,
    pub sanitizations: u32,
    pub fallback: bool,
    pub attempts: Vec<AttemptRecord>,
}

impl Reply {
    /// Calls issued after the first one.
    pub fn attempts_reasked(&self) -> u32 {
        (self.attempts.len() as u32).saturating_sub(1)
    }
}

pub struct Pipeline {
    client: Arc<dyn GenerationClient>,
    cfg: Arc<GenerationConfig>,
    metrics: Arc<Metrics>,
    dispatch: DispatchHandle,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        cfg: Arc<GenerationConfig>,
        metrics: Arc<Metrics>,
        dispatch: DispatchHandle,
    ) -> Self {
        Self {
            client,
            cfg,
            metrics,
            dispatch,
        }
    }

    /// Handles one dequeued request and returns the terminal event handed to the
    /// dispatch queue.
    pub async fn process(&self, req: GenerationRequest) -> Event {
        let span = request_span(&req.subject_id, &req.trace_id);
        async {
            let reply = self.generate(&req).await;
            let event = reply_event(&req, &reply);

            if let Err(err) = self.dispatch.enqueue(event.clone()) {
                tracing::warn!(error = %err, "terminal reply not dispatched");
            }
            self.metrics.record_request_processed(req.enqueued_at.elapsed());
            tracing::debug!(
                attempts = reply.attempts.len(),
                sanitizations = reply.sanitizations,
                fallback = reply.fallback,
                "request completed"
            );
            event
        }
        .instrument(span)
        .await
    }

    /// Runs the attempt loop and always returns a reply.
    pub async fn generate(&self, req: &GenerationRequest) -> Reply {
        let cfg = &self.cfg;
        let scope = req.scope.with_timeout(cfg.overall_timeout);
        let max_attempts = cfg.max_attempts.max(1);

        let mut records: Vec<AttemptRecord> = Vec::new();
        let mut best: Option<(ParsedReply, Violation)> = None;
        let mut service_failures = 0u32;

        for attempt in 1..=max_attempts {
            if scope.is_done() {
                break;
            }

            let prompt = match (attempt, &best) {
                (1, _) => Prompt::primary(req, &cfg.language),
                (_, Some((parsed, violation))) => {
                    self.metrics.record_rewrite();
                    Prompt::rewrite(&parsed.text, violation, &cfg.language)
                }
                (_, None) => {
                    self.metrics.record_reask();
                    Prompt::reask(req, &cfg.language)
                }
            };

            let attempt_scope = scope.with_timeout(cfg.attempt_timeout);
            let deadline = attempt_scope.remaining().unwrap_or(cfg.attempt_timeout);
            let call = AssertUnwindSafe(self.client.send(&prompt, deadline)).catch_unwind();
            let result = match attempt_scope.run(call).await {
                Ok(Ok(res)) => res,
                Ok(Err(panic)) => Err(GenerationError::Service {
                    reason: format!("client panicked: {}", panic_message(panic.as_ref())),
                }),
                Err(ScopeExit::DeadlineElapsed) => Err(GenerationError::Timeout { timeout: deadline }),
                Err(ScopeExit::Cancelled) => Err(GenerationError::Canceled),
            };

            let mut record = AttemptRecord {
                attempt_number: attempt,
                prompt_variant: prompt.variant,
                raw_response: None,
                accepted: false,
            };

            match result {
                Ok(raw) => {
                    let parsed = parse_reply(&raw);
                    record.raw_response = Some(raw);
                    match parsed {
                        Some(parsed) => match cfg.policy.check(&parsed.text) {
                            Ok(()) => {
                                record.accepted = true;
                                records.push(record);
                                return Reply {
                                    text: parsed.text,
                                    value: parsed.value,
                                    sanitizations: 0,
                                    fallback: false,
                                    attempts: records,
                                };
                            }
                            Err(violation) => {
                                tracing::debug!(attempt, %violation, "reply violates content policy");
                                best = Some((parsed, violation));
                            }
                        },
                        None => tracing::debug!(attempt, "reply not parseable"),
                    }
                    records.push(record);
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, label = err.as_label(), "generation call failed");
                    records.push(record);
                    if matches!(err, GenerationError::Service { .. } | GenerationError::Empty)
                        && attempt < max_attempts
                    {
                        let delay = cfg.backoff.delay_for(service_failures);
                        service_failures += 1;
                        if !delay.is_zero() {
                            let _ = scope.child().run(tokio::time::sleep(delay)).await;
                        }
                    }
                }
            }
        }

        if let Some((parsed, _)) = best {
            let text = cfg.policy.sanitize(&parsed.text);
            if !text.is_empty() {
                self.metrics.record_sanitization();
                return Reply {
                    text,
                    value: parsed.value,
                    sanitizations: 1,
                    fallback: false,
                    attempts: records,
                };
            }
        }

        self.metrics.record_fallback();
        tracing::info!(attempts = records.len(), "no acceptable reply; using fallback");
        Reply {
            text: cfg.fallback_text.clone(),
            value: None,
            sanitizations: 0,
            fallback: true,
            attempts: records,
        }
    }
}

fn reply_event(req: &GenerationRequest, reply: &Reply) -> Event {
    let mut payload = Map::new();
    payload.insert("subject_id".into(), json!(req.subject_id));
    payload.insert("archetype".into(), json!(req.archetype));
    payload.insert("text".into(), json!(reply.text));
    if let Some(value) = reply.value {
        payload.insert("value".into(), json!(value));
    }

    Event::new(REPLY_EVENT_TYPE, req.location.clone())
        .with_payload(Value::Object(payload))
        .with_meta(EventMeta {
            trace_id: req.trace_id.clone(),
            attempts_reasked: Some(reply.attempts_reasked()),
            sanitizations: Some(reply.sanitizations),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{self, MemoryStore};
    use crate::hub::FanOutHub;
    use crate::policies::BackoffPolicy;
    use crate::scope::Scope;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays canned responses; repeats the last one when exhausted.
    struct Scripted {
        responses: Mutex<VecDeque<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<PromptVariant>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<&str, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationClient for Scripted {
        async fn send(&self, prompt: &Prompt, _deadline: Duration) -> Result<String, GenerationError> {
            self.prompts.lock().push(prompt.variant);
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                responses.pop_front().unwrap_or(Err(GenerationError::Empty))
            } else {
                responses.front().cloned().unwrap_or(Err(GenerationError::Empty))
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl GenerationClient for Hanging {
        async fn send(&self, _prompt: &Prompt, _deadline: Duration) -> Result<String, GenerationError> {
            std::future::pending().await
        }
    }

    fn cfg() -> GenerationConfig {
        GenerationConfig {
            backoff: BackoffPolicy::none(),
            fallback_text: "(silence)".into(),
            ..GenerationConfig::default()
        }
    }

    fn pipeline(
        client: Arc<dyn GenerationClient>,
        cfg: GenerationConfig,
    ) -> (Pipeline, Arc<Metrics>, dispatch::DispatchConsumer) {
        let metrics = Metrics::new();
        let hub = Arc::new(FanOutHub::new(16, Arc::clone(&metrics)));
        let (handle, consumer) =
            dispatch::channel(Arc::new(MemoryStore::new()), hub, Arc::clone(&metrics));
        (
            Pipeline::new(client, Arc::new(cfg), Arc::clone(&metrics), handle),
            metrics,
            consumer,
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("npc-1", "baker", Scope::root()).with_location("bakery")
    }

    #[tokio::test]
    async fn first_good_reply_is_accepted() {
        let client = Scripted::new(vec![Ok(r#"{"text":"Fresh bread!","value":4}"#)]);
        let (p, _m, _c) = pipeline(client.clone(), cfg());
        let event = p.process(request()).await;

        assert_eq!(event.kind(), "reply");
        assert_eq!(event.location(), "bakery");
        assert_eq!(event.payload()["text"], "Fresh bread!");
        assert_eq!(event.payload()["value"], 4.0);
        assert_eq!(event.meta().attempts_reasked, Some(0));
        assert_eq!(*client.prompts.lock(), vec![PromptVariant::Primary]);
    }

    #[tokio::test]
    async fn always_malformed_falls_back_after_reasks() {
        let client = Scripted::new(vec![Ok("I am a baker, not a JSON printer.")]);
        let (p, metrics, _c) = pipeline(client.clone(), cfg());
        let event = p.process(request()).await;

        assert_eq!(event.payload()["text"], "(silence)");
        assert!(event.payload().get("value").is_none());
        assert_eq!(event.meta().attempts_reasked, Some(2));
        assert_eq!(event.meta().sanitizations, Some(0));
        assert_eq!(
            *client.prompts.lock(),
            vec![PromptVariant::Primary, PromptVariant::Reask, PromptVariant::Reask]
        );
        let snap = metrics.snapshot().generation;
        assert_eq!((snap.reasks, snap.fallbacks, snap.processed), (2, 1, 1));
    }

    #[tokio::test]
    async fn banned_token_is_rewritten_then_sanitized() {
        let client = Scripted::new(vec![Ok(r#"{"text":"As an AI, I bake bread."}"#)]);
        let (p, metrics, _c) = pipeline(client.clone(), cfg());
        let event = p.process(request()).await;

        let text = event.payload()["text"].as_str().unwrap();
        assert_eq!(text, ", I bake bread.");
        assert!(!text.to_lowercase().contains("as an ai"));
        assert_eq!(event.meta().sanitizations, Some(1));
        assert_eq!(event.meta().attempts_reasked, Some(2));
        assert_eq!(
            *client.prompts.lock(),
            vec![PromptVariant::Primary, PromptVariant::Rewrite, PromptVariant::Rewrite]
        );
        assert_eq!(metrics.snapshot().generation.sanitizations, 1);
    }

    #[tokio::test]
    async fn rewrite_can_succeed() {
        let client = Scripted::new(vec![
            Ok(r#"{"text":"As an AI, I bake."}"#),
            Ok(r#"{"text":"I bake at dawn."}"#),
        ]);
        let (p, _m, _c) = pipeline(client, cfg());
        let reply = p.generate(&request()).await;
        assert_eq!(reply.text, "I bake at dawn.");
        assert_eq!(reply.attempts_reasked(), 1);
        assert_eq!(reply.sanitizations, 0);
    }

    #[tokio::test]
    async fn service_errors_count_as_empty_responses() {
        let client = Scripted::new(vec![
            Err(GenerationError::Service { reason: "503".into() }),
            Ok(r#"{"text":"Back in business."}"#),
        ]);
        let (p, _m, _c) = pipeline(client.clone(), cfg());
        let reply = p.generate(&request()).await;
        assert_eq!(reply.text, "Back in business.");
        assert_eq!(
            *client.prompts.lock(),
            vec![PromptVariant::Primary, PromptVariant::Reask]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_service_is_bounded_by_overall_deadline() {
        let config = GenerationConfig {
            overall_timeout: Duration::from_secs(15),
            attempt_timeout: Duration::from_secs(8),
            ..cfg()
        };
        let (p, _m, _c) = pipeline(Arc::new(Hanging), config);

        let started = tokio::time::Instant::now();
        let reply = p.generate(&request()).await;
        assert!(reply.fallback);
        // 8s + 7s (clamped to the overall deadline), then no time left for a third call.
        assert_eq!(reply.attempts.len(), 2);
        assert!(started.elapsed() <= Duration::from_secs(15) + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn scope_cancelled_while_queued_still_emits_fallback() {
        let client = Scripted::new(vec![Ok(r#"{"text":"unused"}"#)]);
        let (p, metrics, mut consumer) = pipeline(client.clone(), cfg());

        let scope = Scope::root();
        let req = GenerationRequest::new("npc-2", "smith", scope.clone());
        scope.cancel();

        let event = p.process(req).await;
        assert_eq!(event.payload()["subject_id"], "npc-2");
        assert_eq!(event.payload()["text"], "(silence)");
        assert_eq!(consumer.drain_pending().await, 1);
        assert!(client.prompts.lock().is_empty());

        let snap = metrics.snapshot().generation;
        assert_eq!((snap.abandoned, snap.fallbacks, snap.processed), (0, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_way_still_emits_fallback() {
        let scope = Scope::root();
        let req = GenerationRequest::new("npc-3", "guard", scope.clone());
        let (p, _m, mut consumer) = pipeline(Arc::new(Hanging), cfg());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            scope.cancel();
        });
        let event = p.process(req).await;
        canceller.await.unwrap();

        assert_eq!(event.payload()["text"], "(silence)");
        assert_eq!(event.meta().attempts_reasked, Some(0));
        assert_eq!(consumer.drain_pending().await, 1);
    }
}
