//! A small village ticking once per second.
//!
//! ```text
//! cargo run --example simulated_world
//! curl -N localhost:3000/stream/events
//! curl -N localhost:3000/stream/snapshots
//! curl localhost:3000/metrics
//! ```
//!
//! The generation service is simulated: it answers late, in prose, with banned
//! phrases or with clean JSON, so every pipeline path shows up in the logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use worldtick::observability::init_logging;
use worldtick::{
    Config, Event, GenerationClient, GenerationError, GenerationRequest, LogSink, Prompt,
    PromptVariant, Runtime, Scope, Snapshot, WorkerContext, WorkerError, WorkerFn,
    WorkerRegistration, http,
};

const VILLAGERS: [(&str, &str); 3] = [("ada", "farmer"), ("bram", "blacksmith"), ("cora", "baker")];

/// Pretends to be a slow, unreliable language model.
struct SimulatedService;

#[async_trait]
impl GenerationClient for SimulatedService {
    async fn send(&self, prompt: &Prompt, deadline: Duration) -> Result<String, GenerationError> {
        let (latency_ms, roll) = {
            let mut rng = rand::rng();
            (rng.random_range(50..400u64), rng.random_range(0..10u32))
        };
        tokio::time::sleep(Duration::from_millis(latency_ms).min(deadline)).await;

        let answer = match (prompt.variant, roll) {
            (_, 0) => return Err(GenerationError::Service { reason: "429 too many requests".into() }),
            (PromptVariant::Primary, 1..=2) => "Hmm, let me think about the harvest...".to_string(),
            (PromptVariant::Primary, 3) => {
                r#"{"text": "As an AI, I cannot bake, but the oven is warm."}"#.to_string()
            }
            _ => format!(
                "```json\n{}\n```",
                json!({ "text": "Fine weather for the market today!", "value": roll })
            ),
        };
        Ok(answer)
    }
}

fn weather(price: Arc<AtomicI64>, rt: &Arc<Runtime>) -> WorkerRegistration {
    let dispatch = rt.dispatch();
    WorkerRegistration::shared(WorkerFn::arc("weather", move |ctx: WorkerContext| {
        let dispatch = dispatch.clone();
        let price = Arc::clone(&price);
        async move {
            let sunny = ctx.tick() % 4 != 0;
            // Rain makes bread pricier.
            price.fetch_add(if sunny { -1 } else { 2 }, Ordering::Relaxed);
            let snapshot = Snapshot::new("weather", "valley")
                .with_payload(json!({ "tick": ctx.tick(), "sunny": sunny }));
            dispatch.enqueue_snapshot(snapshot).map_err(WorkerError::fail)
        }
    }))
    .priority()
}

fn market(price: Arc<AtomicI64>, rt: &Arc<Runtime>) -> WorkerRegistration {
    let dispatch = rt.dispatch();
    WorkerRegistration::shared(WorkerFn::arc("market", move |ctx: WorkerContext| {
        let dispatch = dispatch.clone();
        let price = Arc::clone(&price);
        async move {
            let price = price.load(Ordering::Relaxed).max(1);
            let event = Event::new("trade", "market-square")
                .with_payload(json!({ "good": "bread", "price": price, "tick": ctx.tick() }));
            dispatch.enqueue(event).map_err(WorkerError::fail)
        }
    }))
}

fn villagers(rt: &Arc<Runtime>) -> WorkerRegistration {
    let requests = rt.requests();
    WorkerRegistration::shared(WorkerFn::arc("villagers", move |ctx: WorkerContext| {
        let requests = requests.clone();
        async move {
            if ctx.tick() % 3 == 0 {
                for (id, archetype) in VILLAGERS {
                    let req = GenerationRequest::new(id, archetype, Scope::root())
                        .with_location("village")
                        .with_context(format!("It is tick {}.", ctx.tick()));
                    requests.enqueue(req);
                }
            }
            Ok::<_, WorkerError>(())
        }
    }))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let mut cfg = Config::from_env()?;
    init_logging(cfg.log_format);
    cfg.scheduler.interval = Duration::from_secs(1);
    cfg.grace = Duration::from_secs(10);
    cfg.generation.workers = 2;
    cfg.generation.attempt_timeout = Duration::from_millis(300);
    cfg.generation.overall_timeout = Duration::from_secs(2);

    let addr: SocketAddr = std::env::var("WORLDTICK_HTTP_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;

    let rt = Runtime::builder(cfg)
        .with_client(Arc::new(SimulatedService))
        .with_sinks(vec![Arc::new(LogSink)])
        .build()?;

    let price = Arc::new(AtomicI64::new(10));
    rt.registry().register(weather(Arc::clone(&price), &rt))?;
    rt.registry().register(market(price, &rt))?;
    rt.registry().register(villagers(&rt))?;

    let server = tokio::spawn(http::serve(addr, rt.router(), rt.shutdown_token()));

    match rt.run().await {
        Ok(()) => tracing::info!("world stopped gracefully"),
        Err(e) => tracing::warn!(error = %e, label = e.as_label(), "world stopped with error"),
    }
    server.await??;

    let snapshot = rt.metrics().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
