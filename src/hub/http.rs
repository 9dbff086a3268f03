//! # HTTP surface: live streams and metrics.
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /stream/events` | SSE, one `data: <json event>` frame per published event |
//! | `GET /stream/snapshots` | SSE, same framing for snapshots |
//! | `GET /metrics` | JSON [`MetricsSnapshot`](crate::metrics::MetricsSnapshot) |
//!
//! A client that falls behind the hub's ring buffer receives an `event: lagged` frame
//! whose data is the number of skipped messages, then continues with live data.
//! Disconnecting drops the receiver (unsubscribes). Streams end when the shutdown
//! token fires.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::hub::fanout::FanOutHub;
use crate::metrics::{Metrics, MetricsSnapshot};

#[derive(Clone)]
struct HttpState {
    hub: Arc<FanOutHub>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

/// Builds the router. Streams close once `shutdown` is cancelled.
pub fn router(hub: Arc<FanOutHub>, metrics: Arc<Metrics>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/stream/events", get(stream_events))
        .route("/stream/snapshots", get(stream_snapshots))
        .route("/metrics", get(get_metrics))
        .with_state(HttpState {
            hub,
            metrics,
            shutdown,
        })
}

/// Binds `addr` and serves `app` until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), RuntimeError> {
    let listener = TcpListener::bind(addr).await.map_err(RuntimeError::Serve)?;
    if let Ok(local) = listener.local_addr() {
        tracing::info!(addr = %local, "http surface listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(RuntimeError::Serve)
}

async fn stream_events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.hub.subscribe_events();
    Sse::new(sse_frames(rx, state.shutdown)).keep_alive(KeepAlive::default())
}

async fn stream_snapshots(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.hub.subscribe_snapshots();
    Sse::new(sse_frames(rx, state.shutdown)).keep_alive(KeepAlive::default())
}

async fn get_metrics(State(state): State<HttpState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

fn sse_frames<T>(
    rx: broadcast::Receiver<T>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static
where
    T: Serialize + Clone + Send + 'static,
{
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => match SseEvent::default().json_data(&item) {
                    Ok(frame) => return Some((Ok(frame), rx)),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode stream frame; skipped");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "stream client lagged");
                    let frame = SseEvent::default().event("lagged").data(skipped.to_string());
                    return Some((Ok(frame), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .take_until(shutdown.cancelled_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn setup() -> (Arc<FanOutHub>, Arc<Metrics>, CancellationToken, Router) {
        let metrics = Metrics::new();
        let hub = Arc::new(FanOutHub::new(4, Arc::clone(&metrics)));
        let token = CancellationToken::new();
        let app = router(Arc::clone(&hub), Arc::clone(&metrics), token.clone());
        (hub, metrics, token, app)
    }

    async fn next_frame(body: Body) -> String {
        let mut data = body.into_data_stream();
        loop {
            let chunk = data.next().await.unwrap().unwrap();
            let text = String::from_utf8(chunk.to_vec()).unwrap();
            // Skip keep-alive comments.
            if !text.starts_with(':') {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_json() {
        let (_hub, metrics, _token, app) = setup();
        metrics.record_dispatch_dropped();

        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["dispatch"]["dropped"], 1);
    }

    #[tokio::test]
    async fn event_stream_emits_data_frames() {
        let (hub, _metrics, _token, app) = setup();

        let resp = app
            .oneshot(Request::get("/stream/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hub.event_subscribers(), 1);

        hub.publish(Event::new("trade", "harbor")).unwrap();
        let frame = next_frame(resp.into_body()).await;
        assert!(frame.starts_with("data: {"), "{frame}");
        assert!(frame.contains("\"type\":\"trade\""));
        assert!(frame.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn lagging_client_gets_lagged_frame() {
        let (hub, _metrics, _token, app) = setup();
        let resp = app
            .oneshot(Request::get("/stream/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        for _ in 0..10 {
            hub.publish(Event::new("flood", "x")).unwrap();
        }
        let frame = next_frame(resp.into_body()).await;
        assert!(frame.starts_with("event: lagged\ndata: 6"), "{frame}");
    }

    #[tokio::test]
    async fn persisted_snapshots_reach_the_snapshot_stream() {
        use crate::dispatch::{self, MemoryStore};
        use crate::events::Snapshot;

        let (hub, metrics, _token, app) = setup();
        let store = Arc::new(MemoryStore::new());
        store.fail_on_type("storm");
        let (dispatch, mut consumer) = dispatch::channel(store.clone(), Arc::clone(&hub), metrics);

        let resp = app
            .oneshot(Request::get("/stream/snapshots").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hub.snapshot_subscribers(), 1);

        dispatch.enqueue_snapshot(Snapshot::new("storm", "valley")).unwrap();
        dispatch
            .enqueue_snapshot(Snapshot::new("weather", "valley").with_payload(serde_json::json!({ "sunny": true })))
            .unwrap();
        assert_eq!(consumer.drain_pending().await, 2);

        let frame = next_frame(resp.into_body()).await;
        assert!(frame.starts_with("data: {"), "{frame}");
        assert!(frame.contains("\"type\":\"weather\""), "{frame}");
        assert!(frame.contains("\"sunny\":true"), "{frame}");
        assert_eq!(store.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn stream_ends_on_shutdown() {
        let (_hub, _metrics, token, app) = setup();
        let resp = app
            .oneshot(Request::get("/stream/snapshots").body(Body::empty()).unwrap())
            .await
            .unwrap();

        token.cancel();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }
}
