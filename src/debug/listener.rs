//! The well-known local listener: accepts pushed debug events and fans them
//! out to live SSE subscribers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::{Category, DebugBus, DebugEvent, EventType};

pub fn router(bus: Arc<DebugBus>) -> Router {
    Router::new()
        .route("/events", post(receive_event))
        .route("/events/stream", get(stream_events))
        .route("/health", get(health))
        .with_state(bus)
}

/// Serve until the process is stopped.
pub async fn serve(listener: TcpListener, bus: Arc<DebugBus>) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "debug listener accepting events");
    bus.emit(
        bus.event(Category::System, EventType::Session)
            .with_method("listener.start")
            .with_payload(serde_json::json!({ "addr": addr.to_string() })),
    );
    axum::serve(listener, router(bus)).await
}

/// Missing required fields are rejected by the extractor before this runs.
async fn receive_event(
    State(bus): State<Arc<DebugBus>>,
    Json(event): Json<DebugEvent>,
) -> StatusCode {
    bus.emit(event);
    StatusCode::ACCEPTED
}

async fn stream_events(
    State(bus): State<Arc<DebugBus>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let rx = bus.subscribe().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Event::default().event("debug").json_data(&event).ok().map(Ok),
        // Lagged subscriber: skip what was missed.
        Err(_) => None,
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn health(State(bus): State<Arc<DebugBus>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "subscribers": bus.subscriber_count(),
    }))
}
