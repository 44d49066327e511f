//! # Event Stream API
//!
//! Fans deploy events out to any number of observers. The core publishes
//! into the broadcaster and never learns who is listening.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::{
    stream::{self, Stream},
    SinkExt, StreamExt,
};
use launchpad_core::DeployEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::SharedState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn heartbeat() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")
}

fn event_name(event: &DeployEvent) -> &'static str {
    match event {
        DeployEvent::CommandOutput(_) => "commandOutput",
        DeployEvent::CommandComplete { .. } => "commandComplete",
    }
}

/// SSE endpoint for live deploy output
///
/// Idle connections get a `heartbeat` comment every 15 seconds.
pub async fn sse_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcaster.subscribe();
    let shutdown = state.shutdown.clone();

    let stream = stream::unfold(rx, move |mut rx| {
        let shutdown = shutdown.clone();
        async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    next = rx.recv() => next,
                };

                match next {
                    Ok(event) => {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        let sse = Event::default().event(event_name(&event)).data(json);
                        return Some((Ok(sse), rx));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "SSE subscriber lagged, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    });

    Sse::new(stream).keep_alive(heartbeat())
}

/// WebSocket endpoint streaming deploy events as JSON text frames
pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_events(socket, state))
}

async fn forward_events(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.broadcaster.subscribe());

    let send_task = async {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket subscriber lagged, events dropped");
                }
            }
        }
    };

    // Inbound frames are ignored; we only watch for the client leaving
    let recv_task = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    };

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
        _ = state.shutdown.cancelled() => {}
    }
    tracing::debug!("WebSocket subscriber detached");
}
