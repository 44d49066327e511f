//! # HTTP API
//!
//! - `deploy` - Deploy trigger, stop control and repository listing
//! - `events` - Live output stream over SSE and WebSocket

pub mod deploy;
pub mod events;

use axum::{
    routing::{get, post},
    Router,
};

use crate::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/deploy", post(deploy::deploy))
        .route("/stop", post(deploy::stop))
        .route("/repos", get(deploy::list_repos))
        .route("/events", get(events::sse_events))
        .route("/ws", get(events::ws_events))
}
