use crate::state::AppState;
use crate::transport::ServerPush;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use relay_core::error::RelayError;
use relay_core::protocol::JsonRpcMessage;
use relay_core::types::SessionId;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.dispatch.transport().len(),
    }))
}

// ── Session stream ──────────────────────────────────────────────────────

pub fn stream_routes() -> Router<AppState> {
    Router::new().route("/sse", get(open_stream))
}

/// Open a session. The first event names the endpoint to post requests to;
/// responses and notifications follow as `message` events.
async fn open_stream(State(state): State<AppState>) -> impl IntoResponse {
    let (session_id, stream) = state.dispatch.connect();
    tracing::info!(session_id = %session_id, "Agent connected");

    let events = stream.enumerate().map(|(seq, push)| {
        let event = match push {
            ServerPush::Endpoint(path) => Event::default()
                .event("endpoint")
                .id(seq.to_string())
                .data(path),
            ServerPush::Message(message) => match Event::default()
                .event("message")
                .id(seq.to_string())
                .json_data(&message)
            {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode session message");
                    Event::default().comment("encode error")
                }
            },
        };
        Ok::<_, Infallible>(event)
    });

    let interval = Duration::from_secs(state.config.server.keep_alive_secs.max(1));
    Sse::new(events).keep_alive(KeepAlive::new().interval(interval))
}

// ── Side channel ────────────────────────────────────────────────────────

pub fn message_routes() -> Router<AppState> {
    Router::new().route("/messages", post(post_message))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Accept a client message for a session. The answer travels on the
/// session's stream, so this only acknowledges receipt.
async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Json(message): Json<JsonRpcMessage>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session_id = query
        .session_id
        .map(SessionId::from)
        .ok_or((StatusCode::BAD_REQUEST, "Missing sessionId".to_string()))?;

    match state.dispatch.transport().post_to_session(&session_id, message) {
        Ok(()) => Ok((StatusCode::ACCEPTED, "Accepted")),
        Err(RelayError::SessionNotFound(_)) => {
            tracing::warn!(session_id = %session_id, "Post for unknown session");
            Err((
                StatusCode::BAD_REQUEST,
                "No transport found for sessionId".to_string(),
            ))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

pub fn session_routes() -> Router<AppState> {
    Router::new().route("/v1/sessions", get(list_sessions))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatch.transport().sessions())
}
