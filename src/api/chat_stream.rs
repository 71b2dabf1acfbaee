//! Chunked-HTTP streaming chat endpoint
//!
//! Alternative transport over the same relay contract as the WebSocket:
//! one POST runs one chat turn and the response body is a
//! `text/event-stream` of `data: <event json>` records. Frame payloads are
//! identical to the WebSocket transport's.

use crate::api::RouterState;
use crate::error::AppError;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;

/// Inbound chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message text
    pub message: String,
}

/// POST /api/chat/:id - Run one chat turn, streaming progress events
///
/// Validation and unknown-session failures are rejected with an HTTP status
/// before the stream starts; failures after that surface as an `error`
/// event inside the stream.
pub async fn chat_stream(
    State((store, relay)): State<RouterState>,
    Path(session_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("Message cannot be empty".to_string()));
    }
    if !store.session_exists(&session_id).await? {
        return Err(AppError::SessionNotFound(session_id));
    }

    let events = relay.run_turn(session_id, request.message);
    let sse_stream = events.map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        });
        Ok::<_, std::io::Error>(format!("data: {}\n\n", json))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build SSE response: {}", e)))
}
