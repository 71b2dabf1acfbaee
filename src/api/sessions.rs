//! Session registry API endpoints
//!
//! Handles HTTP requests for listing, creating and reading sessions.

use crate::api::RouterState;
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

/// List of known session identifiers
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    /// Session identifiers, newest first
    pub sessions: Vec<String>,
}

/// Identifier of a newly created session
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// The new session identifier
    pub session_id: String,
}

/// One role-tagged message in a session's log
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// "system", "user" or "assistant"
    pub role: String,
    /// Message content
    pub content: String,
}

/// A session's ordered message log
#[derive(Debug, Serialize)]
pub struct SessionMessagesResponse {
    /// Messages in insertion order, system message included; the client
    /// renders only user/assistant roles
    pub messages: Vec<MessageResponse>,
}

/// GET /api/sessions - List all session identifiers
pub async fn list_sessions(
    State((store, _)): State<RouterState>,
) -> Result<Json<SessionsResponse>, AppError> {
    let sessions = store.list_sessions().await?;
    Ok(Json(SessionsResponse { sessions }))
}

/// POST /api/sessions/new - Create a new session
pub async fn create_session(
    State((store, _)): State<RouterState>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let session_id = store.create_session().await?;
    Ok(Json(CreateSessionResponse { session_id }))
}

/// GET /api/sessions/:id - Get a session's messages in insertion order
pub async fn get_session(
    State((store, _)): State<RouterState>,
    Path(id): Path<String>,
) -> Result<Json<SessionMessagesResponse>, AppError> {
    let messages = store.get_session(&id).await?;

    let messages = messages
        .into_iter()
        .map(|m| MessageResponse {
            role: m.role,
            content: m.content,
        })
        .collect();

    Ok(Json(SessionMessagesResponse { messages }))
}
