//! Chat data models
//!
//! Defines the message roles, the persisted message row, and the fixed
//! system instruction that opens every session.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fixed system instruction inserted as the first message of every new
/// session. Not user-editable.
pub const SYSTEM_PROMPT: &str = include_str!("../../prompt.md");

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Fixed instruction at the head of a session
    System,
    /// Message from the user
    User,
    /// Message from the assistant/AI
    Assistant,
}

impl MessageRole {
    /// Convert the role to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s {
            "system" => MessageRole::System,
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

/// A single persisted message in a session's append-only log
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    /// Unique identifier for the message
    pub id: String,
    /// Identifier of the session this message belongs to
    pub session_id: String,
    /// Role of the message sender
    pub role: String, // Stored as "system", "user" or "assistant" in DB
    /// Content of the message
    pub content: String,
    /// When the message was created (Unix timestamp)
    pub created_at: i64,
}

impl Message {
    /// Create a new message with a generated id and current timestamp
    pub fn new(session_id: String, role: MessageRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            role: role.as_str().to_string(),
            content,
            created_at: Utc::now().timestamp(),
        }
    }

    /// Get the message role as enum
    #[allow(dead_code)]
    pub fn role_enum(&self) -> MessageRole {
        MessageRole::from(self.role.as_str())
    }
}
