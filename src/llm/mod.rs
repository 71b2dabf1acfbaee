//! Completion bridge
//!
//! Abstraction over the external LLM provider. Given an ordered sequence of
//! role-tagged messages it produces assistant text, either atomically or as
//! a lazy stream of increments. Implementations never touch the message
//! store; failures surface as [`AppError::Upstream`].
//!
//! [`AppError::Upstream`]: crate::error::AppError::Upstream

pub mod openai;

pub use openai::OpenAiBridge;

use crate::chat::models::Message;
use crate::error::AppError;
use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use std::pin::Pin;

/// One role-tagged utterance in the shape the completion provider expects
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,
    /// Utterance text
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.clone(),
            content: message.content.clone(),
        }
    }
}

/// Lazy finite sequence of text increments from a streaming completion.
///
/// Each item is a delta, not a snapshot; the relay accumulates them. The
/// sequence is not restartable - a retry must issue a new request.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// Capability-set interface over the external completion service
#[async_trait]
pub trait CompletionBridge: Send + Sync {
    /// Return the full assistant text atomically
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError>;

    /// Produce a lazy stream of text increments
    async fn stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream, AppError>;
}
