//! API module
//!
//! Contains HTTP request handlers for the session registry and the
//! chunked-HTTP streaming chat transport.

pub mod chat_stream;
pub mod sessions;

use crate::chat::{ChatRelay, MessageStore};
use std::sync::Arc;

/// Shared state handed to every route handler
pub type RouterState = (Arc<MessageStore>, Arc<ChatRelay>);
