//! Chat relay
//!
//! Server-side coordinator for one chat turn. States per in-flight request:
//! `Idle -> Received -> Streaming -> Complete | Failed`. The relay validates
//! the user message, appends it to the store, drives the completion bridge
//! over the session's full history, normalizes increments to cumulative
//! snapshots, and appends the final assistant message before emitting the
//! terminal success event. Exactly one terminal event is emitted per turn.
//!
//! Transport-agnostic: the WebSocket and chunked-HTTP endpoints both forward
//! the event stream produced here, frame for frame.

use crate::chat::models::{Message, MessageRole};
use crate::chat::store::MessageStore;
use crate::llm::{ChatMessage, CompletionBridge};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Transient progress event for one in-flight chat turn. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// The user message was validated and durably appended
    #[serde(rename = "message_received")]
    MessageReceived,
    /// Cumulative text so far - always a full snapshot, never a delta, so
    /// the client renders by overwrite
    #[serde(rename = "stream_chunk")]
    StreamChunk {
        /// Full assistant text produced so far
        full_content: String,
    },
    /// Terminal, successful; the assistant message is already durable
    #[serde(rename = "stream_complete")]
    StreamComplete {
        /// Final full assistant text
        content: String,
    },
    /// Terminal failure; the user message remains persisted
    #[serde(rename = "error")]
    Error {
        /// Human-readable reason
        message: String,
    },
}

/// Stream of progress events for one chat turn
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Tracks sessions with a turn in flight
///
/// At most one in-flight turn per session, across all connections. A second
/// attempt is rejected, never queued.
#[derive(Clone, Default)]
pub struct ActiveTurns {
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl ActiveTurns {
    /// Try to claim the session for a turn
    ///
    /// Returns `None` while another turn is streaming for the session. The
    /// claim is released when the returned guard drops, including when the
    /// transport disconnects mid-stream.
    fn begin(&self, session_id: &str) -> Option<TurnGuard> {
        let mut sessions = self.sessions.lock().expect("active turns lock poisoned");
        if sessions.contains(session_id) {
            return None;
        }
        sessions.insert(session_id.to_string());
        Some(TurnGuard {
            session_id: session_id.to_string(),
            sessions: Arc::clone(&self.sessions),
        })
    }
}

/// RAII claim on a session's single in-flight turn
struct TurnGuard {
    session_id: String,
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session_id);
        }
    }
}

/// Server-side coordinator implementing the per-turn state machine
pub struct ChatRelay {
    store: Arc<MessageStore>,
    bridge: Arc<dyn CompletionBridge>,
    active: ActiveTurns,
}

impl ChatRelay {
    /// Create a relay over a message store and a completion bridge
    pub fn new(store: Arc<MessageStore>, bridge: Arc<dyn CompletionBridge>) -> Self {
        Self {
            store,
            bridge,
            active: ActiveTurns::default(),
        }
    }

    /// Run one chat turn, yielding progress events
    ///
    /// Dropping the returned stream abandons the in-flight bridge call; the
    /// assistant message is written only after the bridge stream finishes,
    /// so a disconnect can never persist a partial answer.
    pub fn run_turn(&self, session_id: String, user_text: String) -> EventStream {
        let store = Arc::clone(&self.store);
        let bridge = Arc::clone(&self.bridge);
        let active = self.active.clone();

        Box::pin(async_stream::stream! {
            let trimmed = user_text.trim().to_string();
            if trimmed.is_empty() {
                yield StreamEvent::Error {
                    message: "Message cannot be empty".to_string(),
                };
                return;
            }

            let _guard = match active.begin(&session_id) {
                Some(guard) => guard,
                None => {
                    info!(session_id = %session_id, "Rejected message during active turn");
                    yield StreamEvent::Error {
                        message: "A response is already in progress for this session"
                            .to_string(),
                    };
                    return;
                }
            };

            // A created session always opens with its system message; no
            // rows means the identifier was never created.
            match store.session_exists(&session_id).await {
                Ok(true) => {}
                Ok(false) => {
                    yield StreamEvent::Error {
                        message: format!("Session not found: {}", session_id),
                    };
                    return;
                }
                Err(e) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    return;
                }
            }

            // Durable before any response is sent.
            let user_message =
                Message::new(session_id.clone(), MessageRole::User, trimmed);
            if let Err(e) = store.append_message(&user_message).await {
                error!(session_id = %session_id, error = %e, "Failed to store user message");
                yield StreamEvent::Error { message: e.to_string() };
                return;
            }
            yield StreamEvent::MessageReceived;

            // Full history, including the just-appended user message.
            let history: Vec<ChatMessage> = match store.get_session(&session_id).await {
                Ok(messages) => messages.iter().map(ChatMessage::from).collect(),
                Err(e) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    return;
                }
            };

            let mut completion = match bridge.stream(&history).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Completion request failed");
                    yield StreamEvent::Error { message: e.to_string() };
                    return;
                }
            };

            // Normalize deltas to cumulative snapshots so lost or repeated
            // frames degrade to a harmless overwrite on the client.
            let mut full_content = String::new();
            while let Some(delta) = completion.next().await {
                match delta {
                    Ok(delta) => {
                        full_content.push_str(&delta);
                        yield StreamEvent::StreamChunk {
                            full_content: full_content.clone(),
                        };
                    }
                    Err(e) => {
                        // No partial assistant message is persisted; the
                        // user message stays so context is not lost.
                        error!(session_id = %session_id, error = %e, "Completion stream failed");
                        yield StreamEvent::Error { message: e.to_string() };
                        return;
                    }
                }
            }

            // Durable before the client can see completion, so a reload
            // from the store matches what was shown live.
            let assistant_message = Message::new(
                session_id.clone(),
                MessageRole::Assistant,
                full_content.clone(),
            );
            if let Err(e) = store.append_message(&assistant_message).await {
                error!(session_id = %session_id, error = %e, "Failed to store assistant message");
                yield StreamEvent::Error { message: e.to_string() };
                return;
            }

            info!(
                session_id = %session_id,
                response_len = full_content.len(),
                "Chat turn complete"
            );
            yield StreamEvent::StreamComplete { content: full_content };
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_turns_single_claim() {
        let active = ActiveTurns::default();

        let guard = active.begin("session-1");
        assert!(guard.is_some());
        assert!(active.begin("session-1").is_none());
        // Other sessions are unaffected
        assert!(active.begin("session-2").is_some());

        drop(guard);
        assert!(active.begin("session-1").is_some());
    }

    #[test]
    fn test_stream_event_wire_shape() {
        let received = serde_json::to_value(StreamEvent::MessageReceived).unwrap();
        assert_eq!(received["type"], "message_received");

        let chunk = serde_json::to_value(StreamEvent::StreamChunk {
            full_content: "so far".to_string(),
        })
        .unwrap();
        assert_eq!(chunk["type"], "stream_chunk");
        assert_eq!(chunk["full_content"], "so far");

        let complete = serde_json::to_value(StreamEvent::StreamComplete {
            content: "done".to_string(),
        })
        .unwrap();
        assert_eq!(complete["type"], "stream_complete");
        assert_eq!(complete["content"], "done");

        let error = serde_json::to_value(StreamEvent::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "boom");
    }
}
