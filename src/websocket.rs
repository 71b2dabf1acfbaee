//! WebSocket transport for streaming chat
//!
//! This module handles the persistent per-session chat channel: inbound
//! `{"message"}` frames start a relay turn and progress comes back as
//! `StreamEvent` JSON frames. Supports ping/pong for connection keepalive.

use crate::api::RouterState;
use crate::chat::relay::StreamEvent;
use crate::chat::ChatRelay;
use crate::error::AppError;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Inbound chat frame from the client
#[derive(Debug, Deserialize)]
pub struct ChatFrame {
    /// User message text
    pub message: String,
}

/// WebSocket upgrade handler for `/ws/:id`
///
/// Unknown sessions are rejected with 404 before the upgrade completes.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State((store, relay)): State<RouterState>,
) -> Result<Response, AppError> {
    if !store.session_exists(&session_id).await? {
        return Err(AppError::SessionNotFound(session_id));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session_id, relay)))
}

// Handle one WebSocket connection for one session
async fn handle_socket(socket: WebSocket, session_id: String, relay: Arc<ChatRelay>) {
    let (mut sender, mut receiver) = socket.split();

    info!(session_id = %session_id, "WebSocket client connected");

    // Channel so the turn task and the ping task share one writer
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WsMessage>();

    // Task to forward messages from channel to sender
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                error!("Failed to send message: {}", e);
                break;
            }
        }
    });

    // Task to send periodic pings
    let ping_tx = tx.clone();
    let mut ping_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
            if ping_tx.send(WsMessage::Ping(vec![])).is_err() {
                break;
            }
        }
    });

    // Receive messages
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        // Handle for the in-flight turn, so a closed socket abandons the
        // upstream call instead of letting it run unattended.
        let mut turn_task: Option<tokio::task::JoinHandle<()>> = None;

        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    let frame: ChatFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(session_id = %recv_session, error = %e, "Malformed chat frame");
                            let event = StreamEvent::Error {
                                message: format!("Malformed request: {}", e),
                            };
                            if send_event(&tx, &event).is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    // A second message on this socket while a turn streams is
                    // rejected here; a turn started from another connection on
                    // the same session is rejected by the relay's guard. Both
                    // rejections surface as an error event, never a silent drop.
                    let in_flight = turn_task.as_ref().is_some_and(|t| !t.is_finished());
                    if in_flight {
                        let event = StreamEvent::Error {
                            message: "A response is already in progress for this session"
                                .to_string(),
                        };
                        if send_event(&tx, &event).is_err() {
                            break;
                        }
                        continue;
                    }

                    let mut events = relay.run_turn(recv_session.clone(), frame.message);
                    let turn_tx = tx.clone();
                    turn_task = Some(tokio::spawn(async move {
                        while let Some(event) = events.next().await {
                            if send_event(&turn_tx, &event).is_err() {
                                break;
                            }
                        }
                    }));
                }
                Ok(WsMessage::Close(_)) => {
                    info!(session_id = %recv_session, "WebSocket client disconnected");
                    break;
                }
                Ok(WsMessage::Pong(_)) => {
                    // Client responded to ping
                }
                Err(e) => {
                    error!(session_id = %recv_session, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }

        // Abandon any in-flight turn; the relay persists the assistant
        // message only after the bridge stream completes, so aborting here
        // cannot leave a partial answer in the store.
        if let Some(turn) = turn_task {
            turn.abort();
        }
    });

    // Wait for any task to complete
    tokio::select! {
        _ = &mut send_task => {
            ping_task.abort();
            recv_task.abort();
        }
        _ = &mut ping_task => {
            send_task.abort();
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            ping_task.abort();
        }
    }

    info!(session_id = %session_id, "WebSocket connection closed");
}

// Serialize and queue one event frame; Err means the connection is gone.
fn send_event(tx: &UnboundedSender<WsMessage>, event: &StreamEvent) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    tx.send(WsMessage::Text(json)).map_err(|_| ())
}
