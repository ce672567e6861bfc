//! Chat WebSocket: one [`ChatPanel`] per connection.
//!
//! Session snapshots are forwarded as they are published (latest wins), notifications from the
//! shared bus are forwarded as they arrive, and turn results are reported once reconciliation
//! has finished.

use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use promptlib_core::{ChatPanel, TurnReport};
use promptlib_types::{WsClientMessage, WsServerMessage};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Maximum size of a prompt sent over the socket (64KB).
const MAX_PROMPT_SIZE: usize = 64 * 1024;

pub async fn handle_chat_websocket(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let panel = state.engine.new_panel();
    let panel_id = panel.id();
    info!(target: "promptlib::ws", "Chat panel {} connected", panel_id);

    let mut snapshots = panel.subscribe();
    let mut notifications = state.engine.notifier().subscribe();

    // Replies and turn results from recv_task and turn tasks
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<WsServerMessage>(32);

    let initial = WsServerMessage::Snapshot {
        snapshot: snapshots.borrow_and_update().clone(),
    };
    ws_tx
        .send(Message::Text(serde_json::to_string(&initial)?.into()))
        .await?;

    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = outgoing_rx.recv() => msg,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    WsServerMessage::Snapshot { snapshot }
                }
                received = notifications.recv() => match received {
                    Ok(notification) => WsServerMessage::Notification { notification },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(target: "promptlib::ws", "Panel {} skipped {} notifications", panel_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    warn!(target: "promptlib::ws", "Failed to serialize message for panel {}: {}", panel_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                debug!(
                    target: "promptlib::ws",
                    "WebSocket send failed for panel {} (client likely disconnected): {}",
                    panel_id, e
                );
                break;
            }
        }
    });

    let recv_panel = panel.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let client_msg = match serde_json::from_str::<WsClientMessage>(&text) {
                Ok(m) => m,
                Err(e) => {
                    debug!(target: "promptlib::ws", "Unparseable message from panel {}: {}", panel_id, e);
                    let _ = outgoing_tx
                        .send(WsServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        })
                        .await;
                    continue;
                }
            };

            handle_client_message(&recv_panel, client_msg, &outgoing_tx).await;
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Nobody is watching any more.
    panel.stop();
    info!(target: "promptlib::ws", "Chat panel {} disconnected", panel_id);
    Ok(())
}

async fn handle_client_message(
    panel: &Arc<ChatPanel>,
    msg: WsClientMessage,
    outgoing_tx: &mpsc::Sender<WsServerMessage>,
) {
    match msg {
        WsClientMessage::Send { content, model } => {
            if content.len() > MAX_PROMPT_SIZE {
                warn!(
                    target: "promptlib::ws",
                    "Prompt too large ({} bytes) from panel {}, max {} bytes",
                    content.len(),
                    panel.id(),
                    MAX_PROMPT_SIZE
                );
                let _ = outgoing_tx
                    .send(WsServerMessage::Error {
                        message: format!("Prompt exceeds {} bytes", MAX_PROMPT_SIZE),
                    })
                    .await;
                return;
            }
            if content.trim().is_empty() {
                let _ = outgoing_tx
                    .send(WsServerMessage::Error {
                        message: "Prompt is empty".to_string(),
                    })
                    .await;
                return;
            }

            // Runs on its own task so a later stop message is handled while the turn streams.
            let panel = panel.clone();
            let tx = outgoing_tx.clone();
            tokio::spawn(async move {
                let result = panel.send(&content, model.as_deref()).await;
                let _ = tx.send(turn_message(result)).await;
            });
        }
        WsClientMessage::Stop => {
            if !panel.stop() {
                debug!(target: "promptlib::ws", "Stop from panel {} with nothing in flight", panel.id());
            }
        }
        WsClientMessage::Retry => {
            let panel = panel.clone();
            let tx = outgoing_tx.clone();
            tokio::spawn(async move {
                let result = panel.retry().await;
                let _ = tx.send(turn_message(result)).await;
            });
        }
        WsClientMessage::Resume { conversation_id } => {
            let msg = match panel.resume(conversation_id).await {
                Ok(history) => WsServerMessage::ConversationLoaded {
                    conversation_id,
                    history,
                },
                Err(e) => WsServerMessage::Error {
                    message: e.to_string(),
                },
            };
            let _ = outgoing_tx.send(msg).await;
        }
        WsClientMessage::Ping { timestamp } => {
            let _ = outgoing_tx.send(WsServerMessage::Pong { timestamp }).await;
            tracing::trace!(target: "promptlib::ws::ping", "Sent pong for timestamp: {}", timestamp);
        }
    }
}

/// Message reporting the end of a send or retry.
pub fn turn_message(result: promptlib_core::Result<TurnReport>) -> WsServerMessage {
    match result {
        Ok(report) => WsServerMessage::TurnComplete {
            conversation_id: report.conversation_id,
            status: report.outcome.status(),
            usage: report.outcome.usage(),
        },
        Err(e) => WsServerMessage::Error {
            message: e.to_string(),
        },
    }
}
