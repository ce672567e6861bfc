//! WebSocket message protocol between a chat/stream panel and the server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{HistoryEntry, Notification, SessionSnapshot, SessionStatus, UsageData};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// Submit the next user turn.
    Send {
        content: String,
        /// User-facing model id. Falls back to the server default.
        #[serde(default)]
        model: Option<String>,
    },
    /// Cancel the in-flight turn.
    Stop,
    /// Re-run the last prompt after an error or stop.
    Retry,
    /// Continue a stored conversation in this panel.
    Resume { conversation_id: Uuid },
    /// Keepalive.
    Ping { timestamp: u64 },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// Latest session state, including the full accumulated text.
    Snapshot { snapshot: SessionSnapshot },
    /// A turn reached a terminal state and reconciliation finished.
    TurnComplete {
        conversation_id: Option<Uuid>,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageData>,
    },
    /// Stored history was loaded into the panel.
    ConversationLoaded {
        conversation_id: Uuid,
        history: Vec<HistoryEntry>,
    },
    /// Non-blocking notification (e.g. a failed save).
    Notification { notification: Notification },
    /// Request rejected or failed.
    Error { message: String },
    Pong { timestamp: u64 },
}
