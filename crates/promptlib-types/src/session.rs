//! Stream session types and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MessageRole;

/// Status of a stream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No run has been issued yet.
    #[default]
    Idle,
    /// Request sent, no delta received yet.
    Connecting,
    /// At least one delta has been folded.
    Streaming,
    /// Provider stream ended on its own.
    Completed,
    /// Cancelled by the user.
    Stopped,
    /// Transport or provider failure.
    Error,
}

impl SessionStatus {
    /// Whether a run is in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Streaming)
    }

    /// Whether a new `start` may be issued from this state.
    pub fn accepts_start(&self) -> bool {
        !self.is_in_flight()
    }
}

/// One entry of the in-memory conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn to_prompt_message(&self) -> PromptMessage {
        PromptMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A message sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Authoritative token counts reported by the provider after a stream drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageData {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Published view of a session. Observers always receive the complete-so-far text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current session, `None` before the first run.
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,
    pub accumulated_content: String,
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
