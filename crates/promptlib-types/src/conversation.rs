//! Persisted conversation and message records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a stored conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
            ConversationStatus::Deleted => "deleted",
        }
    }

    /// Parse a stored status column. Unknown values map to `Active`.
    pub fn parse(s: &str) -> Self {
        match s {
            "archived" => ConversationStatus::Archived,
            "deleted" => ConversationStatus::Deleted,
            _ => ConversationStatus::Active,
        }
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// A stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Display title (derived from the first prompt).
    pub title: String,
    /// User-facing model identifier the conversation was started with.
    pub model_name: String,
    /// Provider family, e.g. "openai" or "anthropic".
    pub model_provider: String,
    pub status: ConversationStatus,
    pub is_favorite: bool,
    /// Running token total across all turns. Never decreases.
    pub token_usage: u64,
    /// Wall-clock duration of the most recent turn.
    pub execution_duration_ms: u64,
    /// Advisory cost estimate in USD.
    pub estimated_cost: f64,
    /// Prompt text of the first user turn.
    pub original_prompt_content: String,
    /// Free-form key/value data.
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub title: String,
    pub model_name: String,
    pub model_provider: String,
    pub original_prompt_content: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Partial update of a conversation. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ConversationPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.is_favorite.is_none()
            && self.token_usage.is_none()
            && self.execution_duration_ms.is_none()
            && self.estimated_cost.is_none()
            && self.metadata.is_none()
    }
}

/// A stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub token_count: u32,
    /// Position within the conversation, assigned by the store.
    pub message_order: u32,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a message. The store assigns `message_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversationMessage {
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub token_count: u32,
    #[serde(default)]
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_column() {
        for status in [
            ConversationStatus::Active,
            ConversationStatus::Archived,
            ConversationStatus::Deleted,
        ] {
            assert_eq!(ConversationStatus::parse(status.as_str()), status);
        }
        assert_eq!(ConversationStatus::parse("bogus"), ConversationStatus::Active);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        assert_eq!(MessageRole::parse("system"), Some(MessageRole::System));
        assert_eq!(MessageRole::parse("tool"), None);
    }

    #[test]
    fn test_patch_deserializes_partial_body() {
        let patch: ConversationPatch =
            serde_json::from_str(r#"{"is_favorite": true, "title": "Renamed"}"#).unwrap();
        assert_eq!(patch.is_favorite, Some(true));
        assert_eq!(patch.title.as_deref(), Some("Renamed"));
        assert!(patch.status.is_none());
        assert!(!patch.is_empty());
        assert!(ConversationPatch::default().is_empty());
    }
}
