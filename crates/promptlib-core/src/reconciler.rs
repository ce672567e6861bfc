//! Mirrors completed turns into the persistence layer.
//!
//! Nothing in here returns an error to the streaming path: failures are logged at warn and
//! surfaced as notifications, and the in-memory session is never rolled back.

use crate::{
    estimate_cost, estimate_tokens, provider_family, Notifier, PersistenceAdapter, PromptlibError,
    Result,
};
use promptlib_types::{
    ConversationMessage, ConversationPatch, HistoryEntry, MessageRole, NewConversation,
    NewConversationMessage, UsageData,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Titles longer than this are cut and suffixed with "...".
pub const TITLE_MAX_CHARS: usize = 50;

/// Attempts for a message write that loses the order race.
const MAX_ORDER_ATTEMPTS: usize = 3;

/// Conversation title derived from the first prompt.
pub fn derive_title(prompt: &str) -> String {
    if prompt.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = prompt.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    } else {
        prompt.to_string()
    }
}

pub struct ConversationReconciler {
    store: Arc<dyn PersistenceAdapter>,
    notifier: Notifier,
}

impl ConversationReconciler {
    pub fn new(store: Arc<dyn PersistenceAdapter>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Create the conversation for a panel's first turn.
    ///
    /// Returns `None` when creation failed; the caller keeps no id and tries again next turn.
    pub async fn ensure_conversation(&self, first_prompt: &str, model_id: &str) -> Option<Uuid> {
        let fields = NewConversation {
            title: derive_title(first_prompt),
            model_name: model_id.to_string(),
            model_provider: provider_family(model_id).to_string(),
            original_prompt_content: first_prompt.to_string(),
            metadata: serde_json::Value::Null,
        };

        match self.store.create_conversation(fields).await {
            Ok(conversation) => {
                info!(
                    target: "promptlib::reconcile",
                    "Created conversation {} ({:?}) for model {}",
                    conversation.id, conversation.title, model_id
                );
                Some(conversation.id)
            }
            Err(e) => {
                self.report("create conversation", &e);
                None
            }
        }
    }

    /// Persist the user message with a provisional token estimate.
    pub async fn record_user_turn(&self, conversation_id: Uuid, text: &str) -> Option<ConversationMessage> {
        self.insert_message(conversation_id, MessageRole::User, text, estimate_tokens(text))
            .await
    }

    /// Persist the assistant message of a completed turn.
    pub async fn record_assistant_turn(
        &self,
        conversation_id: Uuid,
        content: &str,
        usage: Option<UsageData>,
    ) -> Option<ConversationMessage> {
        let token_count = usage
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(content));
        self.insert_message(conversation_id, MessageRole::Assistant, content, token_count)
            .await
    }

    /// Replace the provisional user token count with the provider's figure. Best effort.
    pub async fn patch_user_token_count(&self, conversation_id: Uuid, prompt_tokens: u32) {
        if let Err(e) = self
            .store
            .update_user_message_tokens(conversation_id, prompt_tokens)
            .await
        {
            debug!(
                target: "promptlib::reconcile",
                "Skipping user token patch for {}: {}", conversation_id, e
            );
        }
    }

    /// Update the running totals after a completed turn.
    pub async fn patch_conversation_stats(
        &self,
        conversation_id: Uuid,
        model_id: &str,
        usage: Option<UsageData>,
        turn_started: Instant,
    ) -> Option<promptlib_types::Conversation> {
        let token_usage = match self.token_usage_after_turn(conversation_id, usage).await {
            Ok(total) => total,
            Err(e) => {
                self.report("update conversation stats", &e);
                return None;
            }
        };

        let patch = ConversationPatch {
            token_usage: Some(token_usage),
            execution_duration_ms: Some(turn_started.elapsed().as_millis() as u64),
            estimated_cost: Some(estimate_cost(model_id, token_usage)),
            ..Default::default()
        };

        match self.store.update_conversation(conversation_id, patch).await {
            Ok(conversation) => {
                debug!(
                    target: "promptlib::reconcile",
                    "Conversation {} now at {} tokens, ${:.5}",
                    conversation_id, conversation.token_usage, conversation.estimated_cost
                );
                Some(conversation)
            }
            Err(e) => {
                self.report("update conversation stats", &e);
                None
            }
        }
    }

    /// Stored messages of a conversation as in-memory history.
    pub async fn load_history(&self, conversation_id: Uuid) -> Result<Vec<HistoryEntry>> {
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(PromptlibError::ConversationNotFound(conversation_id));
        }

        let messages = self
            .store
            .get_messages_by_conversation_id(conversation_id)
            .await?;
        Ok(messages
            .into_iter()
            .map(|m| HistoryEntry {
                id: m.id,
                role: m.role,
                content: m.content,
                timestamp: m.created_at,
            })
            .collect())
    }

    async fn token_usage_after_turn(&self, conversation_id: Uuid, usage: Option<UsageData>) -> Result<u64> {
        let stored = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(PromptlibError::ConversationNotFound(conversation_id))?
            .token_usage;

        if let Some(usage) = usage {
            return Ok(stored + u64::from(usage.total_tokens));
        }

        let persisted: u64 = self
            .store
            .get_messages_by_conversation_id(conversation_id)
            .await?
            .iter()
            .map(|m| u64::from(m.token_count))
            .sum();
        Ok(persisted.max(stored))
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        token_count: u32,
    ) -> Option<ConversationMessage> {
        let action = match role {
            MessageRole::User => "save your message",
            _ => "save the response",
        };

        let mut attempt = 1;
        loop {
            let message = NewConversationMessage {
                conversation_id,
                role,
                content: content.to_string(),
                token_count,
                metadata: serde_json::Value::Null,
            };

            match self.store.create_conversation_message(message).await {
                Ok(saved) => {
                    debug!(
                        target: "promptlib::reconcile",
                        "Saved {} message #{} in {} ({} tokens)",
                        role.as_str(), saved.message_order, conversation_id, saved.token_count
                    );
                    return Some(saved);
                }
                Err(e) if e.is_retryable() && attempt < MAX_ORDER_ATTEMPTS => {
                    debug!(
                        target: "promptlib::reconcile",
                        "Retrying {} message write in {} (attempt {})",
                        role.as_str(), conversation_id, attempt
                    );
                    attempt += 1;
                }
                Err(e) => {
                    self.report(action, &e);
                    return None;
                }
            }
        }
    }

    fn report(&self, action: &str, error: &PromptlibError) {
        warn!(target: "promptlib::reconcile", "Failed to {}: {}", action, error);
        self.notifier.persistence_failure(action, error);
    }
}
