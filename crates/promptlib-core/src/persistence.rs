//! Persistence adapter contract consumed by the reconciler.

use crate::Result;
use async_trait::async_trait;
use promptlib_types::{
    Conversation, ConversationMessage, ConversationPatch, NewConversation, NewConversationMessage,
};
use uuid::Uuid;

/// CRUD over conversations and their messages.
///
/// Implementations own `message_order`: callers never supply it, and the adapter must assign
/// contiguous, strictly increasing values per conversation even with concurrent writers.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn create_conversation(&self, fields: NewConversation) -> Result<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    async fn update_conversation(&self, id: Uuid, patch: ConversationPatch) -> Result<Conversation>;

    /// Conversations that are not deleted, most recently updated first.
    async fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<Conversation>>;

    /// Insert a message. Returns [`PromptlibError::OrderConflict`](crate::PromptlibError::OrderConflict)
    /// when a concurrent writer claimed the same order; the caller may resubmit.
    async fn create_conversation_message(
        &self,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage>;

    /// Messages ordered by `message_order`.
    async fn get_messages_by_conversation_id(&self, id: Uuid) -> Result<Vec<ConversationMessage>>;

    /// Overwrite the token count of the most recent user message.
    async fn update_user_message_tokens(&self, conversation_id: Uuid, prompt_tokens: u32) -> Result<()>;
}
