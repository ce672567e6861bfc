//! Advisory single-writer locks per conversation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Tracks which panel currently has a turn in flight for each conversation.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    held: DashMap<Uuid, Uuid>,
}

impl ConversationLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `conversation_id` for `panel_id`. Returns `None` if another panel holds it.
    pub fn try_acquire(self: &Arc<Self>, conversation_id: Uuid, panel_id: Uuid) -> Option<ConversationGuard> {
        match self.held.entry(conversation_id) {
            Entry::Occupied(e) => {
                debug!(
                    target: "promptlib::reconcile",
                    "Conversation {} is held by panel {}",
                    conversation_id,
                    e.get()
                );
                None
            }
            Entry::Vacant(v) => {
                v.insert(panel_id);
                Some(ConversationGuard {
                    locks: self.clone(),
                    conversation_id,
                })
            }
        }
    }

    pub fn is_held(&self, conversation_id: Uuid) -> bool {
        self.held.contains_key(&conversation_id)
    }
}

/// Releases the conversation when dropped.
#[derive(Debug)]
pub struct ConversationGuard {
    locks: Arc<ConversationLocks>,
    conversation_id: Uuid,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.locks.held.remove(&self.conversation_id);
    }
}
