//! One chat surface: a controller plus its conversation.

use crate::{
    ConversationGuard, ConversationLocks, ConversationReconciler, PromptlibError, Result,
    StreamSessionController, TurnOutcome,
};
use promptlib_types::{HistoryEntry, SessionSnapshot, SessionStatus, UsageData};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// `None` when the conversation could not be created.
    pub conversation_id: Option<Uuid>,
    pub outcome: TurnOutcome,
}

/// Drives turns for one UI surface and mirrors them into storage.
///
/// `stop` may be called from any task while `send` or `retry` is in progress, including while
/// the user message is still being saved.
pub struct ChatPanel {
    id: Uuid,
    controller: StreamSessionController,
    reconciler: Arc<ConversationReconciler>,
    locks: Arc<ConversationLocks>,
    conversation_id: Mutex<Option<Uuid>>,
    default_model: String,
    /// Held for the whole of a send/retry/resume.
    turn: tokio::sync::Mutex<()>,
    /// Cancellation for the turn in progress, shared with its run.
    turn_cancel: Mutex<Option<CancellationToken>>,
}

/// A turn in progress. Disarms the panel's stop handle when dropped.
struct Turn<'a> {
    cancel: CancellationToken,
    slot: &'a Mutex<Option<CancellationToken>>,
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl Turn<'_> {
    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn disarm(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl ChatPanel {
    pub fn new(
        controller: StreamSessionController,
        reconciler: Arc<ConversationReconciler>,
        locks: Arc<ConversationLocks>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            controller,
            reconciler,
            locks,
            conversation_id: Mutex::new(None),
            default_model: default_model.into(),
            turn: tokio::sync::Mutex::new(()),
            turn_cancel: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        *self.conversation_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_conversation_id(&self, id: Uuid) {
        *self.conversation_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.controller.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.controller.status()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.controller.snapshot().conversation_history
    }

    /// Stop the turn in progress.
    ///
    /// A turn that has not reached the provider yet is cancelled before it does. Returns `false`
    /// when there is nothing to stop.
    pub fn stop(&self) -> bool {
        if self.controller.stop() {
            return true;
        }

        let pending = self.turn_cancel.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_ref() {
            Some(cancel) if !cancel.is_cancelled() => {
                cancel.cancel();
                info!(target: "promptlib::stream", "Panel {} stopped before the run started", self.id);
                true
            }
            _ => false,
        }
    }

    /// Send a user prompt and wait for the turn to finish.
    ///
    /// The user message is persisted before the provider is called. The assistant message and
    /// the conversation totals are written only when the turn completes.
    pub async fn send(&self, text: &str, model: Option<&str>) -> Result<TurnReport> {
        let turn = self.begin_turn()?;
        let model = model.unwrap_or(&self.default_model).to_string();
        let turn_started = Instant::now();

        let mut guard = self.conversation_id().map(|id| self.acquire(id)).transpose()?;
        let conversation_id = match self.conversation_id() {
            Some(id) => Some(id),
            None => {
                let created = self.reconciler.ensure_conversation(text, &model).await;
                if let Some(id) = created {
                    self.set_conversation_id(id);
                    guard = Some(self.acquire(id)?);
                }
                created
            }
        };

        if let Some(id) = conversation_id {
            self.reconciler.record_user_turn(id, text).await;
        }

        let mut prompt = self.history();
        prompt.push(HistoryEntry::user(text));
        let handle = self
            .controller
            .start_cancellable(prompt, &model, turn.cancel_token())?;
        debug!(
            target: "promptlib::stream",
            "Panel {} started session {} (conversation {:?})",
            self.id,
            handle.session_id(),
            conversation_id
        );

        let outcome = handle.outcome().await;
        turn.disarm();
        self.finish_turn(conversation_id, &model, &outcome, turn_started)
            .await;
        drop(guard);

        Ok(TurnReport {
            conversation_id,
            outcome,
        })
    }

    /// Re-run the last prompt after a failed or stopped turn. No further user message is
    /// persisted.
    pub async fn retry(&self) -> Result<TurnReport> {
        let turn = self.begin_turn()?;
        let model = self
            .controller
            .last_model()
            .ok_or(PromptlibError::NothingToRetry)?;
        let turn_started = Instant::now();

        let conversation_id = self.conversation_id();
        let guard = conversation_id.map(|id| self.acquire(id)).transpose()?;

        let handle = self.controller.retry_cancellable(turn.cancel_token())?;
        info!(
            target: "promptlib::stream",
            "Panel {} retrying with session {}",
            self.id,
            handle.session_id()
        );

        let outcome = handle.outcome().await;
        turn.disarm();
        self.finish_turn(conversation_id, &model, &outcome, turn_started)
            .await;
        drop(guard);

        Ok(TurnReport {
            conversation_id,
            outcome,
        })
    }

    /// Load a stored conversation into this panel. Later sends append to it.
    pub async fn resume(&self, conversation_id: Uuid) -> Result<Vec<HistoryEntry>> {
        let _turn = self.begin_turn()?;
        let history = self.reconciler.load_history(conversation_id).await?;
        self.controller.load_history(history.clone())?;
        self.set_conversation_id(conversation_id);
        info!(
            target: "promptlib::stream",
            "Panel {} resumed conversation {} ({} messages)",
            self.id,
            conversation_id,
            history.len()
        );
        Ok(history)
    }

    fn begin_turn(&self) -> Result<Turn<'_>> {
        let guard = self
            .turn
            .try_lock()
            .map_err(|_| PromptlibError::SessionInFlight(self.current_session()))?;
        if !self.controller.status().accepts_start() {
            return Err(PromptlibError::SessionInFlight(self.current_session()));
        }

        let cancel = CancellationToken::new();
        *self.turn_cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        Ok(Turn {
            cancel,
            slot: &self.turn_cancel,
            _guard: guard,
        })
    }

    fn current_session(&self) -> Uuid {
        self.controller.snapshot().session_id.unwrap_or_default()
    }

    fn acquire(&self, conversation_id: Uuid) -> Result<ConversationGuard> {
        self.locks
            .try_acquire(conversation_id, self.id)
            .ok_or(PromptlibError::ConversationBusy(conversation_id))
    }

    async fn finish_turn(
        &self,
        conversation_id: Option<Uuid>,
        model: &str,
        outcome: &TurnOutcome,
        turn_started: Instant,
    ) {
        let (Some(id), TurnOutcome::Completed { content, usage, .. }) = (conversation_id, outcome)
        else {
            return;
        };

        self.reconciler
            .record_assistant_turn(id, content, *usage)
            .await;
        if let Some(UsageData { prompt_tokens, .. }) = usage {
            self.reconciler
                .patch_user_token_count(id, *prompt_tokens)
                .await;
        }
        self.reconciler
            .patch_conversation_stats(id, model, *usage, turn_started)
            .await;
    }
}
