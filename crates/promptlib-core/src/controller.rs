//! Stream session controller.
//!
//! Owns the lifecycle of one run at a time:
//!
//! ```text
//! idle --start--> connecting --first delta--> streaming --stream end--> completed
//! connecting/streaming --stop--> stopped
//! connecting/streaming --failure--> error
//! error/stopped --retry--> connecting
//! completed/stopped/error --start--> connecting
//! ```
//!
//! Every state change happens under one short lock and is published as a full
//! [`SessionSnapshot`]. The delta loop re-checks the session under that same lock before
//! folding, so nothing is appended once [`StreamSessionController::stop`] has returned.

use crate::{LlmProvider, ModelRouter, PromptlibError, ProviderStream, Result, StreamRequest};
use futures::StreamExt;
use promptlib_types::{HistoryEntry, SessionSnapshot, SessionStatus, UsageData};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed {
        content: String,
        usage: Option<UsageData>,
        elapsed: Duration,
    },
    Stopped {
        /// Text folded before the stop.
        content: String,
    },
    Failed {
        message: String,
    },
}

impl TurnOutcome {
    pub fn status(&self) -> SessionStatus {
        match self {
            TurnOutcome::Completed { .. } => SessionStatus::Completed,
            TurnOutcome::Stopped { .. } => SessionStatus::Stopped,
            TurnOutcome::Failed { .. } => SessionStatus::Error,
        }
    }

    pub fn usage(&self) -> Option<UsageData> {
        match self {
            TurnOutcome::Completed { usage, .. } => *usage,
            _ => None,
        }
    }
}

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    session_id: Uuid,
    outcome: oneshot::Receiver<TurnOutcome>,
}

impl RunHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the run to reach a terminal state.
    pub async fn outcome(self) -> TurnOutcome {
        self.outcome.await.unwrap_or_else(|_| TurnOutcome::Failed {
            message: "Run ended without reporting an outcome".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
struct LastRequest {
    prompt_messages: Vec<HistoryEntry>,
    model_id: String,
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<Uuid>,
    status: SessionStatus,
    accumulated: String,
    history: Vec<HistoryEntry>,
    /// Present only while connecting or streaming.
    cancel: Option<CancellationToken>,
    error: Option<String>,
    last_request: Option<LastRequest>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            accumulated_content: self.accumulated.clone(),
            conversation_history: self.history.clone(),
            error: self.error.clone(),
        }
    }

    fn is_current(&self, session_id: Uuid) -> bool {
        self.session_id == Some(session_id) && self.status.is_in_flight()
    }
}

struct Shared {
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }
}

/// Drives request/response cycles against an [`LlmProvider`] and publishes live progress.
///
/// One controller per UI surface. Observers subscribe to a watch channel carrying the latest
/// complete snapshot, so slow observers skip intermediate states instead of replaying them.
pub struct StreamSessionController {
    provider: Arc<dyn LlmProvider>,
    router: Arc<ModelRouter>,
    temperature: f32,
    shared: Arc<Shared>,
}

impl StreamSessionController {
    pub fn new(provider: Arc<dyn LlmProvider>, router: Arc<ModelRouter>, temperature: f32) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        Self {
            provider,
            router,
            temperature,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                snapshots,
            }),
        }
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().status
    }

    /// Model id of the last run, if any.
    pub fn last_model(&self) -> Option<String> {
        self.shared
            .lock()
            .last_request
            .as_ref()
            .map(|r| r.model_id.clone())
    }

    /// Replace the history with a stored conversation. Rejected while a run is in flight.
    pub fn load_history(&self, history: Vec<HistoryEntry>) -> Result<()> {
        let mut state = self.shared.lock();
        if let (true, Some(id)) = (state.status.is_in_flight(), state.session_id) {
            return Err(PromptlibError::SessionInFlight(id));
        }
        *state = SessionState {
            history,
            ..SessionState::default()
        };
        self.shared.publish(&state);
        Ok(())
    }

    /// Start a run over `prompt_messages` (history including the new user turn).
    ///
    /// Rejected with [`PromptlibError::SessionInFlight`] while connecting or streaming; the
    /// existing run is not affected.
    pub fn start(&self, prompt_messages: Vec<HistoryEntry>, model_id: &str) -> Result<RunHandle> {
        self.start_cancellable(prompt_messages, model_id, CancellationToken::new())
    }

    /// Start a run that also ends when `cancel` fires.
    ///
    /// A token cancelled before the run is polled ends it as `stopped` without contacting the
    /// provider.
    pub fn start_cancellable(
        &self,
        prompt_messages: Vec<HistoryEntry>,
        model_id: &str,
        cancel: CancellationToken,
    ) -> Result<RunHandle> {
        let session_id = Uuid::new_v4();

        {
            let mut state = self.shared.lock();
            if !state.status.accepts_start() {
                let current = state.session_id.unwrap_or_default();
                warn!(target: "promptlib::stream", "Rejecting start, session {} is {:?}", current, state.status);
                return Err(PromptlibError::SessionInFlight(current));
            }

            state.session_id = Some(session_id);
            state.status = SessionStatus::Connecting;
            state.accumulated.clear();
            state.error = None;
            state.history = prompt_messages.clone();
            state.cancel = Some(cancel.clone());
            state.last_request = Some(LastRequest {
                prompt_messages: prompt_messages.clone(),
                model_id: model_id.to_string(),
            });
            self.shared.publish(&state);
        }

        let request = StreamRequest {
            model: self.router.resolve(model_id).to_string(),
            messages: prompt_messages
                .iter()
                .map(HistoryEntry::to_prompt_message)
                .collect(),
            temperature: self.temperature,
        };
        info!(
            target: "promptlib::stream",
            "Session {} connecting to {} via {} ({} messages)",
            session_id,
            request.model,
            self.provider.name(),
            request.messages.len()
        );

        let run = SessionRun {
            shared: self.shared.clone(),
            session_id,
            cancel,
            started: Instant::now(),
        };
        let provider = self.provider.clone();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = run.drive(provider, request).await;
            let _ = outcome_tx.send(outcome);
        });

        Ok(RunHandle {
            session_id,
            outcome: outcome_rx,
        })
    }

    /// Re-run the last prompt with the same messages and model.
    ///
    /// Only a run that ended in `error` or `stopped` can be retried; a completed run already has
    /// its reply.
    pub fn retry(&self) -> Result<RunHandle> {
        self.retry_cancellable(CancellationToken::new())
    }

    pub fn retry_cancellable(&self, cancel: CancellationToken) -> Result<RunHandle> {
        let last = {
            let state = self.shared.lock();
            match state.status {
                SessionStatus::Error | SessionStatus::Stopped => state.last_request.clone(),
                _ if state.status.is_in_flight() => {
                    return Err(PromptlibError::SessionInFlight(state.session_id.unwrap_or_default()));
                }
                _ => None,
            }
        };
        let last = last.ok_or(PromptlibError::NothingToRetry)?;
        self.start_cancellable(last.prompt_messages, &last.model_id, cancel)
    }

    /// Cancel the in-flight run.
    ///
    /// Transitions to `stopped` immediately without waiting for the network layer. Returns
    /// `false` (and does nothing) when no run is in flight.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.lock();
        if !state.status.is_in_flight() {
            debug!(target: "promptlib::stream", "Stop ignored in state {:?}", state.status);
            return false;
        }

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.status = SessionStatus::Stopped;
        self.shared.publish(&state);
        info!(
            target: "promptlib::stream",
            "Session {} stopped after {} chars",
            state.session_id.unwrap_or_default(),
            state.accumulated.len()
        );
        true
    }
}

impl Drop for StreamSessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the task that consumes one provider stream.
struct SessionRun {
    shared: Arc<Shared>,
    session_id: Uuid,
    cancel: CancellationToken,
    started: Instant,
}

impl SessionRun {
    async fn drive(self, provider: Arc<dyn LlmProvider>, request: StreamRequest) -> TurnOutcome {
        if self.cancel.is_cancelled() {
            return self.stopped();
        }

        let call = provider.stream_text(request, self.cancel.clone());
        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.stopped(),
            result = call => result,
        };

        let ProviderStream {
            mut text_stream,
            usage,
        } = match stream {
            Ok(stream) => stream,
            Err(e) => return self.fail(e),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stopped(),
                next = text_stream.next() => next,
            };

            match next {
                Some(Ok(delta)) => {
                    if !self.fold(&delta) {
                        return self.stopped();
                    }
                }
                Some(Err(e)) => return self.fail(e),
                None => break,
            }
        }
        drop(text_stream);

        let Some(content) = self.complete() else {
            return self.stopped();
        };

        let usage = match usage.await {
            Ok(usage) => usage,
            Err(e) => {
                debug!(target: "promptlib::stream", "Usage unavailable for session {}: {}", self.session_id, e);
                None
            }
        };

        TurnOutcome::Completed {
            content,
            usage,
            elapsed: self.started.elapsed(),
        }
    }

    /// Append a delta. Returns `false` if the session is no longer in flight.
    fn fold(&self, delta: &str) -> bool {
        let mut state = self.shared.lock();
        if self.cancel.is_cancelled() || !state.is_current(self.session_id) {
            trace!(target: "promptlib::stream", "Dropping delta for stopped session {}", self.session_id);
            return false;
        }

        if state.status == SessionStatus::Connecting {
            state.status = SessionStatus::Streaming;
            debug!(
                target: "promptlib::stream",
                "Session {} first delta after {}ms",
                self.session_id,
                self.started.elapsed().as_millis()
            );
        }
        state.accumulated.push_str(delta);
        self.shared.publish(&state);
        true
    }

    fn complete(&self) -> Option<String> {
        let mut state = self.shared.lock();
        if self.cancel.is_cancelled() || !state.is_current(self.session_id) {
            return None;
        }

        state.status = SessionStatus::Completed;
        state.cancel = None;
        let content = state.accumulated.clone();
        state.history.push(HistoryEntry::assistant(content.clone()));
        self.shared.publish(&state);
        info!(
            target: "promptlib::stream",
            "Session {} completed: {} chars in {}ms",
            self.session_id,
            content.len(),
            self.started.elapsed().as_millis()
        );
        Some(content)
    }

    fn fail(&self, error: PromptlibError) -> TurnOutcome {
        let mut state = self.shared.lock();
        if self.cancel.is_cancelled() || !state.is_current(self.session_id) {
            drop(state);
            return self.stopped();
        }

        state.cancel = None;
        if matches!(error, PromptlibError::Cancelled) {
            state.status = SessionStatus::Stopped;
            self.shared.publish(&state);
            return TurnOutcome::Stopped {
                content: state.accumulated.clone(),
            };
        }

        let message = error.to_string();
        state.status = SessionStatus::Error;
        state.error = Some(message.clone());
        self.shared.publish(&state);
        warn!(target: "promptlib::stream", "Session {} failed: {}", self.session_id, message);
        TurnOutcome::Failed { message }
    }

    /// Outcome for a cancelled run. Moves the session to `stopped` if the cancellation came
    /// from outside the controller.
    fn stopped(&self) -> TurnOutcome {
        let mut state = self.shared.lock();
        if state.session_id != Some(self.session_id) {
            return TurnOutcome::Stopped {
                content: String::new(),
            };
        }

        if state.status.is_in_flight() {
            state.status = SessionStatus::Stopped;
            state.cancel = None;
            self.shared.publish(&state);
            info!(
                target: "promptlib::stream",
                "Session {} cancelled after {} chars",
                self.session_id,
                state.accumulated.len()
            );
        }
        TurnOutcome::Stopped {
            content: state.accumulated.clone(),
        }
    }
}

impl Drop for SessionRun {
    // Reached with the session still in flight only if the task panicked or was torn down.
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if !state.is_current(self.session_id) {
            return;
        }

        let message = "Run ended unexpectedly".to_string();
        state.status = SessionStatus::Error;
        state.cancel = None;
        state.error = Some(message.clone());
        self.shared.publish(&state);
        warn!(target: "promptlib::stream", "Session {}: {}", self.session_id, message);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use proptest::prelude::*;

    fn controller(provider: Arc<QueueProvider>) -> StreamSessionController {
        StreamSessionController::new(provider, Arc::new(ModelRouter::default()), 0.7)
    }

    fn prompt(text: &str) -> Vec<HistoryEntry> {
        vec![HistoryEntry::user(text)]
    }

    #[tokio::test]
    async fn test_completed_run_concatenates_deltas() {
        let usage = UsageData {
            prompt_tokens: 6,
            completion_tokens: 11,
            total_tokens: 17,
        };
        let provider = Arc::new(QueueProvider::with(vec![scripted(
            &["Recur", "sion is", " when a function calls itself."],
            Some(usage),
        )]));
        let controller = controller(provider.clone());

        let outcome = controller
            .start(prompt("Explain recursion"), "gpt-4o")
            .unwrap()
            .outcome()
            .await;

        match outcome {
            TurnOutcome::Completed { content, usage: u, .. } => {
                assert_eq!(content, "Recursion is when a function calls itself.");
                assert_eq!(u, Some(usage));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.accumulated_content, "Recursion is when a function calls itself.");
        assert_eq!(snapshot.conversation_history.len(), 2);
        assert_eq!(
            snapshot.conversation_history[1].content,
            "Recursion is when a function calls itself."
        );

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].model, "openai/gpt-4o");
        assert_eq!(requests[0].messages[0].content, "Explain recursion");
    }

    #[tokio::test]
    async fn test_usage_failure_is_not_fatal() {
        let provider = Arc::new(QueueProvider::with(vec![scripted_without_usage(&["ok"])]));
        let controller = controller(provider);

        let outcome = controller.start(prompt("hi"), "gpt-4o").unwrap().outcome().await;
        assert_eq!(outcome.status(), SessionStatus::Completed);
        assert_eq!(outcome.usage(), None);
        assert_eq!(controller.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_connecting_until_first_delta() {
        let (manual, prepared) = manual();
        let provider = Arc::new(QueueProvider::with(vec![prepared]));
        let controller = controller(provider);
        let mut rx = controller.subscribe();

        let handle = controller.start(prompt("hi"), "claude-sonnet").unwrap();
        assert_eq!(controller.status(), SessionStatus::Connecting);

        manual.deltas.send(Ok("Hel".to_string())).unwrap();
        let snapshot = rx
            .wait_for(|s| s.status == SessionStatus::Streaming)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.accumulated_content, "Hel");

        manual.deltas.send(Ok("lo".to_string())).unwrap();
        drop(manual.deltas);
        manual.usage.send(None).unwrap();

        match handle.outcome().await {
            TurnOutcome::Completed { content, usage, .. } => {
                assert_eq!(content, "Hello");
                assert_eq!(usage, None);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_truncates_and_discards_later_deltas() {
        let (manual, prepared) = manual();
        let provider = Arc::new(QueueProvider::with(vec![prepared]));
        let controller = controller(provider.clone());
        let mut rx = controller.subscribe();

        let handle = controller.start(prompt("count"), "gpt-4o").unwrap();
        manual.deltas.send(Ok("one ".to_string())).unwrap();
        manual.deltas.send(Ok("two ".to_string())).unwrap();
        rx.wait_for(|s| s.accumulated_content == "one two ")
            .await
            .unwrap();

        assert!(controller.stop());
        assert_eq!(controller.status(), SessionStatus::Stopped);

        // Already in the transport buffer when stop was called.
        let _ = manual.deltas.send(Ok("three ".to_string()));

        let outcome = handle.outcome().await;
        assert_eq!(
            outcome,
            TurnOutcome::Stopped {
                content: "one two ".to_string()
            }
        );
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Stopped);
        assert_eq!(snapshot.accumulated_content, "one two ");
        assert!(provider.tokens.lock().unwrap()[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let provider = Arc::new(QueueProvider::with(vec![Prepared::Hang]));
        let controller = controller(provider.clone());
        let mut rx = controller.subscribe();

        let handle = controller.start(prompt("hi"), "gpt-4o").unwrap();
        provider.wait_for_calls(1).await;
        assert!(controller.stop());
        let _ = rx.borrow_and_update();

        assert!(!controller.stop());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(handle.outcome().await.status(), SessionStatus::Stopped);
        assert!(!controller.stop());
    }

    #[tokio::test]
    async fn test_stop_after_completion_is_noop() {
        let provider = Arc::new(QueueProvider::with(vec![scripted(&["done"], None)]));
        let controller = controller(provider);

        controller.start(prompt("hi"), "gpt-4o").unwrap().outcome().await;
        assert!(!controller.stop());
        assert_eq!(controller.status(), SessionStatus::Completed);
        assert_eq!(controller.snapshot().accumulated_content, "done");
    }

    #[tokio::test]
    async fn test_start_rejected_while_in_flight() {
        let provider = Arc::new(QueueProvider::with(vec![Prepared::Hang]));
        let controller = controller(provider.clone());

        let handle = controller.start(prompt("first"), "gpt-4o").unwrap();
        provider.wait_for_calls(1).await;
        let err = controller.start(prompt("second"), "gpt-4o").unwrap_err();
        assert!(matches!(err, PromptlibError::SessionInFlight(id) if id == handle.session_id()));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.session_id, Some(handle.session_id()));
        assert_eq!(snapshot.status, SessionStatus::Connecting);
        assert_eq!(snapshot.conversation_history[0].content, "first");

        controller.stop();
        handle.outcome().await;
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_retry_reuses_prompt() {
        let provider = Arc::new(QueueProvider::with(vec![
            Prepared::Fail("HTTP 503".to_string()),
            scripted(&["recovered"], None),
        ]));
        let controller = controller(provider.clone());

        let outcome = controller.start(prompt("flaky"), "gemini-3-pro").unwrap().outcome().await;
        assert_eq!(
            outcome,
            TurnOutcome::Failed {
                message: "Provider error: HTTP 503".to_string()
            }
        );
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("Provider error: HTTP 503"));

        let outcome = controller.retry().unwrap().outcome().await;
        assert_eq!(outcome.status(), SessionStatus::Completed);
        assert!(controller.snapshot().error.is_none());

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages, requests[1].messages);
        assert_eq!(requests[1].model, "google/gemini-3-pro-preview");
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_text() {
        let (manual, prepared) = manual();
        let provider = Arc::new(QueueProvider::with(vec![prepared]));
        let controller = controller(provider);

        let handle = controller.start(prompt("hi"), "gpt-4o").unwrap();
        manual.deltas.send(Ok("partial".to_string())).unwrap();
        manual
            .deltas
            .send(Err(PromptlibError::Provider("connection reset".to_string())))
            .unwrap();

        assert_eq!(handle.outcome().await.status(), SessionStatus::Error);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.accumulated_content, "partial");
        assert_eq!(snapshot.error.as_deref(), Some("Provider error: connection reset"));
    }

    #[tokio::test]
    async fn test_retry_without_previous_run() {
        let controller = controller(Arc::new(QueueProvider::default()));
        assert!(matches!(controller.retry(), Err(PromptlibError::NothingToRetry)));
    }

    #[tokio::test]
    async fn test_new_turn_after_stop() {
        let provider = Arc::new(QueueProvider::with(vec![Prepared::Hang, scripted(&["second"], None)]));
        let controller = controller(provider.clone());

        let first = controller.start(prompt("first"), "gpt-4o").unwrap();
        provider.wait_for_calls(1).await;
        assert!(controller.stop());
        first.outcome().await;

        let outcome = controller.start(prompt("second"), "gpt-4o").unwrap().outcome().await;
        assert_eq!(outcome.status(), SessionStatus::Completed);
        assert_eq!(controller.snapshot().accumulated_content, "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_rejected_after_completion() {
        let provider = Arc::new(QueueProvider::with(vec![scripted(&["answer"], None)]));
        let controller = controller(provider.clone());

        controller.start(prompt("q"), "gpt-4o").unwrap().outcome().await;
        assert!(matches!(controller.retry(), Err(PromptlibError::NothingToRetry)));
        assert_eq!(controller.status(), SessionStatus::Completed);
        assert_eq!(controller.snapshot().conversation_history.len(), 2);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_stop_reuses_prompt() {
        let provider = Arc::new(QueueProvider::with(vec![Prepared::Hang, scripted(&["again"], None)]));
        let controller = controller(provider.clone());

        let first = controller.start(prompt("q"), "gpt-4o").unwrap();
        provider.wait_for_calls(1).await;
        controller.stop();
        first.outcome().await;

        let outcome = controller.retry().unwrap().outcome().await;
        assert_eq!(outcome.status(), SessionStatus::Completed);
        let history = controller.snapshot().conversation_history;
        let contents: Vec<&str> = history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["q", "again"]);
    }

    #[tokio::test]
    async fn test_token_cancelled_before_start_skips_provider() {
        let provider = Arc::new(QueueProvider::with(vec![scripted(&["unused"], None)]));
        let controller = controller(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = controller
            .start_cancellable(prompt("q"), "gpt-4o", cancel)
            .unwrap()
            .outcome()
            .await;
        assert_eq!(outcome, TurnOutcome::Stopped { content: String::new() });
        assert_eq!(controller.status(), SessionStatus::Stopped);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_external_cancel_moves_session_to_stopped() {
        let (manual, prepared) = manual();
        let provider = Arc::new(QueueProvider::with(vec![prepared]));
        let controller = controller(provider);
        let mut rx = controller.subscribe();
        let cancel = CancellationToken::new();

        let handle = controller
            .start_cancellable(prompt("q"), "gpt-4o", cancel.clone())
            .unwrap();
        manual.deltas.send(Ok("part".to_string())).unwrap();
        rx.wait_for(|s| s.status == SessionStatus::Streaming).await.unwrap();

        cancel.cancel();
        assert_eq!(
            handle.outcome().await,
            TurnOutcome::Stopped {
                content: "part".to_string()
            }
        );
        assert_eq!(controller.status(), SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_panicking_stream_leaves_session_restartable() {
        let provider = Arc::new(QueueProvider::with(vec![panicking(), scripted(&["fine"], None)]));
        let controller = controller(provider);
        let mut rx = controller.subscribe();

        let outcome = controller.start(prompt("q"), "gpt-4o").unwrap().outcome().await;
        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        let snapshot = rx
            .wait_for(|s| s.status == SessionStatus::Error)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.error.as_deref(), Some("Run ended unexpectedly"));

        let outcome = controller.start(prompt("q"), "gpt-4o").unwrap().outcome().await;
        assert_eq!(outcome.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_load_history_resets_session() {
        let provider = Arc::new(QueueProvider::with(vec![Prepared::Hang]));
        let controller = controller(provider.clone());
        let history = vec![HistoryEntry::user("q"), HistoryEntry::assistant("a")];

        controller.load_history(history.clone()).unwrap();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.conversation_history, history);

        let handle = controller.start(prompt("next"), "gpt-4o").unwrap();
        provider.wait_for_calls(1).await;
        assert!(matches!(
            controller.load_history(Vec::new()),
            Err(PromptlibError::SessionInFlight(_))
        ));
        controller.stop();
        handle.outcome().await;
    }

    proptest! {
        #[test]
        fn prop_accumulation_is_concatenation(deltas in prop::collection::vec(".{0,12}", 0..24)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let refs: Vec<&str> = deltas.iter().map(String::as_str).collect();
            let provider = Arc::new(QueueProvider::with(vec![scripted(&refs, None)]));

            let (outcome, snapshot) = runtime.block_on(async {
                let controller = controller(provider);
                let outcome = controller.start(prompt("p"), "gpt-4o").unwrap().outcome().await;
                (outcome, controller.snapshot())
            });

            let expected: String = deltas.concat();
            prop_assert_eq!(outcome.status(), SessionStatus::Completed);
            prop_assert_eq!(snapshot.accumulated_content, expected);
        }
    }
}
