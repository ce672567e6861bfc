//! Error types for Promptlib.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PromptlibError {
    #[error("A run is already in flight: session {0}")]
    SessionInFlight(Uuid),

    #[error("No previous run to retry")]
    NothingToRetry,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Conversation {0} has a turn in flight in another panel")]
    ConversationBusy(Uuid),

    #[error("No user message in conversation {0}")]
    UserMessageNotFound(Uuid),

    #[error("Message order conflict in conversation {0}, retry the write")]
    OrderConflict(Uuid),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider returned HTTP {status}: {message}")]
    ProviderHttp { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PromptlibError {
    /// Whether the write may succeed if submitted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PromptlibError::OrderConflict(_))
    }
}
