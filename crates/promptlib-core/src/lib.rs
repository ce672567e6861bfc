//! Streaming response engine for Promptlib.
//!
//! A [`ChatPanel`] drives one UI surface: it starts runs on a [`StreamSessionController`],
//! which folds provider deltas into published snapshots, and hands finished turns to the
//! [`ConversationReconciler`] for persistence.

mod controller;
mod db;
mod engine;
mod error;
mod locks;
mod notify;
mod openai;
mod panel;
mod persistence;
mod provider;
mod reconciler;
mod router;
mod usage;

pub use controller::{RunHandle, StreamSessionController, TurnOutcome};
pub use db::ConversationStore;
pub use engine::{Engine, EngineConfig};
pub use error::PromptlibError;
pub use locks::{ConversationGuard, ConversationLocks};
pub use notify::Notifier;
pub use openai::{OpenAiCompatProvider, ProviderConfig};
pub use panel::{ChatPanel, TurnReport};
pub use persistence::PersistenceAdapter;
pub use provider::{LlmProvider, ProviderStream, StreamRequest, TextStream, UsageFuture};
pub use reconciler::{derive_title, ConversationReconciler, TITLE_MAX_CHARS};
pub use router::{provider_family, ModelRouter, BUILTIN_MODELS};
pub use usage::{cost_per_token, estimate_cost, estimate_tokens};

/// Result type for Promptlib operations.
pub type Result<T> = std::result::Result<T, PromptlibError>;
