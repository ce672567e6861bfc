//! Application root: owns the store, provider, notifier and conversation locks, and builds
//! panels that share them.

use crate::{
    ChatPanel, ConversationLocks, ConversationReconciler, ConversationStore, LlmProvider,
    ModelRouter, Notifier, OpenAiCompatProvider, ProviderConfig, Result, StreamSessionController,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub provider: ProviderConfig,
    pub default_model: String,
    pub temperature: f32,
    /// Extra user-facing ids layered over the built-in model table.
    pub model_aliases: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_default()
                .join("promptlib")
                .join("conversations.db"),
            provider: ProviderConfig::default(),
            default_model: "gemini-3-pro".to_string(),
            temperature: 0.7,
            model_aliases: HashMap::new(),
        }
    }
}

pub struct Engine {
    store: Arc<ConversationStore>,
    provider: Arc<dyn LlmProvider>,
    router: Arc<ModelRouter>,
    reconciler: Arc<ConversationReconciler>,
    locks: Arc<ConversationLocks>,
    notifier: Notifier,
    default_model: String,
    temperature: f32,
}

impl Engine {
    /// Open the store and build the HTTP provider.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(ConversationStore::open(&config.db_path)?);
        let provider = Arc::new(OpenAiCompatProvider::new(config.provider)?);
        let router = Arc::new(ModelRouter::with_aliases(config.model_aliases));
        Ok(Self::with_parts(
            store,
            provider,
            router,
            config.default_model,
            config.temperature,
        ))
    }

    /// Assemble an engine from existing parts.
    pub fn with_parts(
        store: Arc<ConversationStore>,
        provider: Arc<dyn LlmProvider>,
        router: Arc<ModelRouter>,
        default_model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        let notifier = Notifier::default();
        let reconciler = Arc::new(ConversationReconciler::new(store.clone(), notifier.clone()));
        let default_model = default_model.into();
        info!(
            target: "promptlib::startup",
            "Engine ready: provider {}, default model {} ({} models)",
            provider.name(),
            default_model,
            router.entries().len()
        );

        Self {
            store,
            provider,
            router,
            reconciler,
            locks: ConversationLocks::new(),
            notifier,
            default_model,
            temperature,
        }
    }

    /// A new panel with its own controller.
    pub fn new_panel(&self) -> Arc<ChatPanel> {
        let controller =
            StreamSessionController::new(self.provider.clone(), self.router.clone(), self.temperature);
        Arc::new(ChatPanel::new(
            controller,
            self.reconciler.clone(),
            self.locks.clone(),
            self.default_model.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}
