//! LLM provider streaming contract.

use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use promptlib_types::{PromptMessage, UsageData};
use tokio_util::sync::CancellationToken;

/// Finite, forward-only, single-consumer sequence of text deltas.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Resolves once the text stream has drained. `Ok(None)` when the provider reported nothing.
pub type UsageFuture = BoxFuture<'static, Result<Option<UsageData>>>;

/// A provider call.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Provider model id (already resolved by the router).
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
}

/// Response of a streaming call.
pub struct ProviderStream {
    pub text_stream: TextStream,
    pub usage: UsageFuture,
}

/// A hosted LLM that can stream a completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Issue a streaming completion. Implementations abort the network request when
    /// `cancel` fires; the returned stream must not be consumed twice.
    async fn stream_text(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderStream>;
}
