//! OpenAI-compatible chat completions client (OpenAI, OpenRouter, local gateways).
//!
//! Requests are sent with `stream: true` and `stream_options.include_usage`, so the final SSE
//! chunk carries the authoritative token counts.

use crate::{LlmProvider, PromptlibError, ProviderStream, Result, StreamRequest};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{FutureExt, Stream, StreamExt};
use promptlib_types::UsageData;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Limit for connecting and receiving response headers.
    pub request_timeout: Duration,
    /// Limit between two SSE chunks once the body is streaming.
    pub chunk_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
            chunk_timeout: Duration::from_secs(60),
        }
    }
}

/// Streaming client for `/chat/completions`.
pub struct OpenAiCompatProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<ChunkUsage> for UsageData {
    fn from(u: ChunkUsage) -> Self {
        UsageData {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u
                .total_tokens
                .unwrap_or(u.prompt_tokens + u.completion_tokens),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// One decoded SSE `data:` payload.
#[derive(Debug, PartialEq)]
enum SseChunk {
    Empty,
    Done,
    Data {
        delta: Option<String>,
        usage: Option<UsageData>,
    },
    Failed(String),
}

fn parse_sse_data(data: &str) -> Result<SseChunk> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseChunk::Empty);
    }
    if data == "[DONE]" {
        return Ok(SseChunk::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(data)?;
    if let Some(err) = chunk.error {
        return Ok(SseChunk::Failed(err.message));
    }

    let delta: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();

    Ok(SseChunk::Data {
        delta: (!delta.is_empty()).then_some(delta),
        usage: chunk.usage.map(UsageData::from),
    })
}

/// Pull `error.message` out of a JSON error body.
fn error_message_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()
        .map(String::from)
}

/// Decode an SSE byte stream on a background task.
///
/// Deltas are forwarded in arrival order; the usage future resolves after the last delta has
/// been handed over.
fn spawn_sse_reader<S, B, E>(
    bytes: S,
    cancel: CancellationToken,
    chunk_timeout: Duration,
) -> ProviderStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<String>>(64);
    let (usage_tx, usage_rx) = oneshot::channel::<Option<UsageData>>();

    tokio::spawn(async move {
        let mut events = std::pin::pin!(bytes.eventsource());
        let mut usage = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: "promptlib::provider", "Stream cancelled, dropping connection");
                    break;
                }
                next = timeout(chunk_timeout, events.next()) => next,
            };

            let event = match next {
                Ok(Some(Ok(event))) => event,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let _ = tx
                        .send(Err(PromptlibError::Provider(format!("Stream error: {}", e))))
                        .await;
                    break;
                }
                Err(_) => {
                    let _ = tx
                        .send(Err(PromptlibError::Provider(format!(
                            "No data received for {} seconds",
                            chunk_timeout.as_secs()
                        ))))
                        .await;
                    break;
                }
            };

            match parse_sse_data(&event.data) {
                Ok(SseChunk::Empty) => {}
                Ok(SseChunk::Done) => break,
                Ok(SseChunk::Data { delta, usage: u }) => {
                    if u.is_some() {
                        usage = u;
                    }
                    if let Some(delta) = delta {
                        if tx.send(Ok(delta)).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(SseChunk::Failed(message)) => {
                    let _ = tx.send(Err(PromptlibError::Provider(message))).await;
                    break;
                }
                Err(e) => {
                    debug!(target: "promptlib::provider", "Skipping unparseable chunk: {} - {}", e, event.data);
                }
            }
        }

        let _ = usage_tx.send(usage);
    });

    let usage = async move {
        usage_rx.await.map_err(|_| {
            PromptlibError::Provider("Usage channel closed before the stream ended".to_string())
        })
    }
    .boxed();

    ProviderStream {
        text_stream: ReceiverStream::new(rx).boxed(),
        usage,
    }
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream_text(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderStream> {
        let url = self.endpoint();
        let body = ChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| ChatRequestMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        match &self.config.api_key {
            Some(key) => req = req.bearer_auth(key),
            None => warn!(target: "promptlib::provider", "No API key configured, request will likely be rejected"),
        }

        debug!(
            target: "promptlib::provider",
            model = %request.model,
            messages = request.messages.len(),
            "Sending streaming request to {}",
            url
        );

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PromptlibError::Cancelled),
            resp = timeout(self.config.request_timeout, req.send()) => match resp {
                Ok(resp) => resp?,
                Err(_) => {
                    return Err(PromptlibError::Provider(format!(
                        "No response within {} seconds",
                        self.config.request_timeout.as_secs()
                    )))
                }
            },
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = error_message_from_body(&body).unwrap_or_else(|| {
                let preview: String = body.chars().take(200).collect();
                if preview.is_empty() {
                    status.to_string()
                } else {
                    preview
                }
            });
            error!(target: "promptlib::provider", status = %status, "Provider rejected request: {}", message);
            return Err(PromptlibError::ProviderHttp {
                status: status.as_u16(),
                message,
            });
        }

        Ok(spawn_sse_reader(
            resp.bytes_stream(),
            cancel,
            self.config.chunk_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn load_fixture(name: &str) -> String {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap()
            .parent()
            .unwrap()
            .join("tests")
            .join("fixtures")
            .join("sse")
            .join(format!("{}.txt", name));
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
    }

    /// Split a body into uneven byte chunks to exercise frame reassembly.
    fn chunked(body: &str, size: usize) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + use<> {
        let chunks: Vec<_> = body
            .as_bytes()
            .chunks(size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        futures::stream::iter(chunks)
    }

    async fn drain(stream: ProviderStream) -> (Vec<String>, Option<String>, Option<UsageData>) {
        let ProviderStream {
            mut text_stream,
            usage,
        } = stream;
        let mut deltas = Vec::new();
        let mut error = None;
        while let Some(item) = text_stream.next().await {
            match item {
                Ok(d) => deltas.push(d),
                Err(e) => error = Some(e.to_string()),
            }
        }
        (deltas, error, usage.await.unwrap())
    }

    #[test]
    fn test_parse_done_and_empty() {
        assert_eq!(parse_sse_data("[DONE]").unwrap(), SseChunk::Done);
        assert_eq!(parse_sse_data("  ").unwrap(), SseChunk::Empty);
    }

    #[test]
    fn test_parse_delta_chunk() {
        let data = r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Recur"}}]}"#;
        assert_eq!(
            parse_sse_data(data).unwrap(),
            SseChunk::Data {
                delta: Some("Recur".to_string()),
                usage: None
            }
        );
    }

    #[test]
    fn test_parse_role_only_chunk_has_no_delta() {
        let data = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(
            parse_sse_data(data).unwrap(),
            SseChunk::Data {
                delta: None,
                usage: None
            }
        );
    }

    #[test]
    fn test_parse_usage_without_total() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":6,"completion_tokens":11}}"#;
        match parse_sse_data(data).unwrap() {
            SseChunk::Data { usage: Some(u), .. } => assert_eq!(u.total_tokens, 17),
            other => panic!("unexpected chunk: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_chunk() {
        let data = r#"{"error":{"message":"Rate limit exceeded","code":429}}"#;
        assert_eq!(
            parse_sse_data(data).unwrap(),
            SseChunk::Failed("Rate limit exceeded".to_string())
        );
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_sse_data("{not json").is_err());
    }

    #[test]
    fn test_error_message_from_body() {
        let body = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        assert_eq!(error_message_from_body(body).as_deref(), Some("model not found"));
        assert_eq!(error_message_from_body("<html>bad gateway</html>"), None);
    }

    #[tokio::test]
    async fn test_reader_folds_fixture_in_order_with_usage() {
        let body = load_fixture("completion_with_usage");
        for size in [1, 7, 64, body.len()] {
            let stream = spawn_sse_reader(
                chunked(&body, size),
                CancellationToken::new(),
                Duration::from_secs(5),
            );
            let (deltas, error, usage) = drain(stream).await;
            assert!(error.is_none());
            assert_eq!(deltas, vec!["Recur", "sion is", " when a function calls itself."]);
            assert_eq!(
                usage,
                Some(UsageData {
                    prompt_tokens: 6,
                    completion_tokens: 11,
                    total_tokens: 17
                })
            );
        }
    }

    #[tokio::test]
    async fn test_reader_surfaces_mid_stream_error() {
        let body = load_fixture("mid_stream_error");
        let stream = spawn_sse_reader(
            chunked(&body, 16),
            CancellationToken::new(),
            Duration::from_secs(5),
        );
        let (deltas, error, usage) = drain(stream).await;
        assert_eq!(deltas, vec!["Partial"]);
        assert_eq!(error.as_deref(), Some("Provider error: Upstream overloaded"));
        assert!(usage.is_none());
    }

    #[tokio::test]
    async fn test_reader_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = spawn_sse_reader(
            futures::stream::pending::<std::result::Result<Vec<u8>, std::io::Error>>(),
            cancel,
            Duration::from_secs(5),
        );
        let (deltas, error, usage) = drain(stream).await;
        assert!(deltas.is_empty());
        assert!(error.is_none());
        assert!(usage.is_none());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let provider = OpenAiCompatProvider::new(ProviderConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ProviderConfig::default()
        })
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
