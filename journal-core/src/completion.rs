//! Chat-completion client for the journal assistant
//!
//! Provides a `CompletionBackend` trait with two operations:
//! - **stream_chat** - streaming completion, exposed as a lazy sequence of text chunks
//! - **complete** - single non-streaming completion (used by the summarizer)
//!
//! `OpenAiClient` implements it against an OpenAI-compatible `/chat/completions` API.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::config::CompletionConfig;
use crate::models::{Message, MessageKind, Role};
use crate::sse::{parse_record, Record, RecordLineDecoder};

/// Lazy, finite, non-restartable sequence of content fragments.
pub type ChunkStream = BoxStream<'static, Result<String, CompletionError>>;

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Open a streaming completion. A non-success status fails here, before any
    /// chunk is yielded.
    async fn stream_chat(&self, messages: Vec<ChatTurn>) -> Result<ChunkStream, CompletionError>;

    /// Run a non-streaming completion and return the reply text.
    async fn complete(&self, messages: Vec<ChatTurn>) -> Result<String, CompletionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One `{role, content}` entry of the model context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Reduce a history entry to model context. Error entries carry no model
    /// output and are left out.
    pub fn from_history(message: &Message) -> Option<Self> {
        if message.kind == MessageKind::Error {
            return None;
        }
        let role = match message.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        Some(Self {
            role,
            content: message.content.clone(),
        })
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Stream read failed: {0}")]
    Stream(#[from] std::io::Error),

    #[error("No chunk received within {0:?}")]
    IdleTimeout(Duration),

    #[error("Missing content in completion response")]
    MissingContent,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

// ============================================================================
// OpenAI wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiClient
// ============================================================================

/// Chat-completion client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: CompletionConfig,
    base_url: String,
}

impl OpenAiClient {
    /// Build a client from config. An empty `api_key` falls back to
    /// `OPENAI_API_KEY`.
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let base_url = config.base_url.clone();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        mut config: CompletionConfig,
        base_url: String,
    ) -> Result<Self, CompletionError> {
        if config.api_key.is_empty() {
            config.api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        }
        if config.api_key.is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        // No client-wide timeout: it would cap the length of a streamed reply.
        // Streams are bounded per chunk, summaries per request.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete_once(&self, messages: &[ChatTurn]) -> Result<String, CompletionError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: Some(self.config.temperature),
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(self.config.request_timeout_seconds))
            .json(&request)
            .send()
            .await?;

        let response = check_status(response).await?;
        let body: CompletionResponse = response.json().await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(CompletionError::MissingContent)
    }
}

/// Turn a non-success response into `CompletionError::Api`, preferring the
/// provider's error message over the raw body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| e.message)
        .unwrap_or(error_body);

    tracing::error!(code = status.as_u16(), message = %message, "Completion API error");

    Err(CompletionError::Api {
        code: status.as_u16(),
        message,
    })
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn stream_chat(&self, messages: Vec<ChatTurn>) -> Result<ChunkStream, CompletionError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: None,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let response = check_status(response).await?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(StreamReader::new(body), RecordLineDecoder);
        let idle = Duration::from_secs(self.config.idle_timeout_seconds);

        Ok(content_stream(lines, idle))
    }

    async fn complete(&self, messages: Vec<ChatTurn>) -> Result<String, CompletionError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let attempts = self.config.max_retries + 1;
        Retry::spawn(retry_strategy, || self.complete_once(&messages))
            .await
            .map_err(|e| {
                tracing::error!(attempts, error = %e, "All completion attempts failed");
                CompletionError::RetryExhausted {
                    attempts,
                    last: e.to_string(),
                }
            })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Adapt a stream of lines into content fragments.
///
/// Stops at the `[DONE]` sentinel or end of body, skips records that carry no
/// content, and fails the stream if the transport errors or stays silent for
/// longer than `idle`.
pub fn content_stream<L>(lines: L, idle: Duration) -> ChunkStream
where
    L: futures::Stream<Item = Result<String, std::io::Error>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(lines)), move |state| async move {
        let mut lines = state?;
        loop {
            let next = match tokio::time::timeout(idle, lines.next()).await {
                Ok(next) => next,
                Err(_) => return Some((Err(CompletionError::IdleTimeout(idle)), None)),
            };
            match next {
                None => return None,
                Some(Err(e)) => return Some((Err(CompletionError::Stream(e)), None)),
                Some(Ok(line)) => match parse_record(&line) {
                    Record::Content(content) => return Some((Ok(content), Some(lines))),
                    Record::Done => return None,
                    Record::Skip => continue,
                },
            }
        }
    })
    .boxed()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CompletionConfig {
        CompletionConfig {
            api_key: "test-api-key".to_string(),
            base_url: "http://unused".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            connect_timeout_seconds: 5,
            idle_timeout_seconds: 5,
            request_timeout_seconds: 5,
            max_retries: 1,
            retry_delay_ms: 10,
        }
    }

    fn record(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
            })
        )
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    async fn collect(stream: ChunkStream) -> Vec<Result<String, CompletionError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_stream_chat_yields_chunks_in_order() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        let body = format!(
            "{}{}{}data: [DONE]\n\n",
            record("Talk "),
            record("about "),
            record("your morning.")
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o", "stream": true})))
            .respond_with(sse_response(body))
            .mount(&mock_server)
            .await;

        let stream = client
            .stream_chat(vec![ChatTurn::system("sys"), ChatTurn::user("hi")])
            .await
            .expect("stream should open");
        let chunks: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|c| c.unwrap())
            .collect();

        assert_eq!(chunks, vec!["Talk ", "about ", "your morning."]);
    }

    #[tokio::test]
    async fn test_stream_chat_skips_malformed_record() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        let body = format!(
            "{}data: {{\"choices\": [{{\"delta\": {{\"content\": \"trunc\n\n{}data: [DONE]\n\n",
            record("first"),
            record("second")
        );

        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&mock_server)
            .await;

        let stream = client.stream_chat(vec![ChatTurn::user("hi")]).await.unwrap();
        let results = collect(stream).await;

        assert_eq!(results.len(), 2, "corrupt record must be skipped");
        assert_eq!(results[0].as_ref().unwrap(), "first");
        assert_eq!(results[1].as_ref().unwrap(), "second");
    }

    #[tokio::test]
    async fn test_stream_chat_parses_trailing_record_without_newline() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        let last = record("tail");
        let body = format!("{}{}", record("head"), last.trim_end());

        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&mock_server)
            .await;

        let stream = client.stream_chat(vec![ChatTurn::user("hi")]).await.unwrap();
        let chunks: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks, vec!["head", "tail"]);
    }

    #[tokio::test]
    async fn test_stream_chat_fails_before_chunks_on_error_status() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "Rate limit reached", "type": "requests"}
            })))
            .mount(&mock_server)
            .await;

        match client.stream_chat(vec![ChatTurn::user("hi")]).await {
            Err(CompletionError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "Rate limit reached");
            }
            Err(e) => panic!("Expected Api error, got {e}"),
            Ok(_) => panic!("Expected Api error, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_content_stream_idle_timeout() {
        let lines = stream::pending::<Result<String, std::io::Error>>();
        let results = collect(content_stream(lines, Duration::from_millis(20))).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CompletionError::IdleTimeout(_))));
    }

    #[tokio::test]
    async fn test_content_stream_stops_at_sentinel() {
        let lines = stream::iter(vec![
            Ok(record("one").trim_end().to_string()),
            Ok("data: [DONE]".to_string()),
            Ok(record("after").trim_end().to_string()),
        ]);
        let results = collect(content_stream(lines, Duration::from_secs(1))).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), "one");
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"temperature": 0.7})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-2",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Entry\n\nPoints"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })))
            .mount(&mock_server)
            .await;

        let text = client.complete(vec![ChatTurn::user("entries")]).await.unwrap();
        assert_eq!(text, "Entry\n\nPoints");
    }

    #[tokio::test]
    async fn test_complete_retries_then_reports_exhaustion() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .expect(2)
            .mount(&mock_server)
            .await;

        match client.complete(vec![ChatTurn::user("entries")]).await {
            Err(CompletionError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(last.contains("upstream down"));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = test_config();
        config.api_key = String::new();
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        assert!(matches!(
            OpenAiClient::new(config),
            Err(CompletionError::MissingApiKey)
        ));
    }

    #[test]
    fn test_history_reduction_drops_error_entries() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            ChatTurn::from_history(&Message::user(id, "hello")),
            Some(ChatTurn::user("hello"))
        );
        assert_eq!(
            ChatTurn::from_history(&Message::assistant(id, "Talk about it")),
            Some(ChatTurn::assistant("Talk about it"))
        );
        assert_eq!(
            ChatTurn::from_history(&Message::error(id, "Error processing message")),
            None
        );
    }
}
