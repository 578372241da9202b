//! Streaming chat-completions client.
//!
//! Speaks the OpenAI-compatible API (OpenRouter and friends). Responses
//! stream as server-sent events; a producer task feeds decoded tokens
//! through a bounded channel to the accumulator, so cancellation preserves
//! whatever text already arrived. Rate limits retry with exponential
//! backoff.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, LlmError, Prompter, Role, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_RETRIES: usize = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const TOKEN_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Model id, e.g. `anthropic/claude-sonnet-4.5`.
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Whole-request timeout, including the streamed body.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    cfg: ClientConfig,
    usage: Mutex<TokenUsage>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl LlmClient {
    pub fn new(cfg: ClientConfig) -> Result<Self, LlmError> {
        if cfg.model.is_empty() {
            return Err(LlmError::MissingModel);
        }
        if cfg.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            cfg,
            usage: Mutex::new(TokenUsage::default()),
        })
    }

    async fn send_once(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<Option<(String, TokenUsage)>, LlmError> {
        let send = self
            .http
            .post(&self.cfg.base_url)
            .header("Authorization", format!("Bearer {}", self.cfg.api_key))
            .json(request)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?,
            _ = cancel.cancelled() => return Ok(Some((String::new(), TokenUsage::default()))),
        };

        let status = response.status();
        if status.as_u16() == 429 {
            return Ok(None); // caller retries with backoff
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        // Producer: decode SSE events into tokens. Accumulator: this task.
        let (token_tx, mut token_rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);
        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            consume_stream(response, token_tx, producer_cancel).await
        });

        let mut text = String::new();
        while let Some(token) = token_rx.recv().await {
            text.push_str(&token);
        }

        let usage = match producer.await {
            Ok(Ok(usage)) => usage,
            Ok(Err(err)) if text.is_empty() => return Err(err),
            // Keep partial text when the stream broke midway.
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "stream ended early, keeping partial text");
                TokenUsage::default()
            }
            Err(_) => TokenUsage::default(),
        };

        Ok(Some((text, usage)))
    }
}

#[async_trait]
impl Prompter for LlmClient {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire.push(WireMessage {
                role: Role::System.as_str(),
                content: system.to_string(),
            });
        }
        wire.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));

        let request = ChatRequest {
            model: self.cfg.model.clone(),
            messages: wire,
            max_tokens: self.cfg.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_RETRY_DELAY * 2u32.pow(attempt as u32 - 1);
                tracing::debug!(attempt, ?delay, "rate limited, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Ok(String::new()),
                }
            }

            match self.send_once(cancel, &request).await? {
                Some((text, usage)) => {
                    self.usage.lock().unwrap().add(usage);
                    return Ok(text);
                }
                None => continue,
            }
        }

        Err(LlmError::RateLimited(MAX_RETRIES))
    }

    fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap()
    }
}

/// Read SSE events from the response body, pushing content deltas into the
/// token channel. Closing the channel signals completion; cancellation
/// stops reading without discarding what was already sent.
async fn consume_stream(
    response: reqwest::Response,
    token_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> Result<TokenUsage, LlmError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut usage = TokenUsage::default();

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Ok(usage),
        };

        let chunk = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                return Err(LlmError::Transport(err.to_string()));
            }
            None => break,
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // Process complete lines; keep any partial tail for the next chunk.
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);

            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data == "[DONE]" {
                return Ok(usage);
            }

            let chunk: StreamChunk = match serde_json::from_str(data) {
                Ok(parsed) => parsed,
                Err(err) => {
                    return Err(LlmError::InvalidResponse(format!(
                        "bad SSE payload: {}",
                        err
                    )));
                }
            };

            if let Some(wire) = chunk.usage {
                usage.input = wire.prompt_tokens;
                usage.output = wire.completion_tokens;
            }

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        // Respect cancellation while the channel is full.
                        tokio::select! {
                            sent = token_tx.send(content) => {
                                if sent.is_err() {
                                    return Ok(usage);
                                }
                            }
                            _ = cancel.cancelled() => return Ok(usage),
                        }
                    }
                }
            }
        }
    }

    Ok(usage)
}
