//! LLM access: the [`Prompter`] contract, conversation types, and the
//! streaming chat-completions client.

pub mod client;
pub mod prompts;

pub use client::{ClientConfig, LlmClient};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Who sent a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in the LLM conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token consumption; additive across calls within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("model id is required")]
    MissingModel,
    #[error("rate limited after {0} retries")]
    RateLimited(usize),
    #[error("request timed out")]
    Timeout,
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

/// Abstracts LLM interaction so the orchestrator is testable. `generate`
/// streams internally and returns the accumulated text; `usage` reports
/// cumulative token counts since the client was created.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError>;

    fn usage(&self) -> TokenUsage;
}
