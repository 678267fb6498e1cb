//! LLM provider trait — common interface for completion backends.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("completion had no content")]
    EmptyCompletion,
}

/// A single-operation completion service.
///
/// Implementations strip a leading `<think>…</think>` block from the
/// completion; fenced-JSON stripping is the caller's parser's job.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String, LlmError>;
}
