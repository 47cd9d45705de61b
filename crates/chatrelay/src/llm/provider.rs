//! LLM provider trait.

use async_trait::async_trait;

use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse, ChatStream};

/// A chat completion backend.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Make a single, non-streaming chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Make a streaming chat completion request.
    ///
    /// Resolves once response headers arrive. A non-success status is an
    /// error here, before any frame is produced.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;
}
