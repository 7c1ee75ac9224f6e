//! Completion provider trait for the language model backend.

use async_trait::async_trait;

use crate::error::Result;

/// A language model that completes a rendered prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete `prompt`, producing at most `max_tokens` tokens.
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}
