//! Generation provider abstraction
//!
//! The answer synthesizer talks to text generation only through
//! [`GenerationProvider`], so any backend (or a test double) can be swapped in.

use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ordered text fragments from a streaming generation.
///
/// Dropping the stream releases the underlying connection.
pub type TextStream = Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>;

/// Generic generation client trait for provider abstraction
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a full completion for `prompt` under `system` instructions
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generation>;

    /// Stream a completion as ordered text fragments
    async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Result of a blocking generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_totals() {
        assert_eq!(TokenUsage::new(10, 5).total_tokens, 15);
        assert_eq!(TokenUsage::new(u32::MAX, 1).total_tokens, u32::MAX);
    }
}
