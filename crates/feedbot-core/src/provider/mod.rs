pub mod gemini;

use async_trait::async_trait;

use crate::config::GeminiConfig;
use crate::error::ProviderError;
use crate::types::Completion;

/// Trait for generative-language providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a single text prompt.
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError>;

    /// Model used for requests.
    fn model(&self) -> &str;
}

/// Build the Gemini provider from config, or `None` without an API key.
pub fn create_provider(config: &GeminiConfig) -> Option<gemini::GeminiProvider> {
    if config.api_key.is_empty() {
        return None;
    }
    Some(gemini::GeminiProvider::new(
        config.api_key.clone(),
        config.api_base.clone(),
        config.model.clone(),
    )
    .with_generation(config.max_tokens, config.temperature))
}
