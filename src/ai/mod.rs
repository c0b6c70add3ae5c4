//! AI layer: completion providers behind one trait, selected from config.

pub mod provider;
pub mod providers;

pub use provider::{AiError, CompletionRequest, LlmProvider};

use std::sync::Arc;
use crate::config::LlmConfig;
use providers::claude::ClaudeProvider;
use providers::ollama::OllamaProvider;
use providers::openai::OpenAiProvider;

/// Builds the process-wide completion provider from the `[llm]` section.
///
/// The provider is constructed once at startup and handed to the
/// assistant, so tests can substitute their own `LlmProvider`.
pub struct ProviderRegistry {
    pub config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// Active provider name (lowercased).
    pub fn active_llm_name(&self) -> String {
        self.config.provider.to_lowercase()
    }

    pub fn build(&self) -> Result<Arc<dyn LlmProvider>, AiError> {
        let name = self.active_llm_name();
        match name.as_str() {
            "openai" => {
                let key = self.api_key(&name)?;
                Ok(Arc::new(OpenAiProvider::new(&key, &self.config.model, &self.config.base_url)))
            }
            "claude" | "anthropic" => {
                let key = self.api_key(&name)?;
                Ok(Arc::new(ClaudeProvider::new(&key, &self.config.model)))
            }
            "ollama" => Ok(Arc::new(OllamaProvider::new(&self.config.base_url, &self.config.model))),
            other => Err(AiError::Config(format!("unknown llm provider '{}'", other))),
        }
    }

    fn api_key(&self, name: &str) -> Result<String, AiError> {
        self.config.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AiError::Config(format!("llm.api_key is required for provider '{}'", name)))
    }
}
