//! Turns a result set back into a natural-language answer.

use std::sync::Arc;

use crate::ai::{AiError, CompletionRequest, LlmProvider};
use crate::assistant::executor::Row;
use crate::assistant::prompt::PromptBuilder;
use crate::assistant::scope::Role;
use crate::config::SamplingConfig;

pub struct ResultSummarizer {
    provider: Arc<dyn LlmProvider>,
    sampling: SamplingConfig,
}

impl ResultSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, sampling: SamplingConfig) -> Self {
        Self { provider, sampling }
    }

    pub async fn summarize(
        &self,
        prompts: &PromptBuilder,
        role: Role,
        question: &str,
        rows: &[Row],
        context_note: Option<&str>,
    ) -> Result<String, AiError> {
        let prompt = prompts.build_summary_prompt(role, question, rows, context_note);
        let request = CompletionRequest::new(prompt)
            .with_temperature(self.sampling.temperature)
            .with_max_tokens(self.sampling.max_tokens)
            .with_stop(self.sampling.stop.clone());

        let reply = self.provider.complete(&request).await?;
        if reply.trim().is_empty() {
            return Err(AiError::EmptyResponse(self.provider.name().to_string()));
        }
        Ok(reply.trim().to_string())
    }
}
