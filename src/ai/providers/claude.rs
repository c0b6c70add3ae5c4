//! Anthropic messages API provider.

use crate::ai::provider::{AiError, CompletionRequest, LlmProvider};
use async_trait::async_trait;
use serde_json::Value;

pub struct ClaudeProvider {
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl ClaudeProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}]
        });
        if let Some(system) = &request.system {
            body["system"] = Value::String(system.clone());
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }
        body
    }

    pub fn parse_response(&self, json: &Value) -> Result<String, AiError> {
        match json.get("content").and_then(|v| v.as_array()) {
            Some(content) if content.is_empty() => Err(AiError::EmptyResponse("claude".to_string())),
            _ => json.pointer("/content/0/text")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .ok_or_else(|| AiError::Parse("Missing content[0].text".to_string())),
        }
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError> {
        let body = self.build_body(request);

        let resp = self.client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::ProviderUnavailable(format!("claude: {}", e)))?
            .error_for_status()?;

        let json: Value = resp.json().await?;
        self.parse_response(&json)
    }

    fn name(&self) -> &str { "claude" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_body_uses_top_level_system() {
        let p = ClaudeProvider::new("sk-test", "claude-haiku-4-5-20251001");
        let request = CompletionRequest::new("Summarize").with_system("You are a TA.");
        let body = p.build_body(&request);
        assert_eq!(body["system"], "You are a TA.");
        assert_eq!(body["messages"][0]["content"], "Summarize");
        assert!(body.get("stop_sequences").is_none());
    }

    #[test]
    fn test_claude_parse_response() {
        let p = ClaudeProvider::new("sk-test", "claude-haiku-4-5-20251001");
        let raw = serde_json::json!({
            "content": [{"type": "text", "text": "SELECT * FROM Course"}]
        });
        assert_eq!(p.parse_response(&raw).unwrap(), "SELECT * FROM Course");
    }

    #[test]
    fn test_claude_parse_empty_content() {
        let p = ClaudeProvider::new("sk-test", "claude-haiku-4-5-20251001");
        let raw = serde_json::json!({ "content": [] });
        assert!(matches!(p.parse_response(&raw), Err(AiError::EmptyResponse(_))));
    }
}
