//! Ollama provider: local models through the generate API.

use crate::ai::provider::{AiError, CompletionRequest, LlmProvider};
use async_trait::async_trait;
use serde_json::Value;

pub struct OllamaProvider {
    pub base_url: String,
    pub model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
                "stop": request.stop,
            }
        });
        if let Some(system) = &request.system {
            body["system"] = Value::String(system.clone());
        }
        body
    }

    pub fn parse_completion_response(&self, json: &Value) -> Result<String, AiError> {
        json.get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AiError::Parse("Missing 'response' field".to_string()))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError> {
        let body = self.build_body(request);

        let resp = self.client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::ProviderUnavailable(format!("ollama: {}", e)))?
            .error_for_status()?;

        let json: Value = resp.json().await?;
        self.parse_completion_response(&json)
    }

    fn name(&self) -> &str { "ollama" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_new_trims_url() {
        let p = OllamaProvider::new("http://localhost:11434/", "llama3.2:3b");
        assert_eq!(p.base_url, "http://localhost:11434");
        assert_eq!(p.name(), "ollama");
    }

    #[test]
    fn test_ollama_body() {
        let p = OllamaProvider::new("http://localhost:11434", "llama3.2:3b");
        let body = p.build_body(&CompletionRequest::new("count rows").with_max_tokens(64));
        assert_eq!(body["prompt"], "count rows");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn test_ollama_parse_response() {
        let p = OllamaProvider::new("http://localhost:11434", "llama3.2:3b");
        let raw = serde_json::json!({"response": "SELECT 1", "done": true});
        assert_eq!(p.parse_completion_response(&raw).unwrap(), "SELECT 1");
        assert!(p.parse_completion_response(&serde_json::json!({})).is_err());
    }
}
