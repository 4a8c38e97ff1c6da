//! Native Ollama provider
//!
//! Talks to an Ollama daemon over `/api/chat` and `/api/tags`. Hosted
//! Ollama models (ids containing `cloud`) go through the same daemon.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_request(&self, request: CompletionRequest) -> OllamaChatRequest {
        let options = OllamaOptions {
            temperature: request.temperature,
            num_predict: request.max_tokens,
            stop: request.stop,
        };
        OllamaChatRequest {
            model: request
                .model
                .unwrap_or_else(|| self.default_model().to_string()),
            messages: request.messages,
            stream: false,
            options: (!options.is_empty()).then_some(options),
        }
    }

    fn with_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(api_key);
        }
        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }
        req
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL)
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        let body = self.build_request(request);
        let req = self
            .client
            .post(format!("{}/api/chat", self.config.endpoint()))
            .json(&body);

        let response = self
            .with_headers(req)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text, &body.model, None));
        }

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        chat.into_completion(&body.model)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let req = self.client.get(format!("{}/api/tags", self.config.endpoint()));
        let response = self
            .with_headers(req)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message: text });
        }

        let tags: OllamaTags = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none() && self.stop.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: Option<OllamaMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaChatResponse {
    fn into_completion(self, requested_model: &str) -> std::result::Result<CompletionResponse, ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Other(error));
        }
        let message = self.message.ok_or(ProviderError::EmptyResponse)?;
        Ok(CompletionResponse {
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            content: message.content,
            finish_reason: FinishReason::parse(self.done_reason.as_deref()),
            usage: Usage::new(self.prompt_eval_count, self.eval_count),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OllamaProvider {
        OllamaProvider::new(ProviderConfig::ollama("http://ollama_server:11434")).unwrap()
    }

    #[test]
    fn test_request_body() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Say \"RLM_READY\"")]).with_temperature(0.1);
        let body = serde_json::to_value(provider().build_request(request)).unwrap();

        assert_eq!(body["model"], DEFAULT_OLLAMA_MODEL);
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
        let temperature = body["options"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
        assert!(body["options"].get("num_predict").is_none());
    }

    #[test]
    fn test_request_without_options() {
        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]).with_model("qwen3-coder:480b-cloud");
        let body = serde_json::to_value(provider().build_request(request)).unwrap();
        assert_eq!(body["model"], "qwen3-coder:480b-cloud");
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_parse_chat_response() {
        let raw = r#"{
            "model": "qwen3:4b",
            "created_at": "2025-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "RLM_READY"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 20,
            "eval_count": 4
        }"#;
        let chat: OllamaChatResponse = serde_json::from_str(raw).unwrap();
        let completion = chat.into_completion("qwen3:4b").unwrap();
        assert_eq!(completion.content, "RLM_READY");
        assert_eq!(completion.usage, Usage::new(20, 4));
        assert_eq!(completion.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_parse_error_response() {
        let chat: OllamaChatResponse = serde_json::from_str(r#"{"error": "model 'x' not found"}"#).unwrap();
        assert!(matches!(chat.into_completion("x"), Err(ProviderError::Other(msg)) if msg.contains("not found")));
    }

    #[test]
    fn test_parse_tags() {
        let raw = r#"{"models": [{"name": "qwen3:4b", "size": 1}, {"name": "smollm:1.7b"}]}"#;
        let tags: OllamaTags = serde_json::from_str(raw).unwrap();
        let names: Vec<_> = tags.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["qwen3:4b", "smollm:1.7b"]);
    }
}
