//! # Completion Gateway
//!
//! A trait-based abstraction over chat-completion backends.
//!
//! ## Design
//! - `LlmProvider` is the single request/response capability the runtime
//!   consumes: model + ordered messages in, text out
//! - Implementations for a native Ollama daemon and any OpenAI-compatible
//!   API (OpenAI, OpenRouter, Together, Groq, vLLM)
//! - `AnyProvider` selects one at runtime from a `ProviderConfig`
//! - No retries or caching; timeouts are enforced by the HTTP client

pub mod ollama;
pub mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Response from a completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    pub fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Invalid request
    InvalidRequest(String),
    /// Model not found
    ModelNotFound(String),
    /// Authentication failed
    AuthenticationFailed,
    /// Response carried no text
    EmptyResponse,
    /// Other error
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            Self::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::EmptyResponse => write!(f, "No content in response"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Map a non-success HTTP status to a provider error
    pub fn from_status(status: u16, body: String, model: &str, retry_after: Option<u64>) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed,
            404 => Self::ModelNotFound(model.to_string()),
            429 => Self::RateLimited { retry_after },
            _ => Self::Api { status, message: body },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkFailed,
            Self::Api { status, .. } if *status >= 500 => ErrorKind::ProviderUnavailable,
            Self::AuthenticationFailed => ErrorKind::ProviderUnavailable,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ModelNotFound(_) => ErrorKind::ModelNotFound,
            Self::InvalidRequest(_) => ErrorKind::ConfigInvalid,
            Self::Api { .. } | Self::Parse(_) | Self::EmptyResponse | Self::Other(_) => {
                ErrorKind::InferenceFailed
            }
        }
    }

    /// Convert into the unified error type, keeping this error as the source
    pub fn into_error(self, operation: &'static str) -> Error {
        let mut err = Error::new(self.kind(), self.to_string()).with_operation(operation);
        if matches!(self, Self::AuthenticationFailed) {
            err = err.permanent();
        }
        err.set_source(self)
    }
}

/// A chat-completion backend
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "ollama", "openai")
    fn name(&self) -> &str;

    /// Model used when a request names none
    fn default_model(&self) -> &str;

    /// Send a completion request and wait for the full response
    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Model identifiers the backend currently serves
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError>;

    /// Chat with message history, returning the reply text
    async fn chat(&self, messages: Vec<ChatMessage>) -> std::result::Result<String, ProviderError> {
        let response = self.complete(CompletionRequest::new(messages)).await?;
        Ok(response.content)
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Default Ollama daemon address
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
/// Default model served by a local daemon
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen3:4b";
/// Default OpenAI-compatible endpoint
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Ollama,
    OpenAI,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Ollama => "ollama",
            ProviderType::OpenAI => "openai",
        }
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(ProviderType::Ollama),
            "openai" | "cloud" | "openai-compatible" => Ok(ProviderType::OpenAI),
            other => Err(Error::config_invalid(format!(
                "unknown backend '{}', expected 'ollama' or 'openai'",
                other
            ))
            .with_context("backend", other)),
        }
    }
}

impl ProviderConfig {
    /// A native Ollama daemon at `host`
    pub fn ollama(host: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Ollama,
            api_key: None,
            base_url: Some(host.into()),
            default_model: Some(DEFAULT_OLLAMA_MODEL.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::openai_compatible(DEFAULT_OPENAI_BASE_URL, api_key).with_model("gpt-4o-mini")
    }

    /// Any endpoint speaking the OpenAI chat-completions protocol
    pub fn openai_compatible(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some(base_url.into()),
            default_model: None,
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Base URL without a trailing slash
    pub fn endpoint(&self) -> String {
        let default = match self.provider_type {
            ProviderType::Ollama => DEFAULT_OLLAMA_HOST,
            ProviderType::OpenAI => DEFAULT_OPENAI_BASE_URL,
        };
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::config_invalid("backend URL must start with http:// or https://")
                .with_context("base_url", endpoint));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::config_invalid("timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Build the HTTP client, applying the configured timeout
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build().map_err(|e| {
            Error::new(ErrorKind::ConfigInvalid, "failed to create HTTP client")
                .with_operation("provider::http_client")
                .set_source(e)
        })
    }
}

// ============================================================================
// Runtime Selection
// ============================================================================

/// A provider chosen at runtime from configuration
pub enum AnyProvider {
    Ollama(OllamaProvider),
    OpenAI(OpenAIProvider),
}

impl AnyProvider {
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            backend = config.provider_type.as_str(),
            endpoint = %config.endpoint(),
            "creating completion provider"
        );
        match config.provider_type {
            ProviderType::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(config)?)),
            ProviderType::OpenAI => Ok(AnyProvider::OpenAI(OpenAIProvider::new(config)?)),
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            AnyProvider::Ollama(p) => p.config().endpoint(),
            AnyProvider::OpenAI(p) => p.config().endpoint(),
        }
    }
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            AnyProvider::Ollama(p) => p.name(),
            AnyProvider::OpenAI(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            AnyProvider::Ollama(p) => p.default_model(),
            AnyProvider::OpenAI(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.complete(request).await,
            AnyProvider::OpenAI(p) => p.complete(request).await,
        }
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        match self {
            AnyProvider::Ollama(p) => p.list_models().await,
            AnyProvider::OpenAI(p) => p.list_models().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStatus;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are a sub-task worker.");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are a sub-task worker.");

        assert_eq!(ChatMessage::user("Hello").role, Role::User);
        assert_eq!(ChatMessage::assistant("Hi").role.as_str(), "assistant");

        let json = serde_json::to_value(ChatMessage::user("q")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "q"}));
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("qwen3:4b")
            .with_temperature(0.1)
            .with_max_tokens(512)
            .with_stop(vec!["```\n\n".into()]);

        assert_eq!(request.model.as_deref(), Some("qwen3:4b"));
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.stop.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::ollama("http://ollama_server:11434/");
        assert_eq!(config.provider_type, ProviderType::Ollama);
        assert_eq!(config.endpoint(), "http://ollama_server:11434");
        assert_eq!(config.default_model.as_deref(), Some(DEFAULT_OLLAMA_MODEL));

        let config = ProviderConfig::openai_compatible("https://openrouter.ai/api/v1", "key")
            .with_model("huggingface/smollm:1.7b")
            .with_header("X-Title", "rlm");
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert!(config.headers.contains_key("X-Title"));
        assert!(config.validate().is_ok());

        let bad = ProviderConfig::ollama("localhost:11434");
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!("ollama".parse::<ProviderType>().unwrap(), ProviderType::Ollama);
        assert_eq!("Cloud".parse::<ProviderType>().unwrap(), ProviderType::OpenAI);
        assert!("anthropic".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(429, String::new(), "m", Some(3)),
            ProviderError::RateLimited { retry_after: Some(3) }
        ));
        assert!(matches!(
            ProviderError::from_status(404, String::new(), "qwen3:4b", None),
            ProviderError::ModelNotFound(m) if m == "qwen3:4b"
        ));
        assert!(matches!(
            ProviderError::from_status(401, String::new(), "m", None),
            ProviderError::AuthenticationFailed
        ));
    }

    #[test]
    fn test_into_error() {
        let err = ProviderError::Network("connection refused".into()).into_error("delegate");
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert_eq!(err.status(), ErrorStatus::Temporary);
        assert_eq!(err.operation(), "delegate");
        assert!(err.source_ref().is_some());

        let err = ProviderError::ModelNotFound("x".into()).into_error("generate");
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
        assert_eq!(err.status(), ErrorStatus::Permanent);

        let err = ProviderError::Api { status: 503, message: "busy".into() }.into_error("generate");
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage::new(100, 20));
        total.add(&Usage::new(50, 5));
        assert_eq!(total, Usage { prompt_tokens: 150, completion_tokens: 25, total_tokens: 175 });
    }

    #[test]
    fn test_any_provider_selection() {
        let provider = AnyProvider::from_config(ProviderConfig::ollama("http://localhost:11434")).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.default_model(), DEFAULT_OLLAMA_MODEL);

        let provider =
            AnyProvider::from_config(ProviderConfig::openai_compatible("https://api.groq.com/openai/v1/", "k"))
                .unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.endpoint(), "https://api.groq.com/openai/v1");
    }

    /// Address of a port nothing listens on
    fn closed_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let endpoint = closed_endpoint();
        let configs = [
            ProviderConfig::ollama(endpoint.clone()).with_timeout(5),
            ProviderConfig::openai_compatible(endpoint, "k").with_timeout(5),
        ];
        for config in configs {
            let provider = AnyProvider::from_config(config).unwrap();

            let err = provider.chat(vec![ChatMessage::user("Say \"RLM_READY\"")]).await.unwrap_err();
            assert!(matches!(err, ProviderError::Network(_)), "{}: {:?}", provider.name(), err);
            assert_eq!(err.into_error("doctor").kind(), ErrorKind::NetworkFailed);

            assert!(matches!(provider.list_models().await, Err(ProviderError::Network(_))));
        }
    }
}
