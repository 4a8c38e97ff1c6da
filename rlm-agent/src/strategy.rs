//! # Strategy Generator
//!
//! One controller call: the system prompt fixes the output contract and
//! carries the sandbox language reference, the user message is the query.

use crate::config::RlmConfig;
use crate::delegate::NOT_FOUND;
use crate::sanitize::strip_reasoning;
use rlm_vm::{ChatMessage, CompletionRequest, LlmProvider, Result, SandboxSchema, Usage};

/// Raw controller output, reasoning blocks removed
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

pub struct StrategyGenerator<'a, P> {
    provider: &'a P,
    config: &'a RlmConfig,
    schema: &'a SandboxSchema,
}

impl<'a, P: LlmProvider> StrategyGenerator<'a, P> {
    pub fn new(provider: &'a P, config: &'a RlmConfig, schema: &'a SandboxSchema) -> Self {
        Self {
            provider,
            config,
            schema,
        }
    }

    /// Controller system prompt for a document of `document_chars` characters
    pub fn system_prompt(&self, document_chars: usize) -> String {
        let chunk = self.config.chunk_size;
        let mut prompt = format!(
            "You are a Recursive Language Model controller. The document is too large for your \
             memory: it has {document_chars} characters and is bound to the variable `document`. \
             Write a program that:\n\
             1. Slices `document` into fragments of {chunk} characters.\n\
             2. Calls `ask_llm(fragment, sub_query)` on each fragment, where `sub_query` is a \
             focused question derived from the user's task.\n\
             3. If the reply is not '{NOT_FOUND}', assigns it to `result` and stops with `break`.\n\n\
             Output ONLY the program. No prose, no explanations.\n\n"
        );
        prompt.push_str(&self.schema.to_prompt());
        prompt
    }

    pub fn messages(&self, document: &str, query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt(document.chars().count())),
            ChatMessage::user(query),
        ]
    }

    /// Ask the controller for a program. A gateway failure aborts the run.
    pub async fn generate(&self, document: &str, query: &str) -> Result<Strategy> {
        let mut request = CompletionRequest::new(self.messages(document, query))
            .with_temperature(self.config.controller_temperature);
        if let Some(model) = &self.config.controller_model {
            request = request.with_model(model.clone());
        }
        if let Some(max) = self.config.controller_max_tokens {
            request = request.with_max_tokens(max);
        }

        tracing::info!(
            document_chars = document.chars().count(),
            provider = self.provider.name(),
            "generating strategy"
        );
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| e.into_error("strategy::generate"))?;

        tracing::debug!(chars = response.content.len(), "controller replied");
        Ok(Strategy {
            text: strip_reasoning(&response.content),
            model: response.model,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{is_strategy_call, ScriptedProvider};
    use rlm_vm::{ErrorKind, ProviderError, Role};

    #[test]
    fn test_system_prompt_contract() {
        let provider = ScriptedProvider::replying(|_| Ok(String::new()));
        let config = RlmConfig::new().with_chunk_size(2500);
        let schema = SandboxSchema::new();
        let generator = StrategyGenerator::new(&provider, &config, &schema);

        let messages = generator.messages("abcdef", "Find the SECRET.");
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("2500 characters"));
        assert!(messages[0].content.contains("6 characters"));
        assert!(messages[0].content.contains("ask_llm(fragment, sub_query)"));
        assert!(messages[0].content.contains("Output ONLY the program"));
        assert!(messages[0].content.contains("## Sandbox language"));
        assert_eq!(messages[1], ChatMessage::user("Find the SECRET."));
    }

    #[test]
    fn test_document_size_counts_characters() {
        let provider = ScriptedProvider::replying(|_| Ok(String::new()));
        let config = RlmConfig::default();
        let schema = SandboxSchema::new();
        let generator = StrategyGenerator::new(&provider, &config, &schema);

        let document = "héllo wörld ✓";
        assert_eq!(document.len(), 17);
        let messages = generator.messages(document, "q");
        assert!(messages[0].content.contains("it has 13 characters"));
    }

    #[tokio::test]
    async fn test_generate_strips_reasoning() {
        let provider =
            ScriptedProvider::replying(|_| Ok("<think>chunk it</think>\n```python\nresult = 1\n```".into()));
        let config = RlmConfig::new().with_controller_model("qwen3:4b");
        let schema = SandboxSchema::new();
        let generator = StrategyGenerator::new(&provider, &config, &schema);

        let strategy = generator.generate("doc", "q").await.unwrap();
        assert_eq!(strategy.text, "```python\nresult = 1\n```");
        assert_eq!(strategy.usage.total_tokens, 12);

        let calls = provider.calls();
        assert!(is_strategy_call(&calls[0]));
        assert_eq!(calls[0].model.as_deref(), Some("qwen3:4b"));
        assert_eq!(calls[0].temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_generate_backend_error() {
        let provider = ScriptedProvider::replying(|_| Err(ProviderError::ModelNotFound("qwen3:4b".into())));
        let config = RlmConfig::default();
        let schema = SandboxSchema::new();
        let generator = StrategyGenerator::new(&provider, &config, &schema);

        let err = generator.generate("doc", "q").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
        assert_eq!(err.operation(), "strategy::generate");
    }
}
