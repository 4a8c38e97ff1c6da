//! # Delegation Primitive
//!
//! `ask_llm(fragment, query)`: one bounded worker inference per call.
//! Backend failures never propagate; they become an inconclusive outcome,
//! which the program sees as `NOT_FOUND`.

use crate::config::RlmConfig;
use crate::sanitize::strip_reasoning;
use rlm_vm::{ChatMessage, CompletionRequest, LlmProvider, Usage};
use serde::Serialize;

/// Wire sentinel for "the fragment does not contain the answer"
pub const NOT_FOUND: &str = "NOT_FOUND";

const WORKER_SYSTEM_PROMPT: &str = "You are a sub-task worker. Answer strictly and concisely. \
    If the answer is in the context, output the exact value only. \
    Otherwise output NOT_FOUND.";

/// Result of one delegated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationOutcome {
    /// The worker returned a value
    Found(String),
    /// The worker answered `NOT_FOUND`
    NotFound,
    /// No usable answer: backend failure or empty reply
    Inconclusive(String),
}

impl DelegationOutcome {
    /// Text handed back to the program
    pub fn into_text(self) -> String {
        match self {
            DelegationOutcome::Found(value) => value,
            DelegationOutcome::NotFound | DelegationOutcome::Inconclusive(_) => NOT_FOUND.to_string(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, DelegationOutcome::Found(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            DelegationOutcome::Found(_) => "found",
            DelegationOutcome::NotFound => "not_found",
            DelegationOutcome::Inconclusive(_) => "inconclusive",
        }
    }
}

/// Normalize a worker reply into an outcome
pub fn normalize_reply(reply: &str) -> DelegationOutcome {
    let text = strip_reasoning(reply);
    let text = text
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim();

    if text.is_empty() {
        DelegationOutcome::Inconclusive("empty reply".to_string())
    } else if text.eq_ignore_ascii_case(NOT_FOUND) {
        DelegationOutcome::NotFound
    } else {
        DelegationOutcome::Found(text.to_string())
    }
}

/// Per-run delegation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DelegationStats {
    pub calls: usize,
    pub found: usize,
    pub not_found: usize,
    pub inconclusive: usize,
    /// Worker token usage, when the backend reports it
    pub usage: Usage,
}

impl DelegationStats {
    pub fn record(&mut self, outcome: &DelegationOutcome) {
        self.calls += 1;
        match outcome {
            DelegationOutcome::Found(_) => self.found += 1,
            DelegationOutcome::NotFound => self.not_found += 1,
            DelegationOutcome::Inconclusive(_) => self.inconclusive += 1,
        }
    }
}

/// Builds worker prompts and calls the gateway
pub struct Delegator<'a, P> {
    provider: &'a P,
    model: Option<String>,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl<'a, P: LlmProvider> Delegator<'a, P> {
    pub fn new(provider: &'a P, config: &RlmConfig) -> Self {
        Self {
            provider,
            model: config.worker_model.clone(),
            temperature: config.worker_temperature,
            max_tokens: config.worker_max_tokens,
        }
    }

    /// Worker message pair for one fragment
    pub fn messages(fragment: &str, query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(WORKER_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "CONTEXT:\n{}\n\nTASK: {}\n\nINSTRUCTION: If found, output the exact value ONLY. \
                 If not found, output '{}'.",
                fragment, query, NOT_FOUND
            )),
        ]
    }

    fn request(&self, fragment: &str, query: &str) -> CompletionRequest {
        let mut request =
            CompletionRequest::new(Self::messages(fragment, query)).with_temperature(self.temperature);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }
        request
    }

    /// Ask the worker about one fragment. Never fails.
    pub async fn delegate(&self, fragment: &str, query: &str) -> DelegationOutcome {
        self.call(fragment, query).await.0
    }

    /// Like `delegate`, recording the outcome and token usage
    pub async fn delegate_tracked(
        &self,
        fragment: &str,
        query: &str,
        stats: &mut DelegationStats,
    ) -> DelegationOutcome {
        let (outcome, usage) = self.call(fragment, query).await;
        stats.record(&outcome);
        stats.usage.add(&usage);
        outcome
    }

    async fn call(&self, fragment: &str, query: &str) -> (DelegationOutcome, Usage) {
        tracing::info!(
            fragment_chars = fragment.chars().count(),
            "delegating sub-task"
        );

        match self.provider.complete(self.request(fragment, query)).await {
            Ok(response) => {
                let outcome = normalize_reply(&response.content);
                tracing::debug!(outcome = outcome.label(), "worker replied");
                (outcome, response.usage)
            }
            Err(err) => {
                tracing::warn!(error = %err, "worker call failed, treating as inconclusive");
                (DelegationOutcome::Inconclusive(err.to_string()), Usage::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use rlm_vm::{ProviderError, Role};

    #[test]
    fn test_normalize_reply() {
        assert_eq!(normalize_reply("  IMT_2026 \n"), DelegationOutcome::Found("IMT_2026".into()));
        assert_eq!(normalize_reply("`IMT_2026`"), DelegationOutcome::Found("IMT_2026".into()));
        assert_eq!(normalize_reply("'NOT_FOUND'"), DelegationOutcome::NotFound);
        assert_eq!(normalize_reply("not_found"), DelegationOutcome::NotFound);
        assert_eq!(
            normalize_reply("<think>the text is noise</think>\nNOT_FOUND"),
            DelegationOutcome::NotFound
        );
        assert!(matches!(normalize_reply("   "), DelegationOutcome::Inconclusive(_)));
    }

    #[test]
    fn test_outcome_text_boundary() {
        assert_eq!(DelegationOutcome::Found("x".into()).into_text(), "x");
        assert_eq!(DelegationOutcome::NotFound.into_text(), NOT_FOUND);
        assert_eq!(DelegationOutcome::Inconclusive("timeout".into()).into_text(), NOT_FOUND);
    }

    #[test]
    fn test_worker_messages() {
        let messages = Delegator::<ScriptedProvider>::messages("some text", "Find the key");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("NOT_FOUND"));
        assert!(messages[1].content.starts_with("CONTEXT:\nsome text\n\nTASK: Find the key"));
    }

    #[tokio::test]
    async fn test_delegate_uses_worker_settings() {
        let provider = ScriptedProvider::replying(|_| Ok("IMT_2026".into()));
        let config = RlmConfig::new()
            .with_controller_model("big")
            .with_worker_model("small");
        let delegator = Delegator::new(&provider, &config);

        let outcome = delegator.delegate("SECRET: IMT_2026", "find it").await;
        assert_eq!(outcome, DelegationOutcome::Found("IMT_2026".into()));

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model.as_deref(), Some("small"));
        assert_eq!(calls[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_backend_failure_is_absorbed() {
        let provider = ScriptedProvider::replying(|_| Err(ProviderError::Network("connection refused".into())));
        let config = RlmConfig::default();
        let delegator = Delegator::new(&provider, &config);

        let mut stats = DelegationStats::default();
        let outcome = delegator.delegate_tracked("fragment", "query", &mut stats).await;
        assert!(matches!(&outcome, DelegationOutcome::Inconclusive(cause) if cause.contains("connection refused")));
        assert_eq!(outcome.into_text(), NOT_FOUND);
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.inconclusive, 1);
        assert_eq!(stats.not_found, 0);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = DelegationStats::default();
        stats.record(&DelegationOutcome::NotFound);
        stats.record(&DelegationOutcome::NotFound);
        stats.record(&DelegationOutcome::Found("v".into()));
        assert_eq!((stats.calls, stats.found, stats.not_found, stats.inconclusive), (3, 1, 2, 0));
    }

    #[test]
    fn test_delegate_blocking() {
        let provider = ScriptedProvider::replying(|_| Ok("NOT_FOUND".into()));
        let config = RlmConfig::default();
        let delegator = Delegator::new(&provider, &config);
        let outcome = tokio_test::block_on(delegator.delegate("noise noise", "find it"));
        assert_eq!(outcome, DelegationOutcome::NotFound);
    }
}
