//! In-memory providers for pipeline tests

use rlm_vm::{CompletionRequest, CompletionResponse, LlmProvider, ProviderError, Usage};
use std::sync::Mutex;

type Reply = Box<dyn Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync>;

/// A provider whose replies come from a closure; every request is recorded
pub struct ScriptedProvider {
    reply: Reply,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn replying<F>(reply: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Strategy calls carry a system prompt that mentions the controller
    /// role; everything else is a worker call
    pub fn pipeline<S, W>(strategy: S, worker: W) -> Self
    where
        S: Fn() -> Result<String, ProviderError> + Send + Sync + 'static,
        W: Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self::replying(move |request| {
            if is_strategy_call(request) {
                strategy()
            } else {
                let user = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
                worker(user)
            }
        })
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

pub fn is_strategy_call(request: &CompletionRequest) -> bool {
    request
        .messages
        .first()
        .is_some_and(|m| m.content.contains("Recursive Language Model controller"))
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let reply = (self.reply)(&request);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }
        reply.map(|content| CompletionResponse {
            usage: Usage::new(10, 2),
            ..CompletionResponse::text("scripted-model", content)
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["scripted-model".to_string()])
    }
}
