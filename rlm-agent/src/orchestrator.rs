//! # Orchestrator
//!
//! generate strategy -> sanitize -> execute. Each stage failure ends the
//! run with a typed failure; delegation failures never do.

use crate::config::RlmConfig;
use crate::delegate::{DelegationStats, Delegator};
use crate::executor::execute;
use crate::sanitize::sanitize;
use crate::strategy::StrategyGenerator;
use rlm_vm::{ErrorKind, LlmProvider, Result, SandboxSchema, Usage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The controller call did not return usable text
    BackendError,
    /// Sanitization left no program text
    SanitizationNoop,
    /// The program failed to compile or raised while running
    ExecutionError,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::BackendError => "BackendError",
            FailureKind::SanitizationNoop => "SanitizationNoop",
            FailureKind::ExecutionError => "ExecutionError",
            FailureKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    /// The program finished; `None` means `result` was never set
    Succeeded { value: Option<String> },
    Failed {
        kind: FailureKind,
        detail: String,
        /// The program text, for execution failures
        #[serde(skip_serializing_if = "Option::is_none")]
        program_text: Option<String>,
    },
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Succeeded { .. })
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            RunResult::Succeeded { value } => value.as_deref(),
            RunResult::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RunResult::Succeeded { .. } => None,
            RunResult::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Run state machine; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    GeneratingStrategy,
    Sanitizing,
    Executing,
    Succeeded,
    Failed(FailureKind),
}

impl RunState {
    fn rank(&self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::GeneratingStrategy => 1,
            RunState::Sanitizing => 2,
            RunState::Executing => 3,
            RunState::Succeeded | RunState::Failed(_) => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed(_))
    }
}

/// A run result plus what happened along the way
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub result: RunResult,
    pub transitions: Vec<RunState>,
    /// Controller output after reasoning removal
    pub strategy: Option<String>,
    /// Sanitized program handed to the sandbox
    pub program: Option<String>,
    /// Captured `print` output
    pub output: Vec<String>,
    pub dropped_output: usize,
    pub delegations: DelegationStats,
    pub steps: usize,
    /// Controller and worker tokens combined
    pub usage: Usage,
    pub elapsed_ms: u64,
}

struct Run {
    state: RunState,
    started: Instant,
    report: RunReport,
}

impl Run {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            started: Instant::now(),
            report: RunReport {
                result: RunResult::Succeeded { value: None },
                transitions: vec![RunState::Idle],
                strategy: None,
                program: None,
                output: Vec::new(),
                dropped_output: 0,
                delegations: DelegationStats::default(),
                steps: 0,
                usage: Usage::default(),
                elapsed_ms: 0,
            },
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(next.rank() > self.state.rank(), "{:?} -> {:?}", self.state, next);
        tracing::info!(from = ?self.state, to = ?next, "run state");
        self.state = next;
        self.report.transitions.push(next);
    }

    fn succeed(mut self, value: Option<String>) -> RunReport {
        self.advance(RunState::Succeeded);
        self.report.result = RunResult::Succeeded { value };
        self.finish()
    }

    fn fail(mut self, kind: FailureKind, detail: String, program_text: Option<String>) -> RunReport {
        tracing::warn!(kind = kind.as_str(), detail = %detail, "run failed");
        self.advance(RunState::Failed(kind));
        self.report.result = RunResult::Failed {
            kind,
            detail,
            program_text,
        };
        self.finish()
    }

    fn finish(mut self) -> RunReport {
        self.report.elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.report
    }
}

/// Drives runs against one provider and configuration.
///
/// Runs share no mutable state, so one orchestrator may serve concurrent
/// runs through `&self`.
pub struct Orchestrator<P> {
    provider: P,
    config: RlmConfig,
    schema: SandboxSchema,
}

impl<P: LlmProvider> Orchestrator<P> {
    pub fn new(provider: P, config: RlmConfig) -> Result<Self> {
        config.validate()?;
        let schema = SandboxSchema::with_limits(config.limits.clone());
        Ok(Self {
            provider,
            config,
            schema,
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &RlmConfig {
        &self.config
    }

    pub fn schema(&self) -> &SandboxSchema {
        &self.schema
    }

    /// Controller system prompt for a document of `document_chars` characters
    pub fn system_prompt(&self, document_chars: usize) -> String {
        StrategyGenerator::new(&self.provider, &self.config, &self.schema).system_prompt(document_chars)
    }

    /// Answer `query` over `document`
    pub async fn run(&self, document: impl Into<Arc<str>>, query: &str) -> RunResult {
        self.run_with(document, query, &CancellationToken::new()).await.result
    }

    /// Like `run`, returning the full report and honoring cancellation
    pub async fn run_with(
        &self,
        document: impl Into<Arc<str>>,
        query: &str,
        cancel: &CancellationToken,
    ) -> RunReport {
        let document = document.into();
        let mut run = Run::new();
        if cancel.is_cancelled() {
            return run.fail(FailureKind::Cancelled, "cancelled before start".into(), None);
        }

        run.advance(RunState::GeneratingStrategy);
        let generator = StrategyGenerator::new(&self.provider, &self.config, &self.schema);
        let generated = tokio::select! {
            generated = generator.generate(&document, query) => Some(generated),
            _ = cancel.cancelled() => None,
        };
        let strategy = match generated {
            Some(Ok(strategy)) => strategy,
            Some(Err(err)) => return run.fail(FailureKind::BackendError, err.to_string(), None),
            None => {
                return run.fail(FailureKind::Cancelled, "cancelled during strategy generation".into(), None)
            }
        };
        run.report.usage.add(&strategy.usage);
        run.report.strategy = Some(strategy.text.clone());

        if cancel.is_cancelled() {
            return run.fail(FailureKind::Cancelled, "cancelled after strategy generation".into(), None);
        }
        self.sanitize_and_execute(run, document, &strategy.text, cancel).await
    }

    /// Run a hand-written program against `document`, skipping generation
    pub async fn run_program(
        &self,
        document: impl Into<Arc<str>>,
        program: &str,
        cancel: &CancellationToken,
    ) -> RunReport {
        self.sanitize_and_execute(Run::new(), document.into(), program, cancel).await
    }

    async fn sanitize_and_execute(
        &self,
        mut run: Run,
        document: Arc<str>,
        raw: &str,
        cancel: &CancellationToken,
    ) -> RunReport {
        run.advance(RunState::Sanitizing);
        let program = sanitize(raw);
        if program.is_empty() {
            return run.fail(
                FailureKind::SanitizationNoop,
                "controller output contained no program text".into(),
                None,
            );
        }
        run.report.program = Some(program.clone());
        tracing::debug!(program = %program, "sanitized program");

        run.advance(RunState::Executing);
        let delegator = Delegator::new(&self.provider, &self.config);
        let execution = execute(&program, document, &delegator, &self.config.limits, cancel).await;

        run.report.output = execution.output;
        run.report.dropped_output = execution.dropped_output;
        run.report.steps = execution.steps;
        run.report.delegations = execution.delegations;
        run.report.usage.add(&execution.delegations.usage);

        match execution.result {
            Ok(value) => {
                let value = value.to_answer();
                tracing::info!(
                    found = value.is_some(),
                    delegations = execution.delegations.calls,
                    steps = execution.steps,
                    "run succeeded"
                );
                run.succeed(value)
            }
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                tracing::info!(stage = err.stage().unwrap_or("execution"), "run cancelled");
                run.fail(FailureKind::Cancelled, err.to_string(), Some(program))
            }
            Err(err) => {
                tracing::warn!(
                    kind = %err.kind(),
                    line = ?err.line(),
                    program_fault = err.kind().is_program_fault(),
                    "program failed"
                );
                run.fail(FailureKind::ExecutionError, err.to_string(), Some(program))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use rlm_vm::ProviderError;

    const NEEDLE_PROGRAM: &str = "```python
size = 4000
for i in range(0, len(document), size):
    chunk = document[i:i + size]
    answer = ask_llm(chunk, 'Search for the secret key')
    if answer != 'NOT_FOUND':
        result = answer
        break
```";

    fn needle_document() -> String {
        format!("{}SECRET: IMT_2026{}", "noise ".repeat(2000), " noise ".repeat(2000))
    }

    fn needle_worker(user: &str) -> std::result::Result<String, ProviderError> {
        Ok(if user.contains("SECRET") { "IMT_2026".into() } else { "NOT_FOUND".into() })
    }

    fn orchestrator(provider: ScriptedProvider) -> Orchestrator<ScriptedProvider> {
        Orchestrator::new(provider, RlmConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        assert_eq!(needle_document().len(), 6 * 2000 + "SECRET: IMT_2026".len() + 7 * 2000);
        let provider = ScriptedProvider::pipeline(|| Ok(NEEDLE_PROGRAM.into()), needle_worker);
        let rlm = orchestrator(provider);

        let report = rlm
            .run_with(needle_document(), "Search the document for the SECRET value.", &CancellationToken::new())
            .await;
        assert_eq!(report.result, RunResult::Succeeded { value: Some("IMT_2026".into()) });
        assert_eq!(report.delegations.calls, 4);
        assert_eq!(report.delegations.found, 1);
        assert_eq!(report.delegations.not_found, 3);
        assert_eq!(
            report.transitions,
            vec![
                RunState::Idle,
                RunState::GeneratingStrategy,
                RunState::Sanitizing,
                RunState::Executing,
                RunState::Succeeded,
            ]
        );
        assert!(report.program.as_deref().is_some_and(|p| p.starts_with("size = 4000")));
        assert_eq!(report.usage.total_tokens, 12 * 5);

        let calls = rlm.provider().calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0].messages[1].content, "Search the document for the SECRET value.");
    }

    #[tokio::test]
    async fn test_empty_strategy_is_sanitization_noop() {
        for reply in ["", "   \n", "```python\n```"] {
            let provider = ScriptedProvider::pipeline(move || Ok(reply.to_string()), needle_worker);
            let result = orchestrator(provider).run(needle_document(), "q").await;
            assert_eq!(result.failure_kind(), Some(FailureKind::SanitizationNoop), "{:?}", reply);
        }
    }

    #[tokio::test]
    async fn test_invalid_program_is_execution_error() {
        let invalid = "for i in range(10)\n    result = i";
        let provider = ScriptedProvider::pipeline(move || Ok(invalid.into()), needle_worker);
        let result = orchestrator(provider).run(needle_document(), "q").await;

        match result {
            RunResult::Failed { kind, detail, program_text } => {
                assert_eq!(kind, FailureKind::ExecutionError);
                assert_eq!(program_text.as_deref(), Some(invalid));
                assert!(!detail.is_empty());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runtime_error_carries_program() {
        let program = "x = document[0]\nresult = x + 1";
        let provider = ScriptedProvider::pipeline(move || Ok(program.into()), needle_worker);
        let report = orchestrator(provider).run_with("abc", "q", &CancellationToken::new()).await;

        assert_eq!(report.result.failure_kind(), Some(FailureKind::ExecutionError));
        assert!(matches!(&report.result, RunResult::Failed { program_text: Some(p), .. } if p == program));
        assert_eq!(report.transitions.last(), Some(&RunState::Failed(FailureKind::ExecutionError)));
    }

    #[tokio::test]
    async fn test_absent_result_is_success() {
        let provider = ScriptedProvider::pipeline(|| Ok(NEEDLE_PROGRAM.into()), |_| Ok("NOT_FOUND".into()));
        let result = orchestrator(provider).run(needle_document(), "q").await;
        assert_eq!(result, RunResult::Succeeded { value: None });
    }

    #[tokio::test]
    async fn test_worker_failures_do_not_abort() {
        let provider = ScriptedProvider::pipeline(
            || Ok(NEEDLE_PROGRAM.into()),
            |user| {
                if user.contains("SECRET") {
                    Ok("IMT_2026".into())
                } else {
                    Err(ProviderError::Api { status: 500, message: "overloaded".into() })
                }
            },
        );
        let report = orchestrator(provider)
            .run_with(needle_document(), "q", &CancellationToken::new())
            .await;
        assert_eq!(report.result.value(), Some("IMT_2026"));
        assert_eq!(report.delegations.inconclusive, 3);
    }

    #[tokio::test]
    async fn test_backend_error_on_strategy() {
        let provider = ScriptedProvider::pipeline(
            || Err(ProviderError::Network("connection refused".into())),
            needle_worker,
        );
        let report = orchestrator(provider)
            .run_with(needle_document(), "q", &CancellationToken::new())
            .await;
        assert_eq!(report.result.failure_kind(), Some(FailureKind::BackendError));
        assert!(report.strategy.is_none());
        assert_eq!(report.transitions.len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let provider = ScriptedProvider::pipeline(|| Ok(NEEDLE_PROGRAM.into()), needle_worker);
        let rlm = orchestrator(provider);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = rlm.run_with(needle_document(), "q", &cancel).await;
        assert_eq!(report.result.failure_kind(), Some(FailureKind::Cancelled));
        assert!(rlm.provider().calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_between_delegations() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let provider = ScriptedProvider::pipeline(
            || Ok(NEEDLE_PROGRAM.into()),
            move |_| {
                trigger.cancel();
                Ok("NOT_FOUND".into())
            },
        );
        let report = orchestrator(provider).run_with(needle_document(), "q", &cancel).await;
        assert_eq!(report.result.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(report.delegations.calls, 1);
        assert!(matches!(report.result, RunResult::Failed { program_text: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let provider = ScriptedProvider::pipeline(|| Ok(NEEDLE_PROGRAM.into()), needle_worker);
        let rlm = orchestrator(provider);

        let other = "noise ".repeat(100);
        let (a, b) = tokio::join!(rlm.run(needle_document(), "q"), rlm.run(other, "q"));
        assert_eq!(a.value(), Some("IMT_2026"));
        assert_eq!(b, RunResult::Succeeded { value: None });
    }

    #[tokio::test]
    async fn test_run_program_skips_generation() {
        let provider = ScriptedProvider::pipeline(|| Ok(String::new()), needle_worker);
        let rlm = orchestrator(provider);

        let report = rlm
            .run_program("SECRET: 123", "result = document.split(':')[1].strip()", &CancellationToken::new())
            .await;
        assert_eq!(report.result.value(), Some("123"));
        assert_eq!(report.transitions[1], RunState::Sanitizing);
        assert!(rlm.provider().calls().is_empty());
    }

    #[test]
    fn test_report_json() {
        let provider = ScriptedProvider::pipeline(|| Ok("result = len(document)".into()), needle_worker);
        let report = tokio_test::block_on(orchestrator(provider).run_with("abcd", "q", &CancellationToken::new()));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"]["status"], "succeeded");
        assert_eq!(json["result"]["value"], "4");
        assert_eq!(json["transitions"][1], "generating_strategy");
        assert_eq!(json["delegations"]["calls"], 0);

        let failed = RunResult::Failed {
            kind: FailureKind::SanitizationNoop,
            detail: "empty".into(),
            program_text: None,
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["kind"], "sanitization_noop");
        assert!(json.get("program_text").is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let provider = ScriptedProvider::replying(|_| Ok(String::new()));
        assert!(Orchestrator::new(provider, RlmConfig::new().with_chunk_size(0)).is_err());
    }
}
