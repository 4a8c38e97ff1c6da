//! # Sandbox Driver
//!
//! Compiles a sanitized program and runs it, answering each `ask_llm`
//! suspension through the delegation primitive.

use crate::delegate::{DelegationStats, Delegator};
use rlm_vm::{
    compile, Error, Environment, ExecutionResult, Interpreter, LlmProvider, Result, SandboxLimits,
    Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Interpreter compute between yields to the runtime
const COMPUTE_SLICE: Duration = Duration::from_millis(20);

/// Everything one program execution produced
#[derive(Debug)]
pub struct Execution {
    /// Final `result` value, or the error that stopped the program
    pub result: Result<Value>,
    /// Captured `print` output
    pub output: Vec<String>,
    /// Lines dropped after the output cap
    pub dropped_output: usize,
    /// Interpreter instructions executed
    pub steps: usize,
    pub delegations: DelegationStats,
}

impl Execution {
    fn failed(err: Error) -> Self {
        Self {
            result: Err(err),
            output: Vec::new(),
            dropped_output: 0,
            steps: 0,
            delegations: DelegationStats::default(),
        }
    }
}

/// Run `program` against `document`.
///
/// The interpreter runs in short slices with a yield in between, so a
/// long computation neither starves the runtime nor outlives a
/// cancellation. Cancellation is also checked before every delegation
/// and interrupts an in-flight worker call.
pub async fn execute<P: LlmProvider>(
    program: &str,
    document: Arc<str>,
    delegator: &Delegator<'_, P>,
    limits: &SandboxLimits,
    cancel: &CancellationToken,
) -> Execution {
    if let Err(err) = limits.check_program(program) {
        return Execution::failed(err);
    }
    let compiled = match compile(program) {
        Ok(compiled) => compiled,
        Err(err) => return Execution::failed(err),
    };
    tracing::debug!(instructions = compiled.code.len(), locals = compiled.locals.len(), "program compiled");

    let mut interp = Interpreter::with_environment(compiled, Environment::new(document))
        .with_limits(limits.clone());
    let mut stats = DelegationStats::default();

    let result = loop {
        match interp.run_slice(COMPUTE_SLICE) {
            Ok(None) => {
                if cancel.is_cancelled() {
                    break Err(Error::cancelled("execution"));
                }
                tokio::task::yield_now().await;
            }
            Ok(Some(ExecutionResult::Complete(value))) => break Ok(value),
            Ok(Some(ExecutionResult::NeedsDelegation(request))) => {
                if cancel.is_cancelled() {
                    break Err(Error::cancelled("delegation"));
                }
                tracing::debug!(index = request.index, line = request.line, "program called ask_llm");

                let outcome = tokio::select! {
                    outcome = delegator.delegate_tracked(&request.fragment, &request.query, &mut stats) => Some(outcome),
                    _ = cancel.cancelled() => None,
                };
                let Some(outcome) = outcome else {
                    break Err(Error::cancelled("delegation"));
                };
                if let Err(err) = interp.provide_delegation_response(outcome.into_text()) {
                    break Err(err);
                }
            }
            Err(err) => break Err(err),
        }
    };

    let steps = interp.steps();
    let env = interp.into_environment();
    Execution {
        result,
        output: env.output,
        dropped_output: env.dropped_output,
        steps,
        delegations: stats,
    }
}
