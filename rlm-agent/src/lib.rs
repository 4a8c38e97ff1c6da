//! # RLM Agent
//!
//! The generation-to-execution pipeline: a controller model writes a
//! program, the program runs in the sandbox, and every `ask_llm` call it
//! makes becomes one worker inference.

pub mod config;
pub mod delegate;
pub mod executor;
pub mod orchestrator;
pub mod sanitize;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use config::{RlmConfig, DEFAULT_CHUNK_SIZE};
pub use delegate::{normalize_reply, DelegationOutcome, DelegationStats, Delegator, NOT_FOUND};
pub use executor::{execute, Execution};
pub use orchestrator::{FailureKind, Orchestrator, RunReport, RunResult, RunState};
pub use sanitize::{sanitize, strip_reasoning};
pub use strategy::{Strategy, StrategyGenerator};

pub use tokio_util::sync::CancellationToken;
