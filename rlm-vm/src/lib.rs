//! # RLM VM
//!
//! The execution sandbox for controller-written programs, and the
//! completion gateway the runtime talks to.
//!
//! ## Core Concepts
//! - **Language**: a small Python subset, compiled to bytecode before it runs
//! - **Bindings**: a closed capability table (`document`, `ask_llm`, `result`, `print`)
//! - **Interpreter**: a bounded stack machine that suspends on every `ask_llm`
//! - **Schema**: the language reference handed to the controller model
//! - **Provider**: trait-based chat completion (Ollama, OpenAI-compatible)

pub mod ast;
pub mod bindings;
mod builtins;
pub mod compiler;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod opcode;
mod ops;
pub mod parser;
pub mod provider;
pub mod schema;
pub mod stack;
pub mod value;

pub use bindings::{Binding, Capability};
pub use compiler::compile;
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use interpreter::{
    DelegationRequest, Environment, ExecutionResult, ExecutionState, Interpreter, SandboxLimits,
};
pub use opcode::{Builtin, Method, Opcode, Program};
pub use provider::{
    AnyProvider, ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    OllamaProvider, OpenAIProvider, ProviderConfig, ProviderError, ProviderType, Role, Usage,
    DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_BASE_URL,
};
pub use schema::SandboxSchema;
pub use stack::Stack;
pub use value::Value;
