//! # Binding Table
//!
//! The closed set of host capabilities a sandbox program may reference.
//! Anything not listed here, not a language intrinsic and not a local
//! variable is rejected when the program is compiled.

use crate::opcode::Builtin;
use serde::Serialize;

/// A host capability bound into the execution environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `document`: the full input text, read-only
    Document,
    /// `ask_llm(fragment, query)`: the delegation primitive
    Delegate,
    /// `result`: the answer slot, read/write
    Result,
    /// `print(...)`: captured output
    Print,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Document,
        Capability::Delegate,
        Capability::Result,
        Capability::Print,
    ];

    /// Name the program uses
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Document => "document",
            Capability::Delegate => "ask_llm",
            Capability::Result => "result",
            Capability::Print => "print",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Whether a program may rebind this name
    pub fn is_writable(&self) -> bool {
        matches!(self, Capability::Result)
    }

    /// Whether this capability is a function rather than a value
    pub fn is_callable(&self) -> bool {
        matches!(self, Capability::Delegate | Capability::Print)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Capability::Document => "str, the full input text (read-only)",
            Capability::Delegate => {
                "ask_llm(fragment: str, query: str) -> str, asks a worker model about one fragment; returns the answer or 'NOT_FOUND'"
            }
            Capability::Result => "the answer slot, initially None; assign the final answer to it",
            Capability::Print => "print(*values, sep=' ', end='\\n'), output is captured for the run report",
        }
    }
}

/// What a bare name refers to at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Capability(Capability),
    Builtin(Builtin),
    Local(usize),
}

/// Resolve a name against the capability table, the intrinsics and the
/// program's locals (in that order)
pub fn resolve(name: &str, locals: &[String]) -> Option<Binding> {
    if let Some(cap) = Capability::from_name(name) {
        return Some(Binding::Capability(cap));
    }
    if let Some(builtin) = Builtin::from_name(name) {
        return Some(Binding::Builtin(builtin));
    }
    locals
        .iter()
        .position(|l| l == name)
        .map(Binding::Local)
}

/// Names a program may not bind as locals
pub fn is_reserved(name: &str) -> bool {
    match Capability::from_name(name) {
        Some(cap) => !cap.is_writable(),
        None => Builtin::from_name(name).is_some(),
    }
}
