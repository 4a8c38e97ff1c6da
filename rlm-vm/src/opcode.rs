//! # Sandbox Opcodes
//!
//! The instruction set the compiler lowers controller programs to.
//!
//! ## Design
//! - A stack machine: expressions push onto the operand stack
//! - Loop iterators live on a separate iterator stack
//! - Locals are numbered slots resolved at compile time
//! - `DELEGATE` is the only instruction that leaves the sandbox; the
//!   interpreter suspends on it and waits for the driver to resume

use crate::bindings::Capability;
use crate::value::Value;
use std::fmt::{self, Write as _};

/// Sandbox opcode - one interpreter instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    // =========================================================================
    // VALUES AND BINDINGS
    // =========================================================================
    /// Push a constant
    Const(Value),
    /// Push a local slot (fails if never assigned)
    LoadLocal(usize),
    /// Pop into a local slot
    StoreLocal(usize),
    /// Push a bound capability value (`document` or `result`)
    LoadCapability(Capability),
    /// Pop into the `result` slot
    StoreResult,

    // =========================================================================
    // STACK OPERATIONS
    // =========================================================================
    Pop,
    Dup,
    /// Swap the two top values
    Swap,
    /// Move the top value under the next two: [a, b, c] -> [c, a, b]
    Rot3,

    // =========================================================================
    // OPERATORS
    // =========================================================================
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareOp),
    /// value[index]
    Index,
    /// value[start:end]; absent bounds are not pushed
    Slice { has_start: bool, has_end: bool },

    // =========================================================================
    // CONSTRUCTORS
    // =========================================================================
    /// Build a list from the top N values
    BuildList(usize),
    /// Concatenate the top N values rendered as strings (f-strings)
    BuildString(usize),
    /// Render the top value for an f-string placeholder
    Format { repr: bool },
    /// Pop a value and append it to the list below it (comprehensions)
    AppendTop,
    /// Pop a value and append it to the list held in a slot
    Append(Slot),
    /// Pop a sequence and extend the list held in a slot
    Extend(Slot),
    /// Pop a sequence of exactly N items and push them in reverse
    Unpack(usize),

    // =========================================================================
    // CALLS
    // =========================================================================
    CallBuiltin { builtin: Builtin, argc: usize },
    /// Receiver is below the arguments
    CallMethod { method: Method, argc: usize },
    /// Captured `print(*args, sep=, end=)`; sep/end are pushed last
    Print { argc: usize, has_sep: bool, has_end: bool },
    /// `ask_llm(fragment, query)`: suspend for a delegation
    Delegate,

    // =========================================================================
    // CONTROL FLOW
    // =========================================================================
    Jump(usize),
    /// Pop; jump if falsy
    JumpIfFalse(usize),
    /// Jump if falsy keeping the value, otherwise pop it (`and`)
    JumpIfFalseOrPop(usize),
    /// Jump if truthy keeping the value, otherwise pop it (`or`)
    JumpIfTrueOrPop(usize),
    /// Pop an iterable and push an iterator onto the iterator stack
    GetIter,
    /// Push the next item, or jump when the iterator is exhausted
    ForIter(usize),
    /// Drop the innermost iterator
    PopIter,
    /// End of program
    Halt,
}

/// A writable slot targeted by in-place list mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Local(usize),
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// `/` floors on integers
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "not",
        }
    }
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
        }
    }
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
        }
    }
}

/// Language intrinsics. Pure functions with no host access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Range,
    Str,
    Int,
    Bool,
    Min,
    Max,
    Abs,
    Enumerate,
    List,
}

impl Builtin {
    pub const ALL: [Builtin; 10] = [
        Builtin::Len,
        Builtin::Range,
        Builtin::Str,
        Builtin::Int,
        Builtin::Bool,
        Builtin::Min,
        Builtin::Max,
        Builtin::Abs,
        Builtin::Enumerate,
        Builtin::List,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Bool => "bool",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Enumerate => "enumerate",
            Builtin::List => "list",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Accepted argument counts (inclusive)
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Builtin::Len | Builtin::Abs | Builtin::Enumerate => (1, 1),
            Builtin::Range => (1, 3),
            Builtin::Str | Builtin::Int | Builtin::Bool | Builtin::List => (0, 1),
            Builtin::Min | Builtin::Max => (1, usize::MAX),
        }
    }
}

/// Methods callable on strings and lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Strip,
    Lstrip,
    Rstrip,
    Lower,
    Upper,
    Find,
    Startswith,
    Endswith,
    Split,
    Splitlines,
    Replace,
    Count,
    Join,
    Isdigit,
    Index,
}

impl Method {
    pub const ALL: [Method; 15] = [
        Method::Strip,
        Method::Lstrip,
        Method::Rstrip,
        Method::Lower,
        Method::Upper,
        Method::Find,
        Method::Startswith,
        Method::Endswith,
        Method::Split,
        Method::Splitlines,
        Method::Replace,
        Method::Count,
        Method::Join,
        Method::Isdigit,
        Method::Index,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Strip => "strip",
            Method::Lstrip => "lstrip",
            Method::Rstrip => "rstrip",
            Method::Lower => "lower",
            Method::Upper => "upper",
            Method::Find => "find",
            Method::Startswith => "startswith",
            Method::Endswith => "endswith",
            Method::Split => "split",
            Method::Splitlines => "splitlines",
            Method::Replace => "replace",
            Method::Count => "count",
            Method::Join => "join",
            Method::Isdigit => "isdigit",
            Method::Index => "index",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Accepted argument counts (inclusive)
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Method::Strip | Method::Lstrip | Method::Rstrip => (0, 1),
            Method::Lower | Method::Upper | Method::Isdigit | Method::Splitlines => (0, 0),
            Method::Find | Method::Count | Method::Index => (1, 1),
            Method::Startswith | Method::Endswith | Method::Join => (1, 1),
            Method::Split => (0, 2),
            Method::Replace => (2, 3),
        }
    }
}

impl Opcode {
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Opcode::Jump(_)
                | Opcode::JumpIfFalse(_)
                | Opcode::JumpIfFalseOrPop(_)
                | Opcode::JumpIfTrueOrPop(_)
                | Opcode::ForIter(_)
                | Opcode::Halt
        )
    }

    /// Whether this instruction leaves the sandbox
    pub fn is_io(&self) -> bool {
        matches!(self, Opcode::Delegate | Opcode::Print { .. })
    }

    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Opcode::Jump(t)
            | Opcode::JumpIfFalse(t)
            | Opcode::JumpIfFalseOrPop(t)
            | Opcode::JumpIfTrueOrPop(t)
            | Opcode::ForIter(t) => Some(*t),
            _ => None,
        }
    }

    fn format_parts(&self) -> (&'static str, String) {
        match self {
            Opcode::Const(v) => ("CONST", truncate(&v.repr(), 40)),
            Opcode::LoadLocal(slot) => ("LOAD_LOCAL", format!("${}", slot)),
            Opcode::StoreLocal(slot) => ("STORE_LOCAL", format!("${}", slot)),
            Opcode::LoadCapability(cap) => ("LOAD_CAP", cap.name().to_string()),
            Opcode::StoreResult => ("STORE_RESULT", String::new()),
            Opcode::Pop => ("POP", String::new()),
            Opcode::Dup => ("DUP", String::new()),
            Opcode::Swap => ("SWAP", String::new()),
            Opcode::Rot3 => ("ROT3", String::new()),
            Opcode::Unary(op) => ("UNARY", op.symbol().to_string()),
            Opcode::Binary(op) => ("BINARY", op.symbol().to_string()),
            Opcode::Compare(op) => ("COMPARE", op.symbol().to_string()),
            Opcode::Index => ("INDEX", String::new()),
            Opcode::Slice { has_start, has_end } => (
                "SLICE",
                format!(
                    "[{}:{}]",
                    if *has_start { "s" } else { "" },
                    if *has_end { "e" } else { "" }
                ),
            ),
            Opcode::BuildList(n) => ("BUILD_LIST", n.to_string()),
            Opcode::BuildString(n) => ("BUILD_STRING", n.to_string()),
            Opcode::Format { repr } => ("FORMAT", if *repr { "!r" } else { "" }.to_string()),
            Opcode::AppendTop => ("APPEND_TOP", String::new()),
            Opcode::Append(slot) => ("APPEND", slot.to_string()),
            Opcode::Extend(slot) => ("EXTEND", slot.to_string()),
            Opcode::Unpack(n) => ("UNPACK", n.to_string()),
            Opcode::CallBuiltin { builtin, argc } => ("CALL", format!("{}/{}", builtin.name(), argc)),
            Opcode::CallMethod { method, argc } => ("CALL_METHOD", format!(".{}/{}", method.name(), argc)),
            Opcode::Print { argc, has_sep, has_end } => {
                let mut details = argc.to_string();
                if *has_sep {
                    details.push_str(" sep");
                }
                if *has_end {
                    details.push_str(" end");
                }
                ("PRINT", details)
            }
            Opcode::Delegate => ("DELEGATE", String::new()),
            Opcode::Jump(t) => ("JUMP", format!("→ {}", t)),
            Opcode::JumpIfFalse(t) => ("JUMP_IF_FALSE", format!("→ {}", t)),
            Opcode::JumpIfFalseOrPop(t) => ("JUMP_IF_FALSE_OR_POP", format!("→ {}", t)),
            Opcode::JumpIfTrueOrPop(t) => ("JUMP_IF_TRUE_OR_POP", format!("→ {}", t)),
            Opcode::GetIter => ("GET_ITER", String::new()),
            Opcode::ForIter(t) => ("FOR_ITER", format!("→ {}", t)),
            Opcode::PopIter => ("POP_ITER", String::new()),
            Opcode::Halt => ("HALT", String::new()),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Local(i) => write!(f, "${}", i),
            Slot::Result => write!(f, "result"),
        }
    }
}

/// A compiled sandbox program
#[derive(Debug, Clone)]
pub struct Program {
    /// Instructions; always ends with `Halt`
    pub code: Vec<Opcode>,
    /// Source line of each instruction
    pub lines: Vec<usize>,
    /// Local variable names by slot
    pub locals: Vec<String>,
    /// The program text it was compiled from
    pub source: String,
}

impl Program {
    /// Source line for an instruction index
    pub fn line_at(&self, pc: usize) -> Option<usize> {
        self.lines.get(pc).copied()
    }

    /// Render a listing of the bytecode
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Locals: [{}]", self.locals.join(", "));
        let _ = writeln!(out, "Opcodes: {}", self.code.len());
        let _ = writeln!(out);

        let mut last_line = 0;
        for (i, op) in self.code.iter().enumerate() {
            let line = self.lines.get(i).copied().unwrap_or(0);
            let marker = if line != last_line {
                last_line = line;
                format!("{:>4}", line)
            } else {
                "    ".to_string()
            };

            let (name, mut details) = op.format_parts();
            match op {
                Opcode::LoadLocal(slot) | Opcode::StoreLocal(slot) => {
                    if let Some(local) = self.locals.get(*slot) {
                        details = format!("{} ({})", details, local);
                    }
                }
                _ => {}
            }

            if details.is_empty() {
                let _ = writeln!(out, "{} {:4} | {}", marker, i, name);
            } else {
                let _ = writeln!(out, "{} {:4} | {} {}", marker, i, name, details);
            }
        }
        out
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_len.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}
