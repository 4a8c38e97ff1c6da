//! Sandbox error types
//!
//! Re-exports rlm-error and provides sandbox-specific conveniences.

pub use rlm_error::{Error, ErrorKind, ErrorStatus, Result};

// =============================================================================
// Sandbox-specific error constructors
// =============================================================================

/// Create a ParseFailed error pinned to a source line
pub fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::parse_failed(message)
        .with_operation("parser::parse")
        .at_line(line)
}

/// Create an UnknownName error
pub fn unknown_name(name: impl Into<String>) -> Error {
    Error::unknown_name(name)
}

/// Create an UnknownName error for a local read before any assignment
pub fn unassigned_local(name: impl Into<String>) -> Error {
    let name = name.into();
    Error::new(
        ErrorKind::UnknownName,
        format!("local variable '{}' referenced before assignment", name),
    )
    .with_context("name", name)
}

/// Create a TypeMismatch error
pub fn type_mismatch(message: impl Into<String>) -> Error {
    Error::type_mismatch(message)
}

/// Create a TypeMismatch error for an unsupported binary operation
pub fn unsupported_operands(op: &str, left: &str, right: &str) -> Error {
    Error::type_mismatch(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op, left, right
    ))
}

/// Create an IndexOutOfRange error
pub fn index_out_of_range(kind: &str, index: i64, len: usize) -> Error {
    Error::new(ErrorKind::IndexOutOfRange, format!("{} index out of range", kind))
        .with_context("index", index.to_string())
        .with_context("len", len.to_string())
}

/// Create a DivisionByZero error
pub fn division_by_zero() -> Error {
    Error::new(ErrorKind::DivisionByZero, "integer division or modulo by zero")
}

/// Create an InvalidArgument error
pub fn invalid_argument(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidArgument, message)
}

/// Create an InvalidArgument error for an arity mismatch
pub fn arity(function: &str, expected: &str, got: usize) -> Error {
    Error::new(
        ErrorKind::InvalidArgument,
        format!("{}() takes {} argument(s) ({} given)", function, expected, got),
    )
    .with_context("function", function.to_string())
}

/// Create an InvalidArgument error for integer overflow
pub fn overflow() -> Error {
    Error::new(ErrorKind::InvalidArgument, "integer overflow")
}

/// Create a StepLimitExceeded error
pub fn step_limit_exceeded(max: usize) -> Error {
    Error::new(
        ErrorKind::StepLimitExceeded,
        format!("program exceeded the budget of {} steps", max),
    )
    .with_context("max_steps", max.to_string())
}

/// Create a TimeLimitExceeded error
pub fn time_limit_exceeded(max_ms: u64) -> Error {
    Error::new(
        ErrorKind::TimeLimitExceeded,
        format!("program exceeded the budget of {} ms of compute", max_ms),
    )
    .with_context("max_compute_ms", max_ms.to_string())
}

/// Create a DelegationLimitExceeded error
pub fn delegation_limit_exceeded(max: usize) -> Error {
    Error::new(
        ErrorKind::DelegationLimitExceeded,
        format!("program exceeded the budget of {} ask_llm calls", max),
    )
    .with_context("max_delegations", max.to_string())
}

/// Create a ValueTooLarge error
pub fn value_too_large(size: usize, max: usize) -> Error {
    Error::new(
        ErrorKind::ValueTooLarge,
        format!("value of size {} exceeds max {}", size, max),
    )
    .with_context("size", size.to_string())
    .with_context("max", max.to_string())
}

/// Create a StackOverflow error
pub fn stack_overflow() -> Error {
    Error::stack_overflow()
}

/// Create a StackUnderflow error
pub fn stack_underflow() -> Error {
    Error::stack_underflow()
}

/// Create an Unsupported error for a language feature the sandbox leaves out
pub fn unsupported_feature(line: usize, feature: impl Into<String>) -> Error {
    let feature = feature.into();
    Error::unsupported(format!("{} is not available in the sandbox", feature))
        .with_operation("parser::parse")
        .at_line(line)
        .with_context("feature", feature)
}

/// Create an error for assigning to a name the program may only read
pub fn read_only_binding(name: &str) -> Error {
    Error::unsupported(format!("cannot assign to '{}': it is a read-only binding", name))
        .with_context("name", name.to_string())
}

/// Create an UnknownName error for a method outside the method table
pub fn unknown_method(name: &str) -> Error {
    Error::new(
        ErrorKind::UnknownName,
        format!("method '{}' is not available in the sandbox", name),
    )
    .with_context("method", name.to_string())
}
