//! The RLM `Error`

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// Error returned by every fallible RLM operation.
///
/// Carries what went wrong (`kind`), whether retrying could help
/// (`status`), where it happened (`operation`), key/value context such
/// as the program line, and an optional wrapped source.
///
/// ```rust
/// use rlm_error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::TypeMismatch, "can only concatenate str (not \"int\") to str")
///     .with_operation("interpreter::run")
///     .at_line(4);
///
/// assert_eq!(err.line(), Some(4));
/// assert!(!err.is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// New error; the status follows `kind.is_retryable()`
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: if kind.is_retryable() { ErrorStatus::Temporary } else { ErrorStatus::Permanent },
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Latest value recorded under `key`
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.iter().rev().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    /// Program line the error points at, if it came from the sandbox
    pub fn line(&self) -> Option<usize> {
        self.context_value("line").and_then(|v| v.parse().ok())
    }

    /// Stage a cancellation interrupted
    pub fn stage(&self) -> Option<&str> {
        self.context_value("stage")
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn temporary(self) -> Self {
        self.with_status(ErrorStatus::Temporary)
    }

    pub fn permanent(self) -> Self {
        self.with_status(ErrorStatus::Permanent)
    }

    /// Retries ran out
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Set the operation. A previous operation is kept in context as `called`.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Pin the error to a program line
    pub fn at_line(self, line: usize) -> Self {
        self.with_context("line", line.to_string())
    }

    /// Attach the underlying error. Only one source may be set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }
}

/// Single line, suitable for logs and run reports:
/// `Kind (status) at operation, context { k: v } => message`
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;
        if !self.context.is_empty() {
            let pairs: Vec<String> = self.context.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
            write!(f, ", context {{ {} }}", pairs.join(", "))?;
        }
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("kind", &self.kind)
            .field("status", &self.status)
            .field("operation", &self.operation)
            .field("message", &self.message);
        if !self.context.is_empty() {
            s.field("context", &self.context);
        }
        if let Some(source) = &self.source {
            s.field("source", source);
        }
        s.finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Document and program files
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string()).with_operation("io").set_source(err)
    }
}

impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailed, message)
    }

    /// `name 'x' is not defined`, with the name in context
    pub fn unknown_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownName, format!("name '{}' is not defined", name)).with_context("name", name)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, message)
    }

    pub fn stack_overflow() -> Self {
        Self::new(ErrorKind::StackOverflow, "operand stack depth exceeded")
    }

    pub fn stack_underflow() -> Self {
        Self::new(ErrorKind::StackUnderflow, "pop from empty operand stack")
    }

    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailed, message)
    }

    /// Run cancelled while in `stage`
    pub fn cancelled(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self::new(ErrorKind::Cancelled, format!("run cancelled during {}", stage)).with_context("stage", stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_follows_kind() {
        let err = Error::new(ErrorKind::UnknownName, "name 'os' is not defined");
        assert_eq!(err.message(), "name 'os' is not defined");
        assert_eq!(err.status(), ErrorStatus::Permanent);

        let err = Error::inference_failed("model overloaded");
        assert_eq!(err.status(), ErrorStatus::Temporary);
        assert!(!err.permanent().is_retryable());
    }

    #[test]
    fn test_line_context() {
        let err = Error::type_mismatch("bad operand").at_line(2).at_line(7);
        assert_eq!(err.line(), Some(7));
        assert_eq!(err.context().len(), 2);

        assert_eq!(Error::unexpected("boom").line(), None);
        assert_eq!(Error::unexpected("boom").with_context("line", "n/a").line(), None);
    }

    #[test]
    fn test_operation_chaining() {
        let err = Error::parse_failed("unexpected indent")
            .with_operation("lexer::tokenize")
            .with_operation("compiler::compile");

        assert_eq!(err.operation(), "compiler::compile");
        assert_eq!(err.context_value("called"), Some("lexer::tokenize"));
    }

    #[test]
    fn test_persist() {
        let err = Error::new(ErrorKind::NetworkFailed, "connection refused");
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::InferenceFailed, "model unavailable")
            .with_operation("strategy::generate")
            .with_context("model", "qwen3:4b")
            .with_context("attempt", "1");

        assert_eq!(
            err.to_string(),
            "InferenceFailed (temporary) at strategy::generate, context { model: qwen3:4b, attempt: 1 } => model unavailable"
        );
    }

    #[test]
    fn test_debug_includes_source() {
        let err = Error::unexpected("wrapped").set_source(anyhow::anyhow!("inner cause"));
        let debug = format!("{:?}", err);
        assert!(debug.contains("Unexpected"));
        assert!(debug.contains("inner cause"));
    }

    #[test]
    fn test_constructors() {
        let err = Error::unknown_name("os");
        assert_eq!(err.kind(), ErrorKind::UnknownName);
        assert_eq!(err.context_value("name"), Some("os"));

        let err = Error::cancelled("delegation");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.stage(), Some("delegation"));
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file").into();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.operation(), "io");
        assert!(err.source_ref().is_some());

        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}
