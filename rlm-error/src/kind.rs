//! Error kinds for RLM operations

use std::fmt;

/// The kind of error that occurred.
///
/// This enum categorizes errors to help users write clear error handling logic.
/// Users can match on ErrorKind to decide how to handle specific error cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid configuration or parameters
    ConfigInvalid,

    // =========================================================================
    // Program errors - raised while compiling or running generated code
    // =========================================================================
    /// Program text could not be parsed
    ParseFailed,

    /// Reference to a name that is not bound in the sandbox
    UnknownName,

    /// Operation applied to a value of the wrong type
    TypeMismatch,

    /// Index outside the bounds of a string or list
    IndexOutOfRange,

    /// Integer division or modulo by zero
    DivisionByZero,

    /// Invalid argument passed to a function
    InvalidArgument,

    // =========================================================================
    // Resource limits
    // =========================================================================
    /// Instruction budget exhausted
    StepLimitExceeded,

    /// Compute time budget exhausted
    TimeLimitExceeded,

    /// Too many delegated worker calls in one run
    DelegationLimitExceeded,

    /// A value grew beyond the configured size cap
    ValueTooLarge,

    /// Operand stack overflow
    StackOverflow,

    /// Operand stack underflow
    StackUnderflow,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Requested model is not served by the provider
    ModelNotFound,

    /// Rate limit exceeded
    RateLimited,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Run control
    // =========================================================================
    /// The run was cancelled by the caller
    Cancelled,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ConfigInvalid => "ConfigInvalid",

            // Program
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::UnknownName => "UnknownName",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::IndexOutOfRange => "IndexOutOfRange",
            ErrorKind::DivisionByZero => "DivisionByZero",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Limits
            ErrorKind::StepLimitExceeded => "StepLimitExceeded",
            ErrorKind::TimeLimitExceeded => "TimeLimitExceeded",
            ErrorKind::DelegationLimitExceeded => "DelegationLimitExceeded",
            ErrorKind::ValueTooLarge => "ValueTooLarge",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::StackUnderflow => "StackUnderflow",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Run control
            ErrorKind::Cancelled => "Cancelled",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
        )
    }

    /// Check if this error kind originates from generated program text
    /// (as opposed to the backend or the host)
    pub fn is_program_fault(&self) -> bool {
        matches!(
            self,
            ErrorKind::ParseFailed
                | ErrorKind::UnknownName
                | ErrorKind::TypeMismatch
                | ErrorKind::IndexOutOfRange
                | ErrorKind::DivisionByZero
                | ErrorKind::InvalidArgument
                | ErrorKind::StepLimitExceeded
                | ErrorKind::TimeLimitExceeded
                | ErrorKind::DelegationLimitExceeded
                | ErrorKind::ValueTooLarge
                | ErrorKind::StackOverflow
                | ErrorKind::StackUnderflow
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::UnknownName.to_string(), "UnknownName");
        assert_eq!(ErrorKind::InferenceFailed.to_string(), "InferenceFailed");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::NetworkFailed.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::ParseFailed.is_retryable());
        assert!(!ErrorKind::StepLimitExceeded.is_retryable());
    }

    #[test]
    fn test_is_program_fault() {
        assert!(ErrorKind::TypeMismatch.is_program_fault());
        assert!(ErrorKind::StepLimitExceeded.is_program_fault());
        assert!(ErrorKind::TimeLimitExceeded.is_program_fault());
        assert!(!ErrorKind::NetworkFailed.is_program_fault());
        assert!(!ErrorKind::Cancelled.is_program_fault());
    }
}
