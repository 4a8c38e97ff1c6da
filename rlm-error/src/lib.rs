//! # rlm-error
//!
//! Unified error handling for the RLM runtime.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., UnknownName, InferenceFailed)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use rlm_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::UnknownName, "name 'os' is not defined")
//!         .with_operation("compiler::resolve")
//!         .with_context("name", "os")
//!         .with_context("line", "3"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, rlm_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using the RLM Error
pub type Result<T> = std::result::Result<T, Error>;
