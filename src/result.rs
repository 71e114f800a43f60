//! Represents failures at the agent boundary as a Rust [`Result`](std::result) type.
//!
//! Most interactions with an embedded agent can fail: source text may not
//! compile, a link callback may come back empty, JavaScript may throw, or a
//! transferred value may not fit the requested host type. APIs that can fail
//! this way are called _throwing APIs_ and return [`Result`].
//!
//! Failures that originate inside the engine carry a structured
//! [`ErrorValue`](crate::types::ErrorValue) with kind, message and a rendered
//! stack, rather than a bare string, so rejections can be transferred back
//! into JavaScript losslessly.

use thiserror::Error;

use crate::types::ErrorValue;

/// The result type for throwing APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// Host-facing error taxonomy.
///
/// The first three variants wrap an engine-produced [`ErrorValue`]; the rest
/// originate on the host side. A pending engine exception is never surfaced
/// directly; it is caught at the task boundary and projected into one of
/// these variants.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Source text failed to parse or compile. Carries the engine diagnostic.
    #[error("compile error: {0}")]
    Compile(ErrorValue),

    /// A module link callback returned nothing or raised; surfaces through
    /// module evaluation as a rejection.
    #[error("link error: {0}")]
    Link(ErrorValue),

    /// JavaScript threw during script or module execution.
    #[error("runtime error: {0}")]
    Runtime(ErrorValue),

    /// A transfer could not map a value onto the requested type.
    #[error("type error: {0}")]
    Type(String),

    /// A numeric or string coercion would lose information.
    #[error("range error: {0}")]
    Range(String),

    /// Host misuse, e.g. dereferencing a remote handle against the wrong
    /// agent. Treated as a programmer error.
    #[error("logic error: {0}")]
    Logic(String),

    /// The agent was torn down or severed before the operation could run.
    #[error("agent terminated")]
    Terminated,
}

impl Error {
    /// The error value carried by an engine-originated failure, if any.
    pub fn value(&self) -> Option<&ErrorValue> {
        match self {
            Error::Compile(value) | Error::Link(value) | Error::Runtime(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }
}

/// Extension trait for surfacing channel/scheduling failures as
/// [`Error::Terminated`].
pub trait ResultExt<T> {
    fn or_terminated(self) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E> {
    fn or_terminated(self) -> Result<T> {
        self.map_err(|_| Error::Terminated)
    }
}
