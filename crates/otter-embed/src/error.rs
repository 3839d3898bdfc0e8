//! Error types for otter-embed
//!
//! Re-exports the shared error vocabulary from otter-embed-core and adds the
//! bridge's own failures.

use thiserror::Error;

pub use otter_embed_core::{ErrorKind, HostError, HostErrorKind, ScriptError};

/// Errors returned by bridge operations
#[derive(Error, Debug, Clone)]
pub enum EmbedError {
    /// Script threw an exception
    #[error(transparent)]
    Script(Box<ScriptError>),

    /// Host code called from script raised an error that script did not catch
    #[error(transparent)]
    Host(#[from] HostError),

    /// Access between contexts with different security tokens
    #[error("SecurityError: {0}")]
    Security(String),

    /// A value cannot cross the boundary
    #[error("cannot marshal {description}: {reason}")]
    Marshal { description: String, reason: String },

    /// The isolate is entered on another thread and the caller does not hold its lock
    #[error("isolate {isolate} is entered on another thread")]
    ForeignIsolate { isolate: u64 },

    /// Array index past the end
    #[error("index {index} out of range for array of length {length}")]
    IndexOutOfRange { index: i64, length: usize },

    /// Strided slice assignment with a mismatched sequence
    #[error("attempt to assign sequence of size {actual} to extended slice of size {expected}")]
    SliceSize { expected: usize, actual: usize },

    /// Slice with step zero
    #[error("slice step cannot be zero")]
    ZeroSliceStep,

    /// No process-wide platform installed
    #[error("platform is not initialized")]
    PlatformNotInitialized,

    /// The engine backend failed outside of script execution
    #[error("engine backend error: {0}")]
    Backend(String),

    /// Configuration could not be loaded
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EmbedError {
    /// Create a marshal error
    pub fn marshal(description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Marshal {
            description: description.into(),
            reason: reason.into(),
        }
    }

    /// Create a security error
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    /// The script error, if this is one
    pub fn as_script(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(err) => Some(err),
            _ => None,
        }
    }

    /// The host error, if this is one
    pub fn as_host(&self) -> Option<&HostError> {
        match self {
            Self::Host(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

impl From<ScriptError> for EmbedError {
    fn from(err: ScriptError) -> Self {
        Self::Script(Box::new(err))
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Lets host callbacks propagate bridge failures with `?`. Script errors keep
/// their kind, so a RangeError raised again into script is still a RangeError.
impl From<EmbedError> for HostError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Host(host) => host,
            EmbedError::Script(script) => {
                let message = script.message.clone();
                let kind = match script.kind {
                    ErrorKind::RangeError => HostErrorKind::Index,
                    ErrorKind::ReferenceError => HostErrorKind::Attribute,
                    ErrorKind::TypeError => HostErrorKind::Type,
                    ErrorKind::SyntaxError => HostErrorKind::Syntax,
                    _ => HostErrorKind::Other(script.name.clone()),
                };
                HostError::new(kind, message).with_origin(*script)
            }
            EmbedError::IndexOutOfRange { .. } => HostError::index(err.to_string()),
            EmbedError::Security(message) => HostError::other("SecurityError", message),
            other => HostError::other("Error", other.to_string()),
        }
    }
}

/// Result type alias for bridge operations
pub type EmbedResult<T> = Result<T, EmbedError>;

/// Report misuse of the lock or enter protocol.
///
/// These are programming errors on the caller's side, not recoverable
/// conditions, so they abort the current thread after logging.
#[track_caller]
pub(crate) fn protocol_violation(message: impl AsRef<str>) -> ! {
    let message = message.as_ref();
    tracing::error!(message, "protocol violation");
    panic!("protocol violation: {message}");
}
