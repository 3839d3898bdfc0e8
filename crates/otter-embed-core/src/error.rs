//! Error types shared by the engine capability and the bridge.
//!
//! [`HostError`] is a failure raised on the host side of the boundary;
//! [`ScriptError`] is the structured view of an exception thrown by script.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::stack::StackTrace;

/// Script-side error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Error,
    RangeError,
    ReferenceError,
    TypeError,
    SyntaxError,
    EvalError,
    UriError,
}

impl ErrorKind {
    /// The constructor name the engine uses for this kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::UriError => "URIError",
        }
    }

    /// Map a constructor name back to a kind. Unknown names are plain errors.
    pub fn from_name(name: &str) -> Self {
        match name {
            "RangeError" => ErrorKind::RangeError,
            "ReferenceError" => ErrorKind::ReferenceError,
            "TypeError" => ErrorKind::TypeError,
            "SyntaxError" => ErrorKind::SyntaxError,
            "EvalError" => ErrorKind::EvalError,
            "URIError" => ErrorKind::UriError,
            _ => ErrorKind::Error,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a host-side failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    /// Index out of range.
    Index,
    /// Attribute or name resolution failed.
    Attribute,
    /// Wrong type.
    Type,
    /// Malformed input.
    Syntax,
    /// Any other host error, carrying its kind name.
    Other(String),
}

impl HostErrorKind {
    pub fn name(&self) -> &str {
        match self {
            HostErrorKind::Index => "IndexError",
            HostErrorKind::Attribute => "AttributeError",
            HostErrorKind::Type => "TypeError",
            HostErrorKind::Syntax => "SyntaxError",
            HostErrorKind::Other(name) => name,
        }
    }

    /// Script kind this host kind is surfaced as.
    pub fn script_kind(&self) -> ErrorKind {
        match self {
            HostErrorKind::Index => ErrorKind::RangeError,
            HostErrorKind::Attribute => ErrorKind::ReferenceError,
            HostErrorKind::Type => ErrorKind::TypeError,
            HostErrorKind::Syntax => ErrorKind::SyntaxError,
            HostErrorKind::Other(_) => ErrorKind::Error,
        }
    }
}

/// An error raised by host code called from script.
///
/// When an origin is attached it holds the original domain error, so the exact
/// value can be recovered with [`HostError::downcast_ref`] after a round trip
/// through script.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .kind.name())]
pub struct HostError {
    kind: HostErrorKind,
    message: String,
    origin: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            origin: None,
        }
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Index, message)
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Attribute, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Type, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Syntax, message)
    }

    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Other(kind.into()), message)
    }

    /// Wrap a domain error, keeping it for a faithful round trip.
    ///
    /// The kind name is the error type's name without its module path.
    pub fn domain<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let full = std::any::type_name::<E>();
        let short = full.rsplit("::").next().unwrap_or(full);
        Self {
            kind: HostErrorKind::Other(short.to_string()),
            message: error.to_string(),
            origin: Some(Arc::new(error)),
        }
    }

    /// Attach a domain origin to an error with an explicit kind.
    pub fn with_origin<E>(mut self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.origin = Some(Arc::new(error));
        self
    }

    pub fn kind(&self) -> &HostErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The message as surfaced to script. Kinds without a script
    /// counterpart keep their name as a prefix.
    pub fn script_message(&self) -> String {
        match &self.kind {
            HostErrorKind::Other(name) => format!("{name}: {}", self.message),
            _ => self.message.clone(),
        }
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.origin.as_deref().and_then(|e| e.downcast_ref::<E>())
    }

    pub fn has_origin(&self) -> bool {
        self.origin.is_some()
    }
}

impl From<anyhow::Error> for HostError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<HostError>() {
            Ok(host) => host,
            Err(other) => HostError::other("Error", format!("{other:#}")),
        }
    }
}

/// Structured view of an exception thrown by script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub name: String,
    pub message: String,
    pub script_name: Option<String>,
    pub line_number: Option<u32>,
    pub start_pos: Option<usize>,
    pub end_pos: Option<usize>,
    pub start_col: Option<u32>,
    pub end_col: Option<u32>,
    pub source_line: Option<String>,
    pub stack_trace: Option<StackTrace>,
}

impl ScriptError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: ErrorKind::from_name(&name),
            name,
            message: message.into(),
            script_name: None,
            line_number: None,
            start_pos: None,
            end_pos: None,
            start_col: None,
            end_col: None,
            source_line: None,
            stack_trace: None,
        }
    }

    pub fn with_stack(mut self, stack: StackTrace) -> Self {
        self.stack_trace = Some(stack);
        self
    }

    /// Frames of the captured stack, empty when none was captured.
    pub fn frames(&self) -> &[crate::stack::Frame] {
        self.stack_trace.as_ref().map(StackTrace::frames).unwrap_or(&[])
    }

    /// Write the original stack text, or the error line when none exists.
    pub fn print_stack_trace(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        match &self.stack_trace {
            Some(trace) => trace.print(sink),
            None => write!(sink, "{}: {}", self.name, self.message),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        if let Some(line) = self.line_number {
            write!(
                f,
                " ( {} @ {} : {} )",
                self.script_name.as_deref().unwrap_or("<anonymous>"),
                line,
                self.start_col.unwrap_or(0)
            )?;
            if let Some(src) = &self.source_line {
                write!(f, "  -> {}", src.trim())?;
            }
        }
        Ok(())
    }
}

impl StdError for ScriptError {}
