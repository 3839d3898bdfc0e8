//! Engine capability and shared types for the otter embedding bridge.
//!
//! This crate is the leaf of the bridge: it names what an engine must
//! provide ([`EngineBackend`], [`BackendIsolate`]), how the engine calls back
//! into host code ([`HostHandler`], [`NativeFunction`]), and the value and
//! error vocabulary both sides share.
//!
//! The [`reference`] module contains an in-process engine that implements the
//! capability with programs registered as host closures. It is what the
//! bridge's tests run against.
//!
//! # Thread Safety
//!
//! Every capability trait is `Send + Sync`. An engine isolate is still
//! single-threaded in spirit: the bridge serializes access to it with its own
//! isolate lock, and backends only need enough internal locking to stay
//! memory safe.

mod backend;
mod error;
pub mod reference;
mod stack;
mod value;

pub use backend::{
    BackendIsolate, EngineBackend, FunctionOrigin, HostHandler, MessageInfo, NativeFunction, ObjectClass, ScriptOrigin,
    Thrown,
};
pub use error::{ErrorKind, HostError, HostErrorKind, ScriptError};
pub use stack::{Frame, StackTrace, parse_stack, parse_stack_lenient, parse_stack_with_header};
pub use value::{ContextId, ObjectId, PropertyKey, ScriptValue, UnitId, number_to_string};

/// Result of a host operation called from script.
pub type HostResult<T> = Result<T, HostError>;
