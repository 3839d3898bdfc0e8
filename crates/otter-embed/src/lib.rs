//! otter-embed - host bridge for an external script engine.
//!
//! This crate makes a single-threaded script engine usable from a
//! multi-threaded host: isolate and context lifecycle, a reentrant isolate
//! lock with hand-off between threads, value marshaling with stable host
//! object identity, proxies over host objects, and error translation in both
//! directions with parsed stack traces.
//!
//! The engine itself is consumed through the capability traits in
//! [`otter_embed_core`]. The bundled [`reference`] engine implements them
//! in-process for tests and examples.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use otter_embed::reference::ReferenceEngine;
//! use otter_embed::{Context, EmbedResult, HostObjectRef, Platform, PropertyBag, ScriptValue, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(ReferenceEngine::new());
//! engine.define("version = 2.0", |cx| {
//!     cx.assign("version", 2.0)?;
//!     Ok(ScriptValue::Float(2.0))
//! });
//!
//! let platform = Platform::new(engine);
//! let isolate = platform.new_isolate()?;
//! let bag = Arc::new(PropertyBag::new("Globals").with("version", 1.0));
//! let globals: HostObjectRef = bag.clone();
//!
//! isolate.with(|isolate| -> EmbedResult<()> {
//!     let ctx = Context::new_in(isolate, Some(globals.clone()))?;
//!     assert_eq!(ctx.eval("version = 2.0")?, Value::Float(2.0));
//!     Ok(())
//! })??;
//!
//! assert_eq!(bag.value("version"), Some(Value::Float(2.0)));
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Platform          one backend + BridgeConfig              │
//! └──────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌──────────────────────────────────────────────────────────┐
//! │ Isolate           reentrant lock, per-thread enter stack  │
//! │   └─ Context      global scope, security token, cache     │
//! └──────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌──────────────────────────────────────────────────────────┐
//! │ marshal ⇄ ProxyObject (host → script)                     │
//! │         ⇄ JsObject / JsArray / JsFunction (script → host) │
//! │ bridge    HostError ⇄ script exception ⇄ ScriptError      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! Under [`LockingMode::Shared`] every thread must hold the isolate lock
//! before entering a context or touching script objects. Locking is always
//! explicit: [`Isolate::with`] and [`IsolateScope`] are the scoped forms.
//! Misuse of the lock or enter protocol is a programming error and panics.

pub mod array;
pub mod bridge;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
mod identity;
pub mod isolate;
pub mod locker;
pub mod marshal;
pub mod object;
pub mod platform;
pub mod proxy;
pub mod value;

pub use array::{JsArray, Slice};
pub use bridge::{to_host_error, to_script_exception};
pub use config::{BridgeConfig, CacheScope, LockingMode};
pub use context::{Context, ContextScope};
pub use engine::{Engine, Script};
pub use error::{EmbedError, EmbedResult, ErrorKind, HostError, HostErrorKind, ScriptError};
pub use host::{HostList, HostObject, HostObjectRef, HostRole, PropertyBag};
pub use isolate::{Isolate, IsolateScope};
pub use locker::{Locker, Unlocker};
pub use marshal::{to_host, to_script};
pub use object::{JsFunction, JsObject};
pub use platform::Platform;
pub use proxy::{Callback, ProxyObject, ProxyTarget};
pub use value::{HostFunction, Value};

pub use otter_embed_core::{
    EngineBackend, Frame, FunctionOrigin, HostResult, ObjectClass, ObjectId, PropertyKey,
    ScriptValue, StackTrace, Thrown, parse_stack, reference,
};

pub mod prelude {
    pub use crate::array::{JsArray, Slice};
    pub use crate::config::{BridgeConfig, CacheScope, LockingMode};
    pub use crate::context::Context;
    pub use crate::engine::{Engine, Script};
    pub use crate::error::{EmbedError, EmbedResult, HostError, ScriptError};
    pub use crate::host::{HostObject, HostObjectRef, PropertyBag};
    pub use crate::isolate::Isolate;
    pub use crate::locker::{Locker, Unlocker};
    pub use crate::object::{JsFunction, JsObject};
    pub use crate::platform::Platform;
    pub use crate::value::{HostFunction, Value};
    pub use otter_embed_core::{HostResult, parse_stack};
}
