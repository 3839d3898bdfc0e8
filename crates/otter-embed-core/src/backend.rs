//! Engine capability traits.
//!
//! The bridge never talks to a concrete engine. It drives any engine that
//! implements [`EngineBackend`] and [`BackendIsolate`], and hands the engine
//! [`HostHandler`]s and [`NativeFunction`]s to call back into host code.
//!
//! All methods take `&self`. Implementations must not hold internal locks
//! while invoking a handler or native function: callbacks re-enter the
//! isolate.

use std::any::Any;
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::stack::Frame;
use crate::value::{ContextId, ObjectId, PropertyKey, ScriptValue, UnitId};

/// Where a script came from, for locations in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOrigin {
    pub name: Option<String>,
    /// Added to every reported line number.
    pub line_offset: u32,
    /// Added to columns on the first line.
    pub column_offset: u32,
}

impl ScriptOrigin {
    pub fn new(name: Option<&str>, line_offset: u32, column_offset: u32) -> Self {
        Self {
            name: name.map(str::to_string),
            line_offset,
            column_offset,
        }
    }
}

/// Where a script function was defined.
///
/// Line and column are zero-based and include the offsets of the script's
/// [`ScriptOrigin`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionOrigin {
    pub resource_name: Option<String>,
    pub line_number: u32,
    pub column_number: u32,
    pub line_offset: u32,
    pub column_offset: u32,
    /// Name taken from the assignment that created an anonymous function.
    pub inferred_name: Option<String>,
}

/// Location information attached to a thrown exception.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageInfo {
    pub script_name: Option<String>,
    pub line_number: Option<u32>,
    pub start_pos: Option<usize>,
    pub end_pos: Option<usize>,
    pub start_col: Option<u32>,
    pub end_col: Option<u32>,
    pub source_line: Option<String>,
}

/// An exception in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Thrown {
    pub exception: ScriptValue,
    pub message: Option<MessageInfo>,
    pub stack: Option<String>,
}

impl Thrown {
    /// A bare exception with no location or stack.
    pub fn value(exception: ScriptValue) -> Self {
        Self {
            exception,
            message: None,
            stack: None,
        }
    }
}

/// Engine-side class of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Object,
    Array,
    Function,
    Error,
    /// Intercepted by a [`HostHandler`] that is not callable.
    Host,
}

/// A host function the engine can call.
pub trait NativeFunction: Send + Sync {
    fn call(&self, this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown>;
}

impl<F> NativeFunction for F
where
    F: Fn(&ScriptValue, &[ScriptValue]) -> Result<ScriptValue, Thrown> + Send + Sync,
{
    fn call(&self, this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        self(this, args)
    }
}

/// Interceptor for a host-backed engine object.
///
/// `get` returning `Ok(None)` and `set` returning `Ok(false)` mean "not
/// intercepted": the engine falls back to the wrapper's own storage.
pub trait HostHandler: Send + Sync + 'static {
    /// Class name reported by the object.
    fn class_name(&self) -> String;

    fn get(&self, key: &PropertyKey) -> Result<Option<ScriptValue>, Thrown>;

    fn set(&self, key: &PropertyKey, value: ScriptValue) -> Result<bool, Thrown>;

    /// Whether the object claims `key`, used to route prototype-chain writes.
    fn query(&self, key: &PropertyKey) -> Result<bool, Thrown>;

    /// `Ok(None)` when deletion is not intercepted.
    fn delete(&self, key: &PropertyKey) -> Result<Option<bool>, Thrown>;

    fn enumerate(&self) -> Result<Vec<PropertyKey>, Thrown>;

    fn is_callable(&self) -> bool {
        false
    }

    fn call(&self, this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown>;

    /// The engine discarded the wrapper object.
    fn finalize(&self) {}

    fn as_any(&self) -> &dyn Any;
}

/// An engine implementation.
pub trait EngineBackend: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// One-time process setup.
    fn initialize(&self) {}

    /// Process teardown.
    fn shutdown(&self) {}

    fn create_isolate(&self) -> Result<Arc<dyn BackendIsolate>, String>;
}

/// One engine instance with its own heap.
pub trait BackendIsolate: Send + Sync {
    fn create_context(&self) -> ContextId;

    fn dispose_context(&self, ctx: ContextId);

    /// The context's global object.
    fn global(&self, ctx: ContextId) -> ObjectId;

    fn prototype_of(&self, obj: ObjectId) -> Option<ObjectId>;

    fn set_prototype(&self, obj: ObjectId, proto: Option<ObjectId>);

    /// Compile source. Syntax faults come back as a thrown SyntaxError.
    fn compile(&self, ctx: ContextId, source: &str, origin: &ScriptOrigin) -> Result<UnitId, Thrown>;

    fn run(&self, ctx: ContextId, unit: UnitId) -> Result<ScriptValue, Thrown>;

    fn release_unit(&self, unit: UnitId);

    fn class_of(&self, obj: ObjectId) -> ObjectClass;

    /// Context the object was created in.
    fn creation_context(&self, obj: ObjectId) -> ContextId;

    fn get(&self, ctx: ContextId, obj: ObjectId, key: &PropertyKey) -> Result<ScriptValue, Thrown>;

    fn set(&self, ctx: ContextId, obj: ObjectId, key: &PropertyKey, value: ScriptValue) -> Result<(), Thrown>;

    fn has(&self, ctx: ContextId, obj: ObjectId, key: &PropertyKey) -> Result<bool, Thrown>;

    fn delete(&self, ctx: ContextId, obj: ObjectId, key: &PropertyKey) -> Result<bool, Thrown>;

    /// Enumerable keys in engine order.
    fn keys(&self, ctx: ContextId, obj: ObjectId) -> Result<Vec<PropertyKey>, Thrown>;

    fn array_length(&self, obj: ObjectId) -> u32;

    /// Truncate or extend an array. Extension leaves holes.
    fn set_array_length(&self, obj: ObjectId, len: u32);

    fn call(&self, ctx: ContextId, func: ObjectId, this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown>;

    fn construct(&self, ctx: ContextId, func: ObjectId, args: &[ScriptValue]) -> Result<ScriptValue, Thrown>;

    fn new_object(&self, ctx: ContextId) -> ObjectId;

    fn new_array(&self, ctx: ContextId, len: u32) -> ObjectId;

    fn new_function(&self, ctx: ContextId, name: &str, func: Arc<dyn NativeFunction>) -> ObjectId;

    fn new_error(&self, ctx: ContextId, kind: ErrorKind, message: &str) -> ObjectId;

    fn new_host_object(&self, ctx: ContextId, handler: Arc<dyn HostHandler>) -> ObjectId;

    /// Shallow copy of an ordinary object or array: own properties and the
    /// prototype. `None` for functions and host-backed objects.
    fn clone_object(&self, ctx: ContextId, obj: ObjectId) -> Option<ObjectId>;

    /// Definition site of a script function. Native and host functions have
    /// none.
    fn function_origin(&self, _func: ObjectId) -> Option<FunctionOrigin> {
        None
    }

    fn set_function_name(&self, func: ObjectId, name: &str);

    /// Frames of the script currently running, innermost first, at most
    /// `limit` of them.
    fn current_stack_trace(&self, _limit: usize) -> Vec<Frame> {
        Vec::new()
    }

    /// The handler behind a host-backed object.
    fn host_handler(&self, obj: ObjectId) -> Option<Arc<dyn HostHandler>>;

    /// Script `String(value)`.
    fn to_display_string(&self, ctx: ContextId, value: &ScriptValue) -> Result<String, Thrown>;

    /// Keep `obj` alive while the host holds it.
    fn protect(&self, obj: ObjectId);

    fn unprotect(&self, obj: ObjectId);

    /// Reclaim unreachable objects, finalizing host wrappers.
    fn collect_garbage(&self) {}
}
