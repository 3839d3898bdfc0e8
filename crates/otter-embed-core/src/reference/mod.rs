//! In-process reference engine.
//!
//! Implements the engine capability without an interpreter: every script
//! source is registered up front together with a host closure that performs
//! what the script would do, through a [`ProgramScope`]. The object model
//! (ordered properties, sparse arrays, prototype chains, host-intercepted
//! objects, protection and collection) is real, so the bridge can be
//! exercised end to end.
//!
//! ```
//! use otter_embed_core::reference::ReferenceEngine;
//! use otter_embed_core::{EngineBackend, ScriptOrigin, ScriptValue};
//!
//! let engine = ReferenceEngine::new();
//! engine.define("1 + 1", |_| Ok(ScriptValue::Int(2)));
//!
//! let isolate = engine.create_isolate().unwrap();
//! let ctx = isolate.create_context();
//! let unit = isolate.compile(ctx, "1 + 1", &ScriptOrigin::default()).unwrap();
//! assert_eq!(isolate.run(ctx, unit).unwrap(), ScriptValue::Int(2));
//! ```

mod heap;
mod program;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::backend::{
    BackendIsolate, EngineBackend, FunctionOrigin, HostHandler, MessageInfo, NativeFunction, ObjectClass, ScriptOrigin,
    Thrown,
};
use crate::stack::Frame;
use crate::error::ErrorKind;
use crate::value::{ContextId, ObjectId, PropertyKey, ScriptValue, UnitId, number_to_string};

use heap::{Heap, HeapObject, Unit};
pub use program::{ProgramScope, ThrowBuilder};

/// What a registered source does when run.
pub type Program = Arc<dyn Fn(&ProgramScope) -> Result<ScriptValue, Thrown> + Send + Sync>;

type ProgramTable = Arc<RwLock<FxHashMap<String, Program>>>;

/// The reference engine.
pub struct ReferenceEngine {
    programs: ProgramTable,
    isolates: AtomicU64,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            programs: Arc::new(RwLock::new(FxHashMap::default())),
            isolates: AtomicU64::new(0),
        }
    }

    /// Register what `source` does. Sources not registered fail to compile.
    pub fn define<F>(&self, source: impl Into<String>, program: F)
    where
        F: Fn(&ProgramScope) -> Result<ScriptValue, Thrown> + Send + Sync + 'static,
    {
        self.programs.write().insert(source.into(), Arc::new(program));
    }

    /// Number of isolates created so far.
    pub fn isolates_created(&self) -> u64 {
        self.isolates.load(Ordering::Relaxed)
    }
}

impl EngineBackend for ReferenceEngine {
    fn name(&self) -> &str {
        "reference"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn create_isolate(&self) -> Result<Arc<dyn BackendIsolate>, String> {
        let n = self.isolates.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(isolate = n, "reference isolate created");
        let programs = self.programs.clone();
        let isolate: Arc<dyn BackendIsolate> = Arc::new_cyclic(|me| ReferenceIsolate {
            me: me.clone(),
            heap: Mutex::new(Heap::default()),
            frames: Mutex::new(Vec::new()),
            programs,
        });
        Ok(isolate)
    }
}

/// One reference heap.
pub struct ReferenceIsolate {
    me: Weak<ReferenceIsolate>,
    heap: Mutex<Heap>,
    /// Running units and script functions, innermost last.
    frames: Mutex<Vec<Frame>>,
    programs: ProgramTable,
}

/// Pops the frame pushed for a running unit or function.
struct FrameGuard<'a>(&'a Mutex<Vec<Frame>>);

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().pop();
    }
}

impl ReferenceIsolate {
    fn handler_of(&self, obj: ObjectId) -> Option<Arc<dyn HostHandler>> {
        self.heap.lock().handler(obj)
    }

    fn proto_of(&self, obj: ObjectId) -> Option<ObjectId> {
        self.heap.lock().get(obj).and_then(|o| o.proto)
    }

    pub(crate) fn throw_error(&self, ctx: ContextId, kind: ErrorKind, message: &str) -> Thrown {
        let id = self.new_error(ctx, kind, message);
        Thrown {
            exception: ScriptValue::Object(id),
            message: None,
            stack: Some(format!("{}: {}", kind.name(), message)),
        }
    }

    /// Attach a stack string to an existing error object.
    pub(crate) fn set_stack(&self, obj: ObjectId, stack: &str) {
        if let Some(o) = self.heap.lock().get_mut(obj) {
            o.props.insert("stack".into(), ScriptValue::String(stack.to_string()));
        }
    }

    fn push_frame(&self, frame: Frame) -> FrameGuard<'_> {
        self.frames.lock().push(frame);
        FrameGuard(&self.frames)
    }

    /// Frame for a call into a script function, if `func` is one.
    fn function_frame(&self, func: ObjectId) -> Option<Frame> {
        let heap = self.heap.lock();
        let obj = heap.get(func)?;
        let origin = obj.origin.as_ref()?;
        let name = match obj.name.as_str() {
            "" => origin.inferred_name.clone(),
            name => Some(name.to_string()),
        };
        Some(Frame {
            function_name: name,
            script_name: Some(origin.resource_name.clone().unwrap_or_else(|| "<anonymous>".to_string())),
            line_number: Some(origin.line_number + 1),
            column_number: Some(origin.column_number + 1),
            is_eval: false,
            is_constructor: false,
        })
    }

    pub(crate) fn set_origin(&self, func: ObjectId, origin: FunctionOrigin) {
        if let Some(o) = self.heap.lock().get_mut(func) {
            o.origin = Some(origin);
        }
    }

    /// Name an anonymous script function after the variable it is assigned to.
    pub(crate) fn infer_name(&self, value: &ScriptValue, name: &str) {
        let Some(func) = value.as_object() else { return };
        let mut heap = self.heap.lock();
        let Some(o) = heap.get_mut(func) else { return };
        if let Some(origin) = o.origin.as_mut() {
            if o.name.is_empty() && origin.inferred_name.is_none() {
                origin.inferred_name = Some(name.to_string());
            }
        }
    }

    fn callable(&self, func: ObjectId) -> Option<Callable> {
        let heap = self.heap.lock();
        let obj = heap.get(func)?;
        if let Some(f) = &obj.function {
            return Some(Callable::Native(f.clone()));
        }
        match &obj.handler {
            Some(h) if h.is_callable() => Some(Callable::Host(h.clone())),
            _ => None,
        }
    }

    fn describe(&self, ctx: ContextId, value: &ScriptValue) -> String {
        self.to_display_string(ctx, value)
            .unwrap_or_else(|_| value.type_name().to_string())
    }

    fn write_own(&self, obj: ObjectId, key: &PropertyKey, value: ScriptValue) {
        if let Some(o) = self.heap.lock().get_mut(obj) {
            o.write(key, value);
        }
    }
}

enum Callable {
    Native(Arc<dyn NativeFunction>),
    Host(Arc<dyn HostHandler>),
}

impl BackendIsolate for ReferenceIsolate {
    fn create_context(&self) -> ContextId {
        let ctx = self.heap.lock().new_context();
        trace!(context = ctx.0, "context created");
        ctx
    }

    fn dispose_context(&self, ctx: ContextId) {
        self.heap.lock().contexts.remove(&ctx);
        trace!(context = ctx.0, "context disposed");
    }

    fn global(&self, ctx: ContextId) -> ObjectId {
        let mut heap = self.heap.lock();
        match heap.contexts.get(&ctx) {
            Some(global) => *global,
            // A disposed context still answers with a fresh, detached global.
            None => heap.alloc(HeapObject::new(ObjectClass::Object, ctx)),
        }
    }

    fn prototype_of(&self, obj: ObjectId) -> Option<ObjectId> {
        self.proto_of(obj)
    }

    fn set_prototype(&self, obj: ObjectId, proto: Option<ObjectId>) {
        if let Some(o) = self.heap.lock().get_mut(obj) {
            o.proto = proto;
        }
    }

    fn compile(&self, ctx: ContextId, source: &str, origin: &ScriptOrigin) -> Result<UnitId, Thrown> {
        let program = self.programs.read().get(source).cloned();
        match program {
            Some(program) => {
                let unit = self.heap.lock().add_unit(Unit {
                    source: source.to_string(),
                    origin: origin.clone(),
                    program,
                });
                trace!(unit = unit.0, "compiled");
                Ok(unit)
            }
            None => {
                let mut thrown = self.throw_error(ctx, ErrorKind::SyntaxError, "Unexpected token");
                let first_line = source.lines().next().unwrap_or_default();
                thrown.message = Some(MessageInfo {
                    script_name: origin.name.clone(),
                    line_number: Some(origin.line_offset + 1),
                    start_pos: Some(0),
                    end_pos: Some(first_line.chars().count()),
                    start_col: Some(origin.column_offset),
                    end_col: Some(origin.column_offset + first_line.chars().count() as u32),
                    source_line: Some(first_line.to_string()),
                });
                Err(thrown)
            }
        }
    }

    fn run(&self, ctx: ContextId, unit: UnitId) -> Result<ScriptValue, Thrown> {
        let unit = self.heap.lock().units.get(&unit).cloned();
        let (Some(unit), Some(isolate)) = (unit, self.me.upgrade()) else {
            return Err(self.throw_error(ctx, ErrorKind::Error, "script unit was released"));
        };
        let origin = &unit.origin;
        let _frame = self.push_frame(Frame {
            function_name: None,
            script_name: Some(origin.name.clone().unwrap_or_else(|| "<anonymous>".to_string())),
            line_number: Some(origin.line_offset + 1),
            column_number: Some(origin.column_offset + 1),
            is_eval: false,
            is_constructor: false,
        });
        let scope = ProgramScope::new(isolate, ctx, unit.clone());
        (unit.program)(&scope)
    }

    fn release_unit(&self, unit: UnitId) {
        self.heap.lock().units.remove(&unit);
    }

    fn class_of(&self, obj: ObjectId) -> ObjectClass {
        let heap = self.heap.lock();
        match heap.get(obj) {
            Some(o) => match &o.handler {
                Some(h) if h.is_callable() => ObjectClass::Function,
                _ => o.class,
            },
            None => ObjectClass::Object,
        }
    }

    fn creation_context(&self, obj: ObjectId) -> ContextId {
        self.heap.lock().get(obj).map(|o| o.context).unwrap_or(ContextId(0))
    }

    fn get(&self, _ctx: ContextId, obj: ObjectId, key: &PropertyKey) -> Result<ScriptValue, Thrown> {
        let mut current = Some(obj);
        while let Some(id) = current {
            if let Some(handler) = self.handler_of(id) {
                if let Some(value) = handler.get(key)? {
                    return Ok(value);
                }
            }
            let heap = self.heap.lock();
            let Some(o) = heap.get(id) else { break };
            if let Some(value) = o.own(key) {
                return Ok(value);
            }
            current = o.proto;
        }
        Ok(ScriptValue::Undefined)
    }

    fn set(&self, _ctx: ContextId, obj: ObjectId, key: &PropertyKey, value: ScriptValue) -> Result<(), Thrown> {
        if let Some(handler) = self.handler_of(obj) {
            if handler.set(key, value.clone())? {
                return Ok(());
            }
        }

        let (own, mut proto) = {
            let heap = self.heap.lock();
            match heap.get(obj) {
                Some(o) => (o.has_own(key), o.proto),
                None => return Ok(()),
            }
        };

        if !own {
            // A host object up the chain that claims the name receives the write.
            while let Some(p) = proto {
                if let Some(handler) = self.handler_of(p) {
                    if handler.query(key)? && handler.set(key, value.clone())? {
                        return Ok(());
                    }
                }
                let heap = self.heap.lock();
                match heap.get(p) {
                    Some(o) if o.has_own(key) => break,
                    Some(o) => proto = o.proto,
                    None => break,
                }
            }
        }

        self.write_own(obj, key, value);
        Ok(())
    }

    fn has(&self, _ctx: ContextId, obj: ObjectId, key: &PropertyKey) -> Result<bool, Thrown> {
        let mut current = Some(obj);
        while let Some(id) = current {
            if let Some(handler) = self.handler_of(id) {
                if handler.query(key)? {
                    return Ok(true);
                }
            }
            let heap = self.heap.lock();
            let Some(o) = heap.get(id) else { break };
            if o.has_own(key) {
                return Ok(true);
            }
            current = o.proto;
        }
        Ok(false)
    }

    fn delete(&self, _ctx: ContextId, obj: ObjectId, key: &PropertyKey) -> Result<bool, Thrown> {
        if let Some(handler) = self.handler_of(obj) {
            if let Some(deleted) = handler.delete(key)? {
                return Ok(deleted);
            }
        }
        Ok(self.heap.lock().get_mut(obj).map(|o| o.remove(key)).unwrap_or(true))
    }

    fn keys(&self, _ctx: ContextId, obj: ObjectId) -> Result<Vec<PropertyKey>, Thrown> {
        let mut keys = match self.handler_of(obj) {
            Some(handler) => handler.enumerate()?,
            None => Vec::new(),
        };
        if let Some(o) = self.heap.lock().get(obj) {
            for key in o.own_keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn array_length(&self, obj: ObjectId) -> u32 {
        self.heap.lock().get(obj).map(|o| o.length).unwrap_or(0)
    }

    fn set_array_length(&self, obj: ObjectId, len: u32) {
        if let Some(o) = self.heap.lock().get_mut(obj) {
            o.truncate(len);
        }
    }

    fn call(&self, ctx: ContextId, func: ObjectId, this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        let _frame = self.function_frame(func).map(|frame| self.push_frame(frame));
        match self.callable(func) {
            Some(Callable::Native(f)) => f.call(this, args),
            Some(Callable::Host(h)) => h.call(this, args),
            None => {
                let what = self.describe(ctx, &ScriptValue::Object(func));
                Err(self.throw_error(ctx, ErrorKind::TypeError, &format!("{what} is not a function")))
            }
        }
    }

    fn construct(&self, ctx: ContextId, func: ObjectId, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        if self.callable(func).is_none() {
            let what = self.describe(ctx, &ScriptValue::Object(func));
            return Err(self.throw_error(ctx, ErrorKind::TypeError, &format!("{what} is not a constructor")));
        }
        let proto = self.get(ctx, func, &PropertyKey::from("prototype"))?.as_object();
        let instance = self.new_object(ctx);
        self.set_prototype(instance, proto);
        let this = ScriptValue::Object(instance);
        match self.call(ctx, func, &this, args)? {
            result @ ScriptValue::Object(_) => Ok(result),
            _ => Ok(this),
        }
    }

    fn new_object(&self, ctx: ContextId) -> ObjectId {
        self.heap.lock().alloc(HeapObject::new(ObjectClass::Object, ctx))
    }

    fn new_array(&self, ctx: ContextId, len: u32) -> ObjectId {
        let mut array = HeapObject::new(ObjectClass::Array, ctx);
        array.length = len;
        self.heap.lock().alloc(array)
    }

    fn new_function(&self, ctx: ContextId, name: &str, func: Arc<dyn NativeFunction>) -> ObjectId {
        let mut function = HeapObject::new(ObjectClass::Function, ctx);
        function.name = name.to_string();
        function.function = Some(func);
        self.heap.lock().alloc(function)
    }

    fn new_error(&self, ctx: ContextId, kind: ErrorKind, message: &str) -> ObjectId {
        let mut error = HeapObject::new(ObjectClass::Error, ctx);
        error.name = kind.name().to_string();
        error.props.insert("name".into(), ScriptValue::String(kind.name().into()));
        error.props.insert("message".into(), ScriptValue::String(message.into()));
        error
            .props
            .insert("stack".into(), ScriptValue::String(format!("{}: {}", kind.name(), message)));
        self.heap.lock().alloc(error)
    }

    fn new_host_object(&self, ctx: ContextId, handler: Arc<dyn HostHandler>) -> ObjectId {
        let mut object = HeapObject::new(ObjectClass::Host, ctx);
        object.name = handler.class_name();
        object.handler = Some(handler);
        self.heap.lock().alloc(object)
    }

    fn host_handler(&self, obj: ObjectId) -> Option<Arc<dyn HostHandler>> {
        self.handler_of(obj)
    }

    fn clone_object(&self, _ctx: ContextId, obj: ObjectId) -> Option<ObjectId> {
        let mut heap = self.heap.lock();
        let copy = {
            let source = heap.get(obj)?;
            if source.handler.is_some() || !matches!(source.class, ObjectClass::Object | ObjectClass::Array) {
                return None;
            }
            let mut copy = HeapObject::new(source.class, source.context);
            copy.props = source.props.clone();
            copy.elements = source.elements.clone();
            copy.length = source.length;
            copy.proto = source.proto;
            copy
        };
        Some(heap.alloc(copy))
    }

    fn function_origin(&self, func: ObjectId) -> Option<FunctionOrigin> {
        self.heap.lock().get(func).and_then(|o| o.origin.clone())
    }

    fn set_function_name(&self, func: ObjectId, name: &str) {
        let mut heap = self.heap.lock();
        if let Some(o) = heap.get_mut(func) {
            if o.class == ObjectClass::Function {
                o.name = name.to_string();
                o.props.shift_remove("name");
            }
        }
    }

    fn current_stack_trace(&self, limit: usize) -> Vec<Frame> {
        self.frames.lock().iter().rev().take(limit).cloned().collect()
    }

    fn to_display_string(&self, ctx: ContextId, value: &ScriptValue) -> Result<String, Thrown> {
        let id = match value {
            ScriptValue::Undefined => return Ok("undefined".into()),
            ScriptValue::Null => return Ok("null".into()),
            ScriptValue::Boolean(b) => return Ok(b.to_string()),
            ScriptValue::Int(i) => return Ok(i.to_string()),
            ScriptValue::Float(f) | ScriptValue::Date(f) => return Ok(number_to_string(*f)),
            ScriptValue::String(s) => return Ok(s.clone()),
            ScriptValue::Object(id) => *id,
        };

        let class = self.class_of(id);
        if class != ObjectClass::Function {
            if let ScriptValue::Object(method) = self.get(ctx, id, &PropertyKey::from("toString"))? {
                if self.callable(method).is_some() {
                    let result = self.call(ctx, method, value, &[])?;
                    if result.as_object().is_none() {
                        return self.to_display_string(ctx, &result);
                    }
                }
            }
        }

        match class {
            ObjectClass::Array => {
                let len = self.array_length(id);
                let mut parts = Vec::with_capacity(len as usize);
                for i in 0..len {
                    let item = self.get(ctx, id, &PropertyKey::Index(i))?;
                    parts.push(if item.is_nullish() {
                        String::new()
                    } else {
                        self.to_display_string(ctx, &item)?
                    });
                }
                Ok(parts.join(","))
            }
            ObjectClass::Error => {
                let name = self.get(ctx, id, &PropertyKey::from("name"))?;
                let message = self.get(ctx, id, &PropertyKey::from("message"))?;
                let name = self.to_display_string(ctx, &name)?;
                let message = self.to_display_string(ctx, &message)?;
                Ok(if message.is_empty() { name } else { format!("{name}: {message}") })
            }
            ObjectClass::Function => {
                let name = self.heap.lock().get(id).map(|o| o.name.clone()).unwrap_or_default();
                Ok(format!("function {name}() {{ [native code] }}"))
            }
            ObjectClass::Host => {
                let name = self.heap.lock().get(id).map(|o| o.name.clone()).unwrap_or_default();
                Ok(format!("[object {name}]"))
            }
            ObjectClass::Object => Ok("[object Object]".into()),
        }
    }

    fn protect(&self, obj: ObjectId) {
        *self.heap.lock().protected.entry(obj).or_insert(0) += 1;
    }

    fn unprotect(&self, obj: ObjectId) {
        let mut heap = self.heap.lock();
        if let Some(count) = heap.protected.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                heap.protected.remove(&obj);
            }
        }
    }

    fn collect_garbage(&self) {
        let finalized = self.heap.lock().sweep();
        debug!(finalized = finalized.len(), "reference heap swept");
        for handler in finalized {
            handler.finalize();
        }
    }
}
