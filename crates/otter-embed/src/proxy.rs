//! Script-side façade over host objects and host callables.
//!
//! A [`ProxyObject`] is the [`HostHandler`] behind the engine wrapper of one
//! host value. Property access resolves in this order:
//!
//! 1. accessors registered with `define_getter` / `define_setter`
//! 2. a watchpoint on writes, whose return value is what gets stored
//! 3. the synthesized `constructor` / `prototype` objects
//! 4. the host object's own attribute protocol (indexed for array roles)
//! 5. the default methods every host object carries
//!
//! Anything left resolves to `undefined`. Host errors raised on any of these
//! paths reach script through the error bridge.

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::any::Any;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, trace};

use otter_embed_core::{
    BackendIsolate, ErrorKind, HostError, HostHandler, NativeFunction, ObjectClass, ObjectId, PropertyKey,
    ScriptValue, Thrown,
};

use crate::bridge;
use crate::context::{Context, ContextShared};
use crate::host::{HostObjectRef, HostRole};
use crate::identity::IdentityCache;
use crate::marshal;
use crate::value::{HostFunction, Value};

/// The host value behind a proxy.
#[derive(Clone)]
pub enum ProxyTarget {
    Object(HostObjectRef),
    Function(HostFunction),
}

/// An accessor or watchpoint handler.
#[derive(Clone, Debug, PartialEq)]
pub enum Callback {
    /// A script function, kept alive while registered.
    Script(ObjectId),
    Host(HostFunction),
}

#[derive(Clone, Copy)]
enum Hook {
    Getter,
    Setter,
    Watch,
}

#[derive(Default)]
struct HookSet {
    getter: Option<Callback>,
    setter: Option<Callback>,
    watch: Option<Callback>,
}

impl HookSet {
    fn slot(&mut self, hook: Hook) -> &mut Option<Callback> {
        match hook {
            Hook::Getter => &mut self.getter,
            Hook::Setter => &mut self.setter,
            Hook::Watch => &mut self.watch,
        }
    }

    fn get(&self, hook: Hook) -> Option<&Callback> {
        match hook {
            Hook::Getter => self.getter.as_ref(),
            Hook::Setter => self.setter.as_ref(),
            Hook::Watch => self.watch.as_ref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.getter.is_none() && self.setter.is_none() && self.watch.is_none()
    }

    fn into_callbacks(self) -> impl Iterator<Item = Callback> {
        self.getter.into_iter().chain(self.setter).chain(self.watch)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum DefaultMethod {
    HasOwnProperty,
    ToString,
    ToLocaleString,
    ValueOf,
    IsPrototypeOf,
    DefineGetter,
    DefineSetter,
    LookupGetter,
    LookupSetter,
    Watch,
    Unwatch,
}

impl DefaultMethod {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "hasOwnProperty" => Self::HasOwnProperty,
            "toString" => Self::ToString,
            "toLocaleString" => Self::ToLocaleString,
            "valueOf" => Self::ValueOf,
            "isPrototypeOf" => Self::IsPrototypeOf,
            "__defineGetter__" => Self::DefineGetter,
            "__defineSetter__" => Self::DefineSetter,
            "__lookupGetter__" => Self::LookupGetter,
            "__lookupSetter__" => Self::LookupSetter,
            "watch" => Self::Watch,
            "unwatch" => Self::Unwatch,
            _ => return None,
        })
    }
}

/// Handler forwarding script operations on a wrapper to its host value.
pub struct ProxyObject {
    me: Weak<ProxyObject>,
    target: ProxyTarget,
    hooks: Mutex<IndexMap<String, HookSet>>,
    /// Default method functions, created on first read and protected while
    /// the proxy lives.
    methods: Mutex<FxHashMap<DefaultMethod, ObjectId>>,
    /// Keys being written to the wrapper's own storage.
    passthrough: Mutex<FxHashSet<PropertyKey>>,
    context: Weak<ContextShared>,
    backend: Weak<dyn BackendIsolate>,
    wrapper: OnceLock<ObjectId>,
    cache: Weak<Mutex<IdentityCache>>,
    cache_key: usize,
}

impl ProxyObject {
    pub(crate) fn new(ctx: &Context, target: ProxyTarget, cache_key: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            target,
            hooks: Mutex::new(IndexMap::new()),
            methods: Mutex::new(FxHashMap::default()),
            passthrough: Mutex::new(FxHashSet::default()),
            context: ctx.downgrade(),
            backend: Arc::downgrade(ctx.backend()),
            wrapper: OnceLock::new(),
            cache: Arc::downgrade(ctx.cache()),
            cache_key,
        })
    }

    pub(crate) fn bind(&self, wrapper: ObjectId) {
        let _ = self.wrapper.set(wrapper);
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// The host value this proxy stands for.
    pub fn target_value(&self) -> Value {
        match &self.target {
            ProxyTarget::Object(obj) => Value::Host(obj.clone()),
            ProxyTarget::Function(func) => Value::Function(func.clone()),
        }
    }

    /// The engine object wrapping the host value.
    pub fn wrapper(&self) -> Option<ObjectId> {
        self.wrapper.get().copied()
    }

    pub fn class(&self) -> String {
        match &self.target {
            ProxyTarget::Object(obj) => obj.class_name().to_string(),
            ProxyTarget::Function(func) => func.name().to_string(),
        }
    }

    /// Route reads of `name` through `getter`.
    pub fn define_getter(&self, name: &str, getter: HostFunction) {
        self.set_hook(name, Hook::Getter, Some(Callback::Host(getter)));
    }

    /// Route writes of `name` through `setter`.
    pub fn define_setter(&self, name: &str, setter: HostFunction) {
        self.set_hook(name, Hook::Setter, Some(Callback::Host(setter)));
    }

    /// Call `handler(name, old, new)` on every write to `name` and store
    /// what it returns.
    pub fn watch(&self, name: &str, handler: HostFunction) {
        self.set_hook(name, Hook::Watch, Some(Callback::Host(handler)));
    }

    pub fn unwatch(&self, name: &str) {
        self.set_hook(name, Hook::Watch, None);
    }

    pub fn lookup_getter(&self, name: &str) -> Option<Callback> {
        self.hook(name, Hook::Getter)
    }

    pub fn lookup_setter(&self, name: &str) -> Option<Callback> {
        self.hook(name, Hook::Setter)
    }

    /// Names with an accessor or watchpoint, in registration order.
    pub fn hooked_names(&self) -> Vec<String> {
        self.hooks.lock().keys().cloned().collect()
    }

    fn hook(&self, name: &str, hook: Hook) -> Option<Callback> {
        self.hooks.lock().get(name).and_then(|set| set.get(hook).cloned())
    }

    fn set_hook(&self, name: &str, hook: Hook, callback: Option<Callback>) {
        if let Some(Callback::Script(func)) = &callback {
            self.protect(*func);
        }
        let previous = {
            let mut hooks = self.hooks.lock();
            let set = hooks.entry(name.to_string()).or_default();
            let previous = std::mem::replace(set.slot(hook), callback);
            if set.is_empty() {
                hooks.shift_remove(name);
            }
            previous
        };
        if let Some(Callback::Script(func)) = previous {
            self.unprotect(func);
        }
        trace!(class = %self.class(), name, "proxy hook updated");
    }

    fn protect(&self, func: ObjectId) {
        if let Some(backend) = self.backend.upgrade() {
            backend.protect(func);
        }
    }

    fn unprotect(&self, func: ObjectId) {
        if let Some(backend) = self.backend.upgrade() {
            backend.unprotect(func);
        }
    }

    /// The context to act in: the innermost entered context of the isolate,
    /// else the one the wrapper was created in.
    fn context(&self) -> Result<Context, Thrown> {
        match Context::upgrade(&self.context) {
            Some(home) => Ok(home.isolate().current_context().unwrap_or(home)),
            None => Err(Thrown::value(ScriptValue::String(format!(
                "{} object used after its context was disposed",
                self.class()
            )))),
        }
    }

    fn this(&self) -> ScriptValue {
        self.wrapper().map(ScriptValue::Object).unwrap_or_default()
    }

    fn invoke(&self, ctx: &Context, callback: &Callback, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        match callback {
            Callback::Script(func) => ctx.backend().call(ctx.id(), *func, &self.this(), args),
            Callback::Host(func) => {
                let args = marshal::to_host_args(ctx, args);
                let result = func.call(&args).map_err(|e| bridge::to_script_exception(ctx, &e))?;
                to_script(ctx, &result)
            }
        }
    }

    fn host_error(ctx: &Context) -> impl Fn(HostError) -> Thrown + '_ {
        move |e| bridge::to_script_exception(ctx, &e)
    }

    fn native_get(&self, ctx: &Context, obj: &HostObjectRef, key: &PropertyKey) -> Result<Option<ScriptValue>, Thrown> {
        let value = match (obj.role(), key) {
            (HostRole::Array, PropertyKey::Name(n)) if n == "length" => Some(Value::Int(obj.len() as i64)),
            (HostRole::Array, PropertyKey::Index(i)) => obj.get_index(*i as usize).map_err(Self::host_error(ctx))?,
            _ => obj.get(&key.to_string()).map_err(Self::host_error(ctx))?,
        };
        value.map(|v| to_script(ctx, &v)).transpose()
    }

    fn native_set(&self, ctx: &Context, key: &PropertyKey, value: &ScriptValue) -> Result<bool, Thrown> {
        let ProxyTarget::Object(obj) = &self.target else {
            return Ok(false);
        };
        let value = marshal::to_host(ctx, value);
        match (obj.role(), key) {
            (HostRole::Array, PropertyKey::Index(i)) => obj.set_index(*i as usize, value),
            _ => obj.set(&key.to_string(), value),
        }
        .map_err(Self::host_error(ctx))
    }

    /// Write to the wrapper's own storage, bypassing this handler.
    fn store_on_wrapper(&self, ctx: &Context, key: &PropertyKey, value: ScriptValue) -> Result<bool, Thrown> {
        let Some(wrapper) = self.wrapper() else {
            return Ok(false);
        };
        self.passthrough.lock().insert(key.clone());
        let result = ctx.backend().set(ctx.id(), wrapper, key, value);
        self.passthrough.lock().remove(key);
        result.map(|()| true)
    }

    fn synthesize_constructor(&self, ctx: &Context) -> Result<ScriptValue, Thrown> {
        let backend = ctx.backend();
        let class = self.class();
        let text = format!("function {class}() {{\n  [native code]\n}}");
        let to_string: Arc<dyn NativeFunction> =
            Arc::new(move |_this: &ScriptValue, _args: &[ScriptValue]| -> Result<ScriptValue, Thrown> {
                Ok(ScriptValue::String(text.clone()))
            });
        let object = backend.new_object(ctx.id());
        let method = backend.new_function(ctx.id(), "toString", to_string);
        backend.set(ctx.id(), object, &PropertyKey::from("name"), ScriptValue::String(class))?;
        backend.set(ctx.id(), object, &PropertyKey::from("toString"), ScriptValue::Object(method))?;
        Ok(ScriptValue::Object(object))
    }

    fn default_method(&self, ctx: &Context, name: &str) -> Option<ScriptValue> {
        let method = DefaultMethod::from_name(name)?;
        if let Some(func) = self.methods.lock().get(&method) {
            return Some(ScriptValue::Object(*func));
        }
        let proxy = self.me.clone();
        let native: Arc<dyn NativeFunction> =
            Arc::new(move |_this: &ScriptValue, args: &[ScriptValue]| -> Result<ScriptValue, Thrown> {
                match proxy.upgrade() {
                    Some(proxy) => proxy.run_default(method, args),
                    None => Ok(ScriptValue::Undefined),
                }
            });
        let func = ctx.backend().new_function(ctx.id(), name, native);
        self.protect(func);
        self.methods.lock().insert(method, func);
        Some(ScriptValue::Object(func))
    }

    fn run_default(&self, method: DefaultMethod, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        let ctx = self.context()?;
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let name_arg = || ctx.backend().to_display_string(ctx.id(), &arg(0));

        match method {
            DefaultMethod::HasOwnProperty => {
                let key = PropertyKey::parse(&name_arg()?);
                Ok(ScriptValue::Boolean(self.query(&key)?))
            }
            DefaultMethod::ToString | DefaultMethod::ToLocaleString => {
                Ok(ScriptValue::String(format!("[object {}]", self.class())))
            }
            DefaultMethod::ValueOf => Ok(self.this()),
            DefaultMethod::IsPrototypeOf => {
                let backend = ctx.backend();
                let mut current = arg(0).as_object().and_then(|obj| backend.prototype_of(obj));
                while let Some(proto) = current {
                    if Some(proto) == self.wrapper() {
                        return Ok(ScriptValue::Boolean(true));
                    }
                    current = backend.prototype_of(proto);
                }
                Ok(ScriptValue::Boolean(false))
            }
            DefaultMethod::DefineGetter | DefaultMethod::DefineSetter | DefaultMethod::Watch => {
                let name = name_arg()?;
                let func = function_arg(&ctx, &arg(1), &name)?;
                let hook = match method {
                    DefaultMethod::DefineGetter => Hook::Getter,
                    DefaultMethod::DefineSetter => Hook::Setter,
                    _ => Hook::Watch,
                };
                self.set_hook(&name, hook, Some(Callback::Script(func)));
                Ok(ScriptValue::Undefined)
            }
            DefaultMethod::LookupGetter | DefaultMethod::LookupSetter => {
                let hook = match method {
                    DefaultMethod::LookupGetter => Hook::Getter,
                    _ => Hook::Setter,
                };
                match self.hook(&name_arg()?, hook) {
                    Some(Callback::Script(func)) => Ok(ScriptValue::Object(func)),
                    Some(Callback::Host(func)) => to_script(&ctx, &Value::Function(func)),
                    None => Ok(ScriptValue::Undefined),
                }
            }
            DefaultMethod::Unwatch => {
                self.set_hook(&name_arg()?, Hook::Watch, None);
                Ok(ScriptValue::Undefined)
            }
        }
    }
}

fn to_script(ctx: &Context, value: &Value) -> Result<ScriptValue, Thrown> {
    marshal::to_script(ctx, value).map_err(|e| bridge::embed_error_to_thrown(ctx, e))
}

fn function_arg(ctx: &Context, value: &ScriptValue, name: &str) -> Result<ObjectId, Thrown> {
    match value.as_object() {
        Some(func) if ctx.backend().class_of(func) == ObjectClass::Function => Ok(func),
        _ => Err(bridge::script_error(
            ctx,
            ErrorKind::TypeError,
            &format!("handler for '{name}' is not a function"),
        )),
    }
}

impl HostHandler for ProxyObject {
    fn class_name(&self) -> String {
        self.class()
    }

    fn get(&self, key: &PropertyKey) -> Result<Option<ScriptValue>, Thrown> {
        let ctx = self.context()?;
        let name = key.to_string();
        if let Some(getter) = self.hook(&name, Hook::Getter) {
            return self.invoke(&ctx, &getter, &[]).map(Some);
        }

        match &self.target {
            ProxyTarget::Function(func) => {
                if name == "name" {
                    return Ok(Some(ScriptValue::String(func.name().to_string())));
                }
            }
            ProxyTarget::Object(obj) => {
                if name == "constructor" || name == "prototype" {
                    return self.synthesize_constructor(&ctx).map(Some);
                }
                if let Some(value) = self.native_get(&ctx, obj, key)? {
                    return Ok(Some(value));
                }
            }
        }

        Ok(self.default_method(&ctx, &name))
    }

    fn set(&self, key: &PropertyKey, value: ScriptValue) -> Result<bool, Thrown> {
        if self.passthrough.lock().contains(key) {
            return Ok(false);
        }
        let ctx = self.context()?;
        let name = key.to_string();

        if let Some(setter) = self.hook(&name, Hook::Setter) {
            self.invoke(&ctx, &setter, &[value])?;
            return Ok(true);
        }

        let mut value = value;
        let watched = match self.hook(&name, Hook::Watch) {
            Some(watch) => {
                let old = match self.wrapper() {
                    Some(wrapper) => ctx.backend().get(ctx.id(), wrapper, key)?,
                    None => ScriptValue::Undefined,
                };
                value = self.invoke(&ctx, &watch, &[ScriptValue::String(name), old, value])?;
                true
            }
            None => false,
        };

        if self.native_set(&ctx, key, &value)? {
            return Ok(true);
        }
        if watched {
            return self.store_on_wrapper(&ctx, key, value);
        }
        Ok(false)
    }

    fn query(&self, key: &PropertyKey) -> Result<bool, Thrown> {
        if self.hooks.lock().contains_key(&key.to_string()) {
            return Ok(true);
        }
        match &self.target {
            ProxyTarget::Function(_) => Ok(key.as_name() == Some("name")),
            ProxyTarget::Object(obj) => match (obj.role(), key) {
                (HostRole::Array, PropertyKey::Index(i)) => Ok((*i as usize) < obj.len()),
                (HostRole::Array, PropertyKey::Name(n)) if n == "length" => Ok(true),
                _ => {
                    let ctx = self.context()?;
                    obj.has(&key.to_string()).map_err(Self::host_error(&ctx))
                }
            },
        }
    }

    /// Deletes reach the host object even for hooked names; hooks are only
    /// removed by `unwatch` and the accessor API.
    fn delete(&self, key: &PropertyKey) -> Result<Option<bool>, Thrown> {
        let ProxyTarget::Object(obj) = &self.target else {
            return Ok(None);
        };
        let ctx = self.context()?;
        let deleted = match (obj.role(), key) {
            (HostRole::Array, PropertyKey::Index(i)) => obj.delete_index(*i as usize),
            _ => obj.delete(&key.to_string()),
        }
        .map_err(Self::host_error(&ctx))?;
        Ok(deleted.then_some(true))
    }

    fn enumerate(&self) -> Result<Vec<PropertyKey>, Thrown> {
        let mut keys = Vec::new();
        if let ProxyTarget::Object(obj) = &self.target {
            if obj.role() == HostRole::Array {
                keys.extend((0..obj.len()).map(|i| PropertyKey::Index(i as u32)));
            }
            keys.extend(obj.names().into_iter().map(PropertyKey::from));
        }
        for name in self.hooks.lock().keys() {
            let key = PropertyKey::parse(name);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn is_callable(&self) -> bool {
        match &self.target {
            ProxyTarget::Function(_) => true,
            ProxyTarget::Object(obj) => obj.is_callable(),
        }
    }

    fn call(&self, _this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        let ctx = self.context()?;
        let args = marshal::to_host_args(&ctx, args);
        let result = match &self.target {
            ProxyTarget::Function(func) => func.call(&args),
            ProxyTarget::Object(obj) => obj.call(&args),
        }
        .map_err(Self::host_error(&ctx))?;
        to_script(&ctx, &result)
    }

    fn finalize(&self) {
        if let (Some(cache), Some(wrapper)) = (self.cache.upgrade(), self.wrapper()) {
            cache.lock().release(self.cache_key, wrapper);
        }
        debug!(class = %self.class(), "host wrapper finalized");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for ProxyObject {
    fn drop(&mut self) {
        let methods = std::mem::take(&mut *self.methods.lock());
        for func in methods.into_values() {
            self.unprotect(func);
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for callback in hooks.into_values().flat_map(HookSet::into_callbacks) {
            if let Callback::Script(func) = callback {
                self.unprotect(func);
            }
        }
    }
}
