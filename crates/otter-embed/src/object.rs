//! Live handles to script objects.
//!
//! A [`JsObject`] keeps its engine object alive for as long as the handle
//! exists. Operations go through the owning context and require the isolate
//! lock under shared locking.

use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use otter_embed_core::{
    BackendIsolate, ContextId, FunctionOrigin, ObjectClass, ObjectId, PropertyKey, ScriptValue, Thrown,
};

use crate::array::JsArray;
use crate::bridge;
use crate::context::Context;
use crate::error::{EmbedError, EmbedResult};
use crate::marshal;
use crate::value::Value;

/// A script object held by host code.
pub struct JsObject {
    context: Context,
    id: ObjectId,
}

impl JsObject {
    pub(crate) fn new(context: Context, id: ObjectId) -> Self {
        context.backend().protect(id);
        Self { context, id }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The context this handle was obtained through.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn engine<R>(
        &self,
        op: impl FnOnce(&dyn BackendIsolate, ContextId) -> Result<R, Thrown>,
    ) -> EmbedResult<R> {
        let isolate = self.context.isolate();
        isolate.ensure_locked();
        let _call = isolate.begin_call();
        op(self.context.backend().as_ref(), self.context.id())
            .map_err(|thrown| bridge::to_host_error(&self.context, thrown))
    }

    pub fn get(&self, key: impl Into<PropertyKey>) -> EmbedResult<Value> {
        let key = key.into();
        let value = self.engine(|backend, ctx| backend.get(ctx, self.id, &key))?;
        Ok(marshal::to_host(&self.context, &value))
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> EmbedResult<()> {
        let key = key.into();
        let value = marshal::to_script(&self.context, &value.into())?;
        self.engine(|backend, ctx| backend.set(ctx, self.id, &key, value))
    }

    pub fn has(&self, key: impl Into<PropertyKey>) -> EmbedResult<bool> {
        let key = key.into();
        self.engine(|backend, ctx| backend.has(ctx, self.id, &key))
    }

    pub fn delete(&self, key: impl Into<PropertyKey>) -> EmbedResult<bool> {
        let key = key.into();
        self.engine(|backend, ctx| backend.delete(ctx, self.id, &key))
    }

    /// Enumerable keys in engine order.
    pub fn keys(&self) -> EmbedResult<Vec<String>> {
        let keys = self.engine(|backend, ctx| backend.keys(ctx, self.id))?;
        Ok(keys.into_iter().map(|k| k.to_string()).collect())
    }

    pub fn class(&self) -> ObjectClass {
        self.context.backend().class_of(self.id)
    }

    pub fn is_array(&self) -> bool {
        self.class() == ObjectClass::Array
    }

    pub fn is_function(&self) -> bool {
        self.class() == ObjectClass::Function
    }

    pub fn as_array(&self) -> Option<JsArray> {
        self.is_array().then(|| JsArray::from_object(self.clone()))
    }

    pub fn as_function(&self) -> Option<JsFunction> {
        self.is_function().then(|| JsFunction { object: self.clone() })
    }

    /// Script `String(obj)`.
    pub fn to_display_string(&self) -> EmbedResult<String> {
        let this = ScriptValue::Object(self.id);
        self.engine(|backend, ctx| backend.to_display_string(ctx, &this))
    }

    /// Context the object was created in, if it is still alive.
    pub fn creation_context(&self) -> Option<Context> {
        let id = self.context.backend().creation_context(self.id);
        self.context.isolate().context_by_id(id)
    }

    /// `obj[name](...args)`.
    pub fn call_method(&self, name: &str, args: &[Value]) -> EmbedResult<Value> {
        match self.get(name)?.as_function() {
            Some(func) => func.apply(&Value::Script(self.clone()), args),
            None => Err(EmbedError::marshal(
                format!("{self:?}.{name}"),
                "property is not a function",
            )),
        }
    }

    /// Shallow copy in the engine: a new object with the same own properties
    /// and prototype. Functions and host-backed objects cannot be copied.
    pub fn clone_object(&self) -> EmbedResult<JsObject> {
        self.context.isolate().ensure_locked();
        match self.context.backend().clone_object(self.context.id(), self.id) {
            Some(copy) => Ok(JsObject::new(self.context.clone(), copy)),
            None => Err(EmbedError::marshal(format!("{self:?}"), "object cannot be cloned")),
        }
    }

    /// Deep copy into plain host data. Arrays become lists and plain objects
    /// become maps; functions and host values stay by reference.
    pub fn to_value(&self) -> EmbedResult<Value> {
        self.to_value_at(0)
    }

    fn to_value_at(&self, depth: usize) -> EmbedResult<Value> {
        let limit = self.context.isolate().config().max_marshal_depth;
        if depth >= limit {
            return Err(EmbedError::marshal(
                format!("{self:?}"),
                format!("nested deeper than {limit} levels"),
            ));
        }
        let copy = |value: Value| match value {
            Value::Script(obj) if matches!(obj.class(), ObjectClass::Array | ObjectClass::Object) => {
                obj.to_value_at(depth + 1)
            }
            other => Ok(other),
        };

        match self.class() {
            ObjectClass::Array => {
                let len = self.context.backend().array_length(self.id);
                let mut items = Vec::with_capacity(len as usize);
                for i in 0..len {
                    items.push(copy(self.get(i)?)?);
                }
                Ok(Value::Array(items))
            }
            ObjectClass::Object => {
                let mut map = IndexMap::new();
                for key in self.keys()? {
                    let value = copy(self.get(key.as_str())?)?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
            _ => Ok(Value::Script(self.clone())),
        }
    }
}

impl Clone for JsObject {
    fn clone(&self) -> Self {
        Self::new(self.context.clone(), self.id)
    }
}

impl Drop for JsObject {
    fn drop(&mut self) {
        self.context.backend().unprotect(self.id);
    }
}

impl PartialEq for JsObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.context.isolate() == other.context.isolate()
    }
}

impl Eq for JsObject {}

impl Hash for JsObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.context.isolate().id().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsObject({})", self.id)
    }
}

/// A callable script object.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JsFunction {
    object: JsObject,
}

impl JsFunction {
    pub fn into_object(self) -> JsObject {
        self.object
    }

    /// Call with `this` undefined.
    pub fn call(&self, args: &[Value]) -> EmbedResult<Value> {
        self.apply(&Value::Undefined, args)
    }

    /// Call with an explicit receiver.
    ///
    /// A receiver from a context whose security token differs from the
    /// function's context is rejected.
    pub fn apply(&self, this: &Value, args: &[Value]) -> EmbedResult<Value> {
        if let Value::Script(receiver) = this {
            if let (Some(own), Some(other)) = (self.creation_context(), receiver.creation_context()) {
                if own.security_token() != other.security_token() {
                    return Err(EmbedError::security(format!(
                        "function from context {} applied to an object of context {}",
                        own.id().0,
                        other.id().0
                    )));
                }
            }
        }

        let ctx = &self.object.context;
        let this = marshal::to_script(ctx, this)?;
        let args = marshal::to_script_args(ctx, args)?;
        let result = self.engine(|backend, c| backend.call(c, self.id(), &this, &args))?;
        Ok(marshal::to_host(ctx, &result))
    }

    /// `new f(...args)`.
    pub fn construct(&self, args: &[Value]) -> EmbedResult<Value> {
        let ctx = &self.object.context;
        let args = marshal::to_script_args(ctx, args)?;
        let result = self.engine(|backend, c| backend.construct(c, self.id(), &args))?;
        Ok(marshal::to_host(ctx, &result))
    }

    /// Construct and then assign `props` on the new instance.
    pub fn create<I, K>(&self, args: &[Value], props: I) -> EmbedResult<Value>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<PropertyKey>,
    {
        let instance = self.construct(args)?;
        if let Some(obj) = instance.as_script() {
            for (key, value) in props {
                obj.set(key, value)?;
            }
        }
        Ok(instance)
    }

    /// Where the function was defined; `None` for native functions.
    pub fn origin(&self) -> Option<FunctionOrigin> {
        self.object.context.isolate().ensure_locked();
        self.object.context.backend().function_origin(self.id())
    }

    pub fn set_name(&self, name: &str) {
        self.object.context.isolate().ensure_locked();
        self.object.context.backend().set_function_name(self.id(), name);
    }

    pub fn name(&self) -> EmbedResult<String> {
        match self.get("name")? {
            Value::String(name) => Ok(name),
            Value::Undefined => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

impl Deref for JsFunction {
    type Target = JsObject;

    fn deref(&self) -> &JsObject {
        &self.object
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsFunction({})", self.object.id)
    }
}
