//! Host-side values.
//!
//! [`Value`] is what host code sends into and receives from script. Plain
//! data (primitives, lists, maps, dates) is copied across the boundary;
//! host callables and host objects cross by reference through proxies; script
//! objects come back as live handles.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use otter_embed_core::{HostResult, number_to_string};

use crate::array::JsArray;
use crate::host::{HostObject, HostObjectRef};
use crate::object::{JsFunction, JsObject};

type HostFn = dyn Fn(&[Value]) -> HostResult<Value> + Send + Sync;

/// A host function callable from script.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> HostResult<Value> {
        (self.func)(args)
    }

    /// Identity of the underlying closure.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.func) as *const u8 as usize
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction({})", self.name)
    }
}

/// A value on the host side of the boundary.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Function(HostFunction),
    Host(HostObjectRef),
    Script(JsObject),
}

pub(crate) fn host_identity(obj: &HostObjectRef) -> usize {
    Arc::as_ptr(obj) as *const u8 as usize
}

impl Value {
    /// Wrap a host object.
    pub fn host<T: HostObject>(obj: T) -> Self {
        Value::Host(Arc::new(obj))
    }

    pub fn function<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        Value::Function(HostFunction::new(name, func))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Script truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_script(&self) -> Option<&JsObject> {
        match self {
            Value::Script(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<JsArray> {
        self.as_script().and_then(JsObject::as_array)
    }

    pub fn as_function(&self) -> Option<JsFunction> {
        self.as_script().and_then(JsObject::as_function)
    }

    pub fn as_host(&self) -> Option<&HostObjectRef> {
        match self {
            Value::Host(obj) => Some(obj),
            _ => None,
        }
    }

    /// Borrow a host object as its concrete type.
    pub fn downcast_host<T: HostObject>(&self) -> Option<&T> {
        self.as_host().and_then(|obj| obj.as_any().downcast_ref::<T>())
    }

    /// JSON view of plain data. Callables and host objects become null.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Host(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.to_rfc3339()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Value::Script(obj) => obj.to_value().map(|v| v.to_json()).unwrap_or(Json::Null),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => self.as_f64() == other.as_f64(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => host_identity(a) == host_identity(b),
            (Value::Script(a), Value::Script(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Value::Function(func) => write!(f, "{func:?}"),
            Value::Host(obj) => write!(f, "Host({})", obj.class_name()),
            Value::Script(obj) => write!(f, "{obj:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&number_to_string(*x)),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !matches!(item, Value::Undefined | Value::Null) {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
            Value::Host(obj) => write!(f, "[object {}]", obj.class_name()),
            Value::Script(obj) => match obj.to_display_string() {
                Ok(s) => f.write_str(&s),
                Err(_) => f.write_str("[object Object]"),
            },
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    &str => String,
    String => String,
    DateTime<Utc> => Date,
    Vec<Value> => Array,
    IndexMap<String, Value> => Object,
    HostFunction => Function,
    HostObjectRef => Host,
    JsObject => Script,
}

impl From<JsArray> for Value {
    fn from(array: JsArray) -> Self {
        Value::Script(array.into_object())
    }
}

impl From<JsFunction> for Value {
    fn from(func: JsFunction) -> Self {
        Value::Script(func.into_object())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_and_undefined_are_distinct() {
        assert_ne!(Value::Null, Value::Undefined);
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Undefined.is_truthy());
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Undefined.to_string(), "undefined");
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
        assert_eq!(Value::Float(2.0).to_string(), "2");
        assert_eq!(Value::Float(2.0).as_i64(), Some(2));
    }

    #[test]
    fn test_function_identity() {
        let f = HostFunction::new("f", |_| Ok(Value::Undefined));
        let g = HostFunction::new("f", |_| Ok(Value::Undefined));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
        assert_eq!(f.call(&[]).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_json_roundtrip() {
        let json = json!({"a": [1, 2.5, "x", null], "b": {"c": true}});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
        match &value {
            Value::Object(map) => assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_array_display() {
        let value = Value::Array(vec![Value::Int(1), Value::Undefined, Value::from("x")]);
        assert_eq!(value.to_string(), "1,,x");
    }
}
