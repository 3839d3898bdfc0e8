//! Host objects exposed to script.
//!
//! A host object implements [`HostObject`]: a dynamic attribute protocol the
//! proxy layer forwards script property access to. Objects that act as
//! arrays report [`HostRole::Array`] and answer the indexed methods.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

use otter_embed_core::{HostError, HostResult};

use crate::value::Value;

/// Shared reference to a host object.
pub type HostObjectRef = Arc<dyn HostObject>;

/// How script sees a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostRole {
    #[default]
    Object,
    Array,
}

/// Dynamic attribute protocol for host objects.
///
/// `get` returns `Ok(None)` for names the object does not have; script then
/// falls back to the default methods every host object carries, and finally
/// to `undefined`. Errors are raised into script through the error bridge.
pub trait HostObject: Send + Sync + 'static {
    /// Class name shown by `toString` and `constructor.name`.
    fn class_name(&self) -> &str {
        "Object"
    }

    fn role(&self) -> HostRole {
        HostRole::Object
    }

    fn get(&self, name: &str) -> HostResult<Option<Value>>;

    /// Returns `false` when the object does not accept the write; script
    /// then stores the value on the wrapper.
    fn set(&self, _name: &str, _value: Value) -> HostResult<bool> {
        Ok(false)
    }

    fn delete(&self, _name: &str) -> HostResult<bool> {
        Ok(false)
    }

    fn has(&self, name: &str) -> HostResult<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// Enumerable names in declaration order.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_callable(&self) -> bool {
        false
    }

    fn call(&self, _args: &[Value]) -> HostResult<Value> {
        Err(HostError::type_error(format!("{} object is not callable", self.class_name())))
    }

    fn len(&self) -> usize {
        0
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_index(&self, _index: usize) -> HostResult<Option<Value>> {
        Ok(None)
    }

    fn set_index(&self, _index: usize, _value: Value) -> HostResult<bool> {
        Ok(false)
    }

    fn delete_index(&self, _index: usize) -> HostResult<bool> {
        Ok(false)
    }

    fn as_any(&self) -> &dyn Any;
}

/// An ordered bag of named values.
#[derive(Default)]
pub struct PropertyBag {
    class: String,
    props: RwLock<IndexMap<String, Value>>,
}

impl PropertyBag {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            props: RwLock::new(IndexMap::new()),
        }
    }

    /// Builder-style insert.
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.write().insert(name.into(), value.into());
        self
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.props.write().insert(name.into(), value.into());
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.props.read().get(name).cloned()
    }

    pub fn into_ref(self) -> HostObjectRef {
        Arc::new(self)
    }
}

impl HostObject for PropertyBag {
    fn class_name(&self) -> &str {
        if self.class.is_empty() { "Object" } else { &self.class }
    }

    fn get(&self, name: &str) -> HostResult<Option<Value>> {
        Ok(self.props.read().get(name).cloned())
    }

    fn set(&self, name: &str, value: Value) -> HostResult<bool> {
        self.props.write().insert(name.to_string(), value);
        Ok(true)
    }

    fn delete(&self, name: &str) -> HostResult<bool> {
        Ok(self.props.write().shift_remove(name).is_some())
    }

    fn has(&self, name: &str) -> HostResult<bool> {
        Ok(self.props.read().contains_key(name))
    }

    fn names(&self) -> Vec<String> {
        self.props.read().keys().cloned().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A growable host list seen by script as an array.
#[derive(Default)]
pub struct HostList {
    items: RwLock<Vec<Value>>,
}

impl HostList {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

impl HostObject for HostList {
    fn class_name(&self) -> &str {
        "List"
    }

    fn role(&self) -> HostRole {
        HostRole::Array
    }

    fn get(&self, _name: &str) -> HostResult<Option<Value>> {
        Ok(None)
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }

    fn get_index(&self, index: usize) -> HostResult<Option<Value>> {
        Ok(self.items.read().get(index).cloned())
    }

    fn set_index(&self, index: usize, value: Value) -> HostResult<bool> {
        let mut items = self.items.write();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
        Ok(true)
    }

    fn delete_index(&self, index: usize) -> HostResult<bool> {
        let mut items = self.items.write();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = Value::Undefined;
                Ok(true)
            }
            None => Err(HostError::index("list assignment index out of range")),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
