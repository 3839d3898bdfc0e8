//! Object storage for the reference isolate.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{FunctionOrigin, HostHandler, NativeFunction, ObjectClass, ScriptOrigin};
use crate::value::{ContextId, ObjectId, PropertyKey, ScriptValue, UnitId};

use super::Program;

pub(crate) struct HeapObject {
    pub class: ObjectClass,
    pub context: ContextId,
    /// Function or error constructor name.
    pub name: String,
    pub props: IndexMap<String, ScriptValue>,
    /// Sparse array storage; absent indices are holes.
    pub elements: BTreeMap<u32, ScriptValue>,
    pub length: u32,
    pub proto: Option<ObjectId>,
    pub function: Option<Arc<dyn NativeFunction>>,
    /// Definition site of a script function.
    pub origin: Option<FunctionOrigin>,
    pub handler: Option<Arc<dyn HostHandler>>,
}

impl HeapObject {
    pub fn new(class: ObjectClass, context: ContextId) -> Self {
        Self {
            class,
            context,
            name: String::new(),
            props: IndexMap::new(),
            elements: BTreeMap::new(),
            length: 0,
            proto: None,
            function: None,
            origin: None,
            handler: None,
        }
    }

    pub fn own(&self, key: &PropertyKey) -> Option<ScriptValue> {
        match key {
            PropertyKey::Index(i) if self.class == ObjectClass::Array => self.elements.get(i).cloned(),
            PropertyKey::Index(i) => self.props.get(&i.to_string()).cloned(),
            PropertyKey::Name(n) if n == "length" && self.class == ObjectClass::Array => {
                Some(ScriptValue::Int(i64::from(self.length)))
            }
            PropertyKey::Name(n) => match self.props.get(n) {
                Some(v) => Some(v.clone()),
                None if n == "name" && self.class == ObjectClass::Function => {
                    Some(ScriptValue::String(self.name.clone()))
                }
                None => None,
            },
        }
    }

    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.own(key).is_some()
    }

    pub fn write(&mut self, key: &PropertyKey, value: ScriptValue) {
        match key {
            PropertyKey::Index(i) if self.class == ObjectClass::Array => {
                self.elements.insert(*i, value);
                if *i >= self.length {
                    self.length = i + 1;
                }
            }
            PropertyKey::Index(i) => {
                self.props.insert(i.to_string(), value);
            }
            PropertyKey::Name(n) if n == "length" && self.class == ObjectClass::Array => {
                let len = value.to_number();
                if len.is_finite() && len >= 0.0 {
                    self.truncate(len as u32);
                }
            }
            PropertyKey::Name(n) => {
                self.props.insert(n.clone(), value);
            }
        }
    }

    pub fn remove(&mut self, key: &PropertyKey) -> bool {
        match key {
            PropertyKey::Index(i) if self.class == ObjectClass::Array => {
                self.elements.remove(i);
                true
            }
            PropertyKey::Name(n) if n == "length" && self.class == ObjectClass::Array => false,
            other => {
                self.props.shift_remove(&other.to_string());
                true
            }
        }
    }

    pub fn truncate(&mut self, len: u32) {
        self.elements.retain(|i, _| *i < len);
        self.length = len;
    }

    pub fn own_keys(&self) -> Vec<PropertyKey> {
        let mut keys: Vec<PropertyKey> = self.elements.keys().map(|i| PropertyKey::Index(*i)).collect();
        keys.extend(self.props.keys().map(|k| PropertyKey::Name(k.clone())));
        keys
    }

    fn references(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.props
            .values()
            .chain(self.elements.values())
            .filter_map(ScriptValue::as_object)
            .chain(self.proto)
    }
}

pub(crate) struct Unit {
    pub source: String,
    pub origin: ScriptOrigin,
    pub program: Program,
}

#[derive(Default)]
pub(crate) struct Heap {
    next_id: u64,
    pub objects: FxHashMap<ObjectId, HeapObject>,
    pub contexts: FxHashMap<ContextId, ObjectId>,
    pub units: FxHashMap<UnitId, Arc<Unit>>,
    pub protected: FxHashMap<ObjectId, usize>,
}

impl Heap {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn alloc(&mut self, object: HeapObject) -> ObjectId {
        let id = ObjectId(self.next());
        self.objects.insert(id, object);
        id
    }

    pub fn new_context(&mut self) -> ContextId {
        let ctx = ContextId(self.next());
        let global = self.alloc(HeapObject::new(ObjectClass::Object, ctx));
        self.contexts.insert(ctx, global);
        ctx
    }

    pub fn add_unit(&mut self, unit: Unit) -> UnitId {
        let id = UnitId(self.next());
        self.units.insert(id, Arc::new(unit));
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        self.objects.get_mut(&id)
    }

    pub fn handler(&self, id: ObjectId) -> Option<Arc<dyn HostHandler>> {
        self.get(id).and_then(|o| o.handler.clone())
    }

    /// Mark from context globals and protected handles, drop the rest.
    /// Returns handlers of swept host objects for finalization outside the lock.
    pub fn sweep(&mut self) -> Vec<Arc<dyn HostHandler>> {
        let mut marked: FxHashSet<ObjectId> = FxHashSet::default();
        let mut pending: Vec<ObjectId> = self
            .contexts
            .values()
            .copied()
            .chain(self.protected.keys().copied())
            .collect();

        while let Some(id) = pending.pop() {
            if !marked.insert(id) {
                continue;
            }
            if let Some(obj) = self.objects.get(&id) {
                pending.extend(obj.references().filter(|r| !marked.contains(r)));
            }
        }

        let dead: Vec<ObjectId> = self.objects.keys().filter(|id| !marked.contains(id)).copied().collect();
        dead.into_iter()
            .filter_map(|id| self.objects.remove(&id))
            .filter_map(|obj| obj.handler)
            .collect()
    }
}
