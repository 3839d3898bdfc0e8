//! Execution contexts and the per-thread context stack.
//!
//! A [`Context`] is a global scope inside an isolate. Contexts are entered
//! and left in strict LIFO order on the thread holding the isolate lock. A
//! context can be backed by a host object: names the engine global does not
//! define resolve against it.

use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, trace};

use otter_embed_core::{BackendIsolate, ContextId, ObjectId, UnitId};

use crate::bridge;
use crate::config::CacheScope;
use crate::engine::Engine;
use crate::error::{EmbedError, EmbedResult, protocol_violation};
use crate::host::HostObjectRef;
use crate::identity::IdentityCache;
use crate::isolate::Isolate;
use crate::marshal;
use crate::object::JsObject;
use crate::proxy::ProxyObject;
use crate::value::{Value, host_identity};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct ContextShared {
    id: ContextId,
    isolate: Isolate,
    global: ObjectId,
    host_global: Option<HostObjectRef>,
    security_token: RwLock<Option<String>>,
    cache: Arc<Mutex<IdentityCache>>,
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        self.isolate.unregister_context(self.id);
        self.isolate.backend().dispose_context(self.id);
        trace!(context = self.id.0, "context disposed");
    }
}

/// A global scope inside an isolate.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextShared>,
}

impl Context {
    /// Create a context in the current isolate.
    ///
    /// Panics when no isolate is entered on the calling thread.
    pub fn new(global: Option<HostObjectRef>) -> EmbedResult<Self> {
        match Isolate::current() {
            Some(isolate) => Self::new_in(&isolate, global),
            None => protocol_violation("creating a context requires an entered isolate"),
        }
    }

    /// Create a context in `isolate`, optionally backed by a host global.
    pub fn new_in(isolate: &Isolate, global: Option<HostObjectRef>) -> EmbedResult<Self> {
        let backend = isolate.backend();
        let id = backend.create_context();
        let engine_global = backend.global(id);
        let cache = match isolate.config().identity_cache {
            CacheScope::Context => Arc::new(Mutex::new(IdentityCache::new())),
            CacheScope::Isolate => isolate.isolate_cache().clone(),
        };

        let context = Self {
            inner: Arc::new(ContextShared {
                id,
                isolate: isolate.clone(),
                global: engine_global,
                host_global: global.clone(),
                security_token: RwLock::new(None),
                cache,
            }),
        };
        isolate.register_context(id, Arc::downgrade(&context.inner));

        if let Some(host) = global {
            let proto = marshal::to_script(&context, &Value::Host(host))?;
            backend.set_prototype(engine_global, proto.as_object());
        }

        debug!(isolate = isolate.id(), context = id.0, "context created");
        Ok(context)
    }

    pub(crate) fn from_shared(inner: Arc<ContextShared>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextShared> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ContextShared>) -> Option<Self> {
        weak.upgrade().map(Self::from_shared)
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn isolate(&self) -> &Isolate {
        &self.inner.isolate
    }

    pub(crate) fn backend(&self) -> &Arc<dyn BackendIsolate> {
        self.inner.isolate.backend()
    }

    pub(crate) fn cache(&self) -> &Arc<Mutex<IdentityCache>> {
        &self.inner.cache
    }

    pub(crate) fn global_id(&self) -> ObjectId {
        self.inner.global
    }

    /// Push this context on the calling thread's stack.
    pub fn enter(&self) {
        if Isolate::current().as_ref() != Some(self.isolate()) {
            protocol_violation("entering a context whose isolate is not the current isolate");
        }
        self.isolate().ensure_locked();
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        trace!(context = self.id().0, "context entered");
    }

    /// Pop this context, which must be the innermost entered one.
    pub fn leave(&self) {
        let on_top = CONTEXT_STACK.with(|stack| stack.borrow().last() == Some(self));
        if !on_top {
            protocol_violation("leaving a context that is not the innermost entered context");
        }
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        trace!(context = self.id().0, "context left");
        drop(popped);
    }

    /// Enter for the lifetime of the returned scope.
    pub fn scope(&self) -> ContextScope {
        self.enter();
        ContextScope {
            context: self.clone(),
            _not_send: PhantomData,
        }
    }

    /// Run `f` inside this context.
    pub fn with<R>(&self, f: impl FnOnce(&Context) -> R) -> R {
        let _scope = self.scope();
        f(self)
    }

    /// Innermost context entered on the calling thread, in any isolate.
    pub fn entered() -> Option<Context> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Innermost context of the current isolate.
    pub fn current() -> Option<Context> {
        Isolate::current().and_then(|isolate| top_for(&isolate))
    }

    /// Whether any context is entered on the calling thread.
    pub fn in_context() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Compile and run `source` against this context.
    pub fn eval(&self, source: &str) -> EmbedResult<Value> {
        self.eval_with_origin(source, None, 0, 0)
    }

    /// Compile and run `source`, reporting locations relative to the origin.
    pub fn eval_with_origin(&self, source: &str, name: Option<&str>, line: u32, column: u32) -> EmbedResult<Value> {
        let _scope = self.scope();
        let script = Engine::for_isolate(self.isolate()).compile(source, name, line, column)?;
        script.run_in(self)
    }

    pub(crate) fn run_unit(&self, unit: UnitId) -> EmbedResult<Value> {
        let _scope = self.scope();
        let isolate = self.isolate().clone();
        let _call = isolate.begin_call();
        match self.backend().run(self.id(), unit) {
            Ok(value) => Ok(marshal::to_host(self, &value)),
            Err(thrown) => Err(bridge::to_host_error(self, thrown)),
        }
    }

    /// The engine global as a live object.
    pub fn locals(&self) -> JsObject {
        JsObject::new(self.clone(), self.inner.global)
    }

    /// The host object backing this context's global scope.
    pub fn global_scope(&self) -> Option<&HostObjectRef> {
        self.inner.host_global.as_ref()
    }

    pub fn security_token(&self) -> Option<String> {
        self.inner.security_token.read().clone()
    }

    /// Set the token; `None` restores the default token.
    pub fn set_security_token(&self, token: Option<String>) {
        *self.inner.security_token.write() = token;
    }

    /// Deny access between contexts whose tokens differ.
    pub(crate) fn check_access(&self, target: ContextId) -> EmbedResult<()> {
        if target == self.id() {
            return Ok(());
        }
        let Some(other) = self.isolate().context_by_id(target) else {
            return Ok(());
        };
        if self.security_token() == other.security_token() {
            Ok(())
        } else {
            Err(EmbedError::security(format!(
                "access from context {} to context {} denied",
                self.id().0,
                target.0
            )))
        }
    }

    /// The proxy wrapping `obj` in this context, creating it if needed.
    pub fn proxy_of(&self, obj: &HostObjectRef) -> EmbedResult<Arc<ProxyObject>> {
        marshal::to_script(self, &Value::Host(obj.clone()))?;
        match self.cache().lock().proxy(host_identity(obj)) {
            Some(proxy) => Ok(proxy),
            None => Err(EmbedError::marshal("host object", "wrapper was not cached")),
        }
    }

    /// Number of host objects with a live wrapper in this context's cache.
    pub fn identity_cache_len(&self) -> usize {
        self.cache().lock().len()
    }

    /// Number of times `obj` has crossed into script since it was wrapped.
    pub fn crossings(&self, obj: &HostObjectRef) -> usize {
        self.cache().lock().crossings(host_identity(obj))
    }

    /// Ask the engine to reclaim unreachable objects.
    pub fn collect_garbage(&self) {
        self.backend().collect_garbage();
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id.0)
            .field("isolate", &self.inner.isolate.id())
            .finish()
    }
}

/// Keeps a context entered on the current thread.
///
/// ```compile_fail
/// use otter_embed::Context;
///
/// fn leak(ctx: &Context) {
///     let scope = ctx.scope();
///     std::thread::spawn(move || drop(scope));
/// }
/// ```
pub struct ContextScope {
    context: Context,
    _not_send: PhantomData<*mut ()>,
}

impl ContextScope {
    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if thread::panicking() {
            let popped = CONTEXT_STACK.with(|stack| {
                let mut stack = stack.borrow_mut();
                let pos = stack.iter().rposition(|c| *c == self.context)?;
                Some(stack.remove(pos))
            });
            trace!(context = self.context.id().0, "context left while unwinding");
            drop(popped);
        } else {
            self.context.leave();
        }
    }
}

pub(crate) fn entered_count(isolate: &Isolate) -> usize {
    CONTEXT_STACK.with(|stack| stack.borrow().iter().filter(|c| c.isolate() == isolate).count())
}

/// Drop every entry of `isolate` from the calling thread's context stack.
pub(crate) fn forget_isolate(isolate: &Isolate) {
    let removed: Vec<Context> = CONTEXT_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let (removed, kept): (Vec<Context>, Vec<Context>) = stack.drain(..).partition(|c| c.isolate() == isolate);
        *stack = kept;
        removed
    });
    drop(removed);
}

pub(crate) fn top_for(isolate: &Isolate) -> Option<Context> {
    CONTEXT_STACK.with(|stack| stack.borrow().iter().rev().find(|c| c.isolate() == isolate).cloned())
}
