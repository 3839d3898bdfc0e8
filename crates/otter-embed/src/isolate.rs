//! Isolates and the per-thread isolate stack.
//!
//! An [`Isolate`] is one engine instance. Handles are cheap to clone and can
//! move between threads; using the engine requires the isolate lock (see
//! [`Isolate::lock`]) and entering the isolate on the calling thread.
//!
//! Each thread keeps a LIFO stack of entered isolates. The top of the stack is
//! the thread's current isolate.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

use otter_embed_core::{BackendIsolate, ContextId, Frame, HostError, ObjectId};

use crate::config::{BridgeConfig, LockingMode};
use crate::context::{self, Context, ContextShared};
use crate::error::{EmbedError, EmbedResult, protocol_violation};
use crate::identity::IdentityCache;
use crate::locker::IsolateLock;
use crate::platform::Platform;

static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ISOLATE_STACK: RefCell<Vec<Isolate>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct IsolateShared {
    id: u64,
    platform: Arc<Platform>,
    backend: Arc<dyn BackendIsolate>,
    lock: IsolateLock,
    /// Enter count per thread.
    entered: Mutex<FxHashMap<ThreadId, usize>>,
    contexts: Mutex<FxHashMap<ContextId, Weak<ContextShared>>>,
    /// Host errors raised into script, keyed by the exception object.
    pending_errors: Mutex<FxHashMap<ObjectId, HostError>>,
    run_depth: AtomicUsize,
    cache: Arc<Mutex<IdentityCache>>,
}

impl Drop for IsolateShared {
    fn drop(&mut self) {
        let depth = self.lock.depth();
        if depth > 0 {
            warn!(isolate = self.id, depth, "isolate disposed while locked");
        }
        debug!(isolate = self.id, "isolate disposed");
    }
}

/// Handle to one engine instance.
#[derive(Clone)]
pub struct Isolate {
    inner: Arc<IsolateShared>,
}

impl Isolate {
    /// Create an isolate on the process-wide platform.
    pub fn new() -> EmbedResult<Self> {
        Platform::current()?.new_isolate()
    }

    pub(crate) fn from_backend(platform: Arc<Platform>, backend: Arc<dyn BackendIsolate>) -> Self {
        let id = NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed);
        let mode = platform.config().locking;
        debug!(isolate = id, ?mode, "isolate created");
        Self {
            inner: Arc::new(IsolateShared {
                id,
                platform,
                backend,
                lock: IsolateLock::new(mode),
                entered: Mutex::new(FxHashMap::default()),
                contexts: Mutex::new(FxHashMap::default()),
                pending_errors: Mutex::new(FxHashMap::default()),
                run_depth: AtomicUsize::new(0),
                cache: Arc::new(Mutex::new(IdentityCache::new())),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.inner.platform
    }

    pub fn config(&self) -> &BridgeConfig {
        self.inner.platform.config()
    }

    pub(crate) fn backend(&self) -> &Arc<dyn BackendIsolate> {
        &self.inner.backend
    }

    pub(crate) fn isolate_cache(&self) -> &Arc<Mutex<IdentityCache>> {
        &self.inner.cache
    }

    /// The calling thread's current isolate.
    pub fn current() -> Option<Isolate> {
        ISOLATE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Push this isolate on the calling thread's stack.
    ///
    /// Fails when the isolate is entered on another thread and the caller
    /// does not hold its lock.
    pub fn enter(&self) -> EmbedResult<()> {
        let me = thread::current().id();
        {
            let mut entered = self.inner.entered.lock();
            let foreign = entered.keys().any(|t| *t != me);
            if foreign && !self.inner.lock.held_by_current() {
                return Err(EmbedError::ForeignIsolate { isolate: self.id() });
            }
            *entered.entry(me).or_insert(0) += 1;
        }
        ISOLATE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        trace!(isolate = self.id(), "isolate entered");
        Ok(())
    }

    /// Pop this isolate from the calling thread's stack.
    pub fn leave(&self) {
        let on_top = ISOLATE_STACK.with(|stack| stack.borrow().last() == Some(self));
        if !on_top {
            protocol_violation("leaving an isolate that is not the current isolate");
        }
        if context::entered_count(self) > 0 {
            protocol_violation("leaving an isolate that still has entered contexts");
        }
        let popped = ISOLATE_STACK.with(|stack| stack.borrow_mut().pop());

        let me = thread::current().id();
        let mut entered = self.inner.entered.lock();
        if let Some(count) = entered.get_mut(&me) {
            *count -= 1;
            if *count == 0 {
                entered.remove(&me);
            }
        }
        drop(entered);
        trace!(isolate = self.id(), "isolate left");
        drop(popped);
    }

    /// Pop this isolate and every context of it still entered, skipping the
    /// protocol checks. Runs while a panic unwinds through a scope.
    pub(crate) fn leave_unwinding(&self) {
        context::forget_isolate(self);
        let popped = ISOLATE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let pos = stack.iter().rposition(|i| i == self)?;
            Some(stack.remove(pos))
        });
        if popped.is_none() {
            return;
        }

        let me = thread::current().id();
        let mut entered = self.inner.entered.lock();
        if let Some(count) = entered.get_mut(&me) {
            *count -= 1;
            if *count == 0 {
                entered.remove(&me);
            }
        }
        drop(entered);
        debug!(isolate = self.id(), "isolate left while unwinding");
        drop(popped);
    }

    /// Acquire the isolate lock, reentrantly.
    pub fn lock(&self) {
        self.check_entered_context("lock");
        self.inner.lock.lock();
    }

    pub fn unlock(&self) {
        self.check_entered_context("unlock");
        self.inner.lock.unlock();
    }

    pub(crate) fn unlock_unwinding(&self) {
        self.inner.lock.unlock_unwinding();
    }

    /// Release every level the calling thread holds.
    pub fn unlock_all(&self) {
        self.check_entered_context("unlock_all");
        self.inner.lock.unlock_all();
    }

    /// Restore the levels parked by the matching [`Isolate::unlock_all`].
    pub fn relock_all(&self) {
        self.check_entered_context("relock_all");
        self.inner.lock.relock_all();
    }

    /// Lock changes are invalid while a context of another isolate is entered.
    fn check_entered_context(&self, op: &str) {
        if thread::panicking() {
            return;
        }
        if let Some(ctx) = Context::entered() {
            if ctx.isolate() != self {
                protocol_violation(format!(
                    "{op} on isolate {} while a context of isolate {} is entered",
                    self.id(),
                    ctx.isolate().id()
                ));
            }
        }
    }

    /// Whether any thread holds the lock.
    pub fn locked(&self) -> bool {
        self.inner.lock.is_locked()
    }

    /// Lock depth held by the calling thread; negative while parked by
    /// `unlock_all`.
    pub fn lock_level(&self) -> i64 {
        self.inner.lock.level()
    }

    pub fn is_locked_by_current(&self) -> bool {
        self.inner.lock.held_by_current()
    }

    /// Abort unless the calling thread may use the engine.
    pub(crate) fn ensure_locked(&self) {
        if self.config().locking == LockingMode::Shared && !self.inner.lock.held_by_current() {
            protocol_violation("isolate must be locked by the current thread");
        }
    }

    /// Whether a context of this isolate is entered on the calling thread.
    pub fn in_context(&self) -> bool {
        context::entered_count(self) > 0
    }

    /// Innermost context of this isolate entered on the calling thread.
    pub fn current_context(&self) -> Option<Context> {
        context::top_for(self)
    }

    /// Context entered by the embedder. Without a microtask queue this is
    /// the current context.
    pub fn entered_or_microtask_context(&self) -> Option<Context> {
        context::top_for(self)
    }

    /// Frames of the script running on this isolate, innermost first, at
    /// most `limit` of them. Empty when no script is running.
    pub fn current_stack_trace(&self, limit: usize) -> Vec<Frame> {
        self.ensure_locked();
        self.inner.backend.current_stack_trace(limit)
    }

    /// Lock and enter; both are undone when the scope drops.
    pub fn scope(&self) -> EmbedResult<IsolateScope> {
        IsolateScope::new(self)
    }

    /// Run `f` with the isolate locked and entered.
    pub fn with<R>(&self, f: impl FnOnce(&Isolate) -> R) -> EmbedResult<R> {
        self.lock();
        let _unlock = scopeguard::guard((), |_| {
            if thread::panicking() {
                self.unlock_unwinding();
            } else {
                self.unlock();
            }
        });
        self.enter()?;
        let _leave = scopeguard::guard((), |_| {
            if thread::panicking() {
                self.leave_unwinding();
            } else {
                self.leave();
            }
        });
        Ok(f(self))
    }

    pub(crate) fn register_context(&self, id: ContextId, context: Weak<ContextShared>) {
        self.inner.contexts.lock().insert(id, context);
    }

    pub(crate) fn unregister_context(&self, id: ContextId) {
        self.inner.contexts.lock().remove(&id);
    }

    pub(crate) fn context_by_id(&self, id: ContextId) -> Option<Context> {
        let shared = self.inner.contexts.lock().get(&id).and_then(Weak::upgrade);
        shared.map(Context::from_shared)
    }

    pub(crate) fn park_host_error(&self, exception: ObjectId, error: HostError) {
        self.inner.pending_errors.lock().insert(exception, error);
    }

    pub(crate) fn take_host_error(&self, exception: ObjectId) -> Option<HostError> {
        self.inner.pending_errors.lock().remove(&exception)
    }

    /// Track a call into the engine. Parked host errors are dropped when the
    /// outermost call returns.
    pub(crate) fn begin_call(&self) -> impl Drop + '_ {
        self.inner.run_depth.fetch_add(1, Ordering::AcqRel);
        scopeguard::guard((), move |_| {
            if self.inner.run_depth.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.inner.pending_errors.lock().clear();
            }
        })
    }
}

impl PartialEq for Isolate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Isolate {}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.inner.id)
            .field("locked", &self.locked())
            .finish()
    }
}

/// Holds an isolate locked and entered on the current thread.
pub struct IsolateScope {
    isolate: Isolate,
    _not_send: PhantomData<*mut ()>,
}

impl IsolateScope {
    fn new(isolate: &Isolate) -> EmbedResult<Self> {
        isolate.lock();
        if let Err(e) = isolate.enter() {
            isolate.unlock();
            return Err(e);
        }
        Ok(Self {
            isolate: isolate.clone(),
            _not_send: PhantomData,
        })
    }

    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }
}

impl Drop for IsolateScope {
    fn drop(&mut self) {
        if thread::panicking() {
            self.isolate.leave_unwinding();
            self.isolate.unlock_unwinding();
        } else {
            self.isolate.leave();
            self.isolate.unlock();
        }
    }
}
