//! Reentrant isolate lock.
//!
//! The lock has an owner thread and a depth. `unlock_all` parks the caller's
//! whole depth and releases the lock so other threads can run script;
//! `relock_all` waits for the lock and restores that depth.

use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use tracing::trace;

use crate::config::LockingMode;
use crate::error::protocol_violation;
use crate::isolate::Isolate;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    /// Depths parked by `unlock_all`, per thread, innermost last.
    suspended: Vec<(ThreadId, usize)>,
}

/// The lock token for one isolate.
#[derive(Debug)]
pub(crate) struct IsolateLock {
    mode: LockingMode,
    state: Mutex<LockState>,
    available: Condvar,
}

impl IsolateLock {
    pub(crate) fn new(mode: LockingMode) -> Self {
        Self {
            mode,
            state: Mutex::new(LockState::default()),
            available: Condvar::new(),
        }
    }

    fn acquire(&self, state: &mut parking_lot::MutexGuard<'_, LockState>, me: ThreadId) {
        match self.mode {
            LockingMode::Shared => {
                while state.owner.is_some() {
                    self.available.wait(state);
                }
            }
            LockingMode::SingleThread => {
                if state.owner.is_some() {
                    protocol_violation("isolate is locked by another thread in single-thread mode");
                }
            }
        }
        state.owner = Some(me);
    }

    fn release(&self, state: &mut LockState) {
        state.owner = None;
        state.depth = 0;
        self.available.notify_one();
    }

    pub(crate) fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
        } else {
            self.acquire(&mut state, me);
            state.depth = 1;
        }
        trace!(depth = state.depth, "isolate locked");
    }

    pub(crate) fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) || state.depth == 0 {
            drop(state);
            protocol_violation("unlock of an isolate the current thread does not hold");
        }
        state.depth -= 1;
        if state.depth == 0 {
            self.release(&mut state);
        }
        trace!(depth = state.depth, "isolate unlocked");
    }

    /// Drop one level if the calling thread holds the lock. Used while
    /// unwinding, where a protocol check would abort the process.
    pub(crate) fn unlock_unwinding(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) && state.depth > 0 {
            state.depth -= 1;
            if state.depth == 0 {
                self.release(&mut state);
            }
        }
    }

    pub(crate) fn unlock_all(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let depth = if state.owner == Some(me) { state.depth } else { 0 };
        if depth > 0 {
            self.release(&mut state);
        }
        state.suspended.push((me, depth));
        trace!(depth, "isolate lock suspended");
    }

    pub(crate) fn relock_all(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            drop(state);
            protocol_violation("relock_all while the current thread holds the isolate");
        }
        let Some(pos) = state.suspended.iter().rposition(|(t, _)| *t == me) else {
            drop(state);
            protocol_violation("relock_all without a matching unlock_all");
        };
        let (_, depth) = state.suspended.remove(pos);
        if depth > 0 {
            self.acquire(&mut state, me);
            state.depth = depth;
        }
        trace!(depth, "isolate lock restored");
    }

    /// Held by any thread.
    pub(crate) fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub(crate) fn held_by_current(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Depth held by the calling thread, or the negated depth it parked.
    pub(crate) fn level(&self) -> i64 {
        let me = thread::current().id();
        let state = self.state.lock();
        if state.owner == Some(me) {
            return state.depth as i64;
        }
        state
            .suspended
            .iter()
            .rev()
            .find(|(t, _)| *t == me)
            .map(|(_, depth)| -(*depth as i64))
            .unwrap_or(0)
    }

    pub(crate) fn depth(&self) -> usize {
        self.state.lock().depth
    }
}

/// Holds an isolate lock for its lifetime.
///
/// Must be dropped on the thread that created it, so it is not `Send`:
///
/// ```compile_fail
/// use otter_embed::{Isolate, Locker};
///
/// fn hand_off(isolate: &Isolate) {
///     let locker = Locker::new(isolate);
///     std::thread::spawn(move || drop(locker));
/// }
/// ```
pub struct Locker {
    isolate: Isolate,
    _not_send: PhantomData<*mut ()>,
}

impl Locker {
    pub fn new(isolate: &Isolate) -> Self {
        isolate.lock();
        Self {
            isolate: isolate.clone(),
            _not_send: PhantomData,
        }
    }

    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        if thread::panicking() {
            self.isolate.unlock_unwinding();
        } else {
            self.isolate.unlock();
        }
    }
}

/// Releases an isolate lock entirely for its lifetime and restores the
/// previous depth on drop.
pub struct Unlocker {
    isolate: Isolate,
    _not_send: PhantomData<*mut ()>,
}

impl Unlocker {
    pub fn new(isolate: &Isolate) -> Self {
        isolate.unlock_all();
        Self {
            isolate: isolate.clone(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for Unlocker {
    fn drop(&mut self) {
        self.isolate.relock_all();
    }
}
