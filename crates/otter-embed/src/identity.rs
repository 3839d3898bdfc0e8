//! Host object identity cache.
//!
//! Maps the identity of a host object or callable to the engine wrapper
//! created for it, so that the same host object always reaches script as the
//! same wrapper. Entries hold the proxy weakly and are released when the
//! engine finalizes the wrapper.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

use otter_embed_core::ObjectId;

use crate::proxy::ProxyObject;

struct CacheEntry {
    wrapper: ObjectId,
    proxy: Weak<ProxyObject>,
    crossings: usize,
}

#[derive(Default)]
pub(crate) struct IdentityCache {
    entries: FxHashMap<usize, CacheEntry>,
}

impl IdentityCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wrapper for `key`, counting the crossing.
    pub(crate) fn lookup(&mut self, key: usize) -> Option<ObjectId> {
        let entry = self.entries.get_mut(&key)?;
        if entry.proxy.strong_count() == 0 {
            self.entries.remove(&key);
            return None;
        }
        entry.crossings += 1;
        Some(entry.wrapper)
    }

    pub(crate) fn insert(&mut self, key: usize, wrapper: ObjectId, proxy: &Arc<ProxyObject>) {
        self.entries.insert(
            key,
            CacheEntry {
                wrapper,
                proxy: Arc::downgrade(proxy),
                crossings: 1,
            },
        );
    }

    pub(crate) fn proxy(&self, key: usize) -> Option<Arc<ProxyObject>> {
        self.entries.get(&key).and_then(|e| e.proxy.upgrade())
    }

    /// Drop the entry for `key` if it still points at `wrapper`.
    pub(crate) fn release(&mut self, key: usize, wrapper: ObjectId) -> bool {
        match self.entries.get(&key) {
            Some(entry) if entry.wrapper == wrapper => {
                let entry = self.entries.remove(&key);
                trace!(wrapper = %wrapper, crossings = entry.map(|e| e.crossings), "identity cache entry released");
                true
            }
            _ => false,
        }
    }

    pub(crate) fn crossings(&self, key: usize) -> usize {
        self.entries.get(&key).map(|e| e.crossings).unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
