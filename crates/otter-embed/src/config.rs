//! Configuration types for the bridge.
//!
//! A [`BridgeConfig`] is attached to a platform and inherited by every
//! isolate created from it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EmbedError, EmbedResult};

/// How the isolate lock behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingMode {
    /// Real cross-thread mutual exclusion. Contexts may only be entered by
    /// the thread holding the lock.
    #[default]
    Shared,
    /// Lock calls only keep the level bookkeeping. An isolate must stay on
    /// the thread that first locked it.
    SingleThread,
}

/// Where the host object identity cache lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// One cache per context: the same host object gets one wrapper per context.
    #[default]
    Context,
    /// One cache per isolate, shared by all of its contexts.
    Isolate,
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Lock behaviour.
    /// Default: Shared
    pub locking: LockingMode,

    /// Identity cache scope.
    /// Default: Context
    pub identity_cache: CacheScope,

    /// Deepest host list/map nesting copied into script.
    /// Default: 64
    pub max_marshal_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            locking: LockingMode::Shared,
            identity_cache: CacheScope::Context,
            max_marshal_depth: 64,
        }
    }
}

impl BridgeConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for isolates that never leave their thread.
    pub fn single_thread() -> Self {
        Self {
            locking: LockingMode::SingleThread,
            ..Default::default()
        }
    }

    /// Set the locking mode.
    pub fn locking(mut self, mode: LockingMode) -> Self {
        self.locking = mode;
        self
    }

    /// Set the identity cache scope.
    pub fn identity_cache(mut self, scope: CacheScope) -> Self {
        self.identity_cache = scope;
        self
    }

    /// Set the marshal depth limit.
    pub fn max_marshal_depth(mut self, depth: usize) -> Self {
        self.max_marshal_depth = depth;
        self
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> EmbedResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> EmbedResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EmbedError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Overlay the fields of a partial JSON document onto this config.
    pub fn merge_json(&self, json: &str) -> EmbedResult<Self> {
        let mut base = serde_json::to_value(self)?;
        let overlay: serde_json::Value = serde_json::from_str(json)?;
        if let (Some(base), serde_json::Value::Object(overlay)) = (base.as_object_mut(), overlay) {
            base.extend(overlay);
        }
        Ok(serde_json::from_value(base)?)
    }
}
