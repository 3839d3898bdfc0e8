//! Process-wide engine platform.
//!
//! A [`Platform`] owns the engine backend and the bridge configuration.
//! Platforms can be created directly and passed around, or installed once
//! for the whole process with [`Platform::init`].

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use otter_embed_core::EngineBackend;

use crate::config::BridgeConfig;
use crate::error::{EmbedError, EmbedResult};
use crate::isolate::Isolate;

static GLOBAL_PLATFORM: RwLock<Option<Arc<Platform>>> = RwLock::new(None);

/// Engine backend plus bridge configuration.
pub struct Platform {
    backend: Arc<dyn EngineBackend>,
    config: BridgeConfig,
    isolates: AtomicUsize,
}

impl Platform {
    /// Create a platform with the default configuration.
    pub fn new(backend: Arc<dyn EngineBackend>) -> Arc<Self> {
        Self::with_config(backend, BridgeConfig::default())
    }

    pub fn with_config(backend: Arc<dyn EngineBackend>, config: BridgeConfig) -> Arc<Self> {
        backend.initialize();
        debug!(engine = backend.name(), version = backend.version(), "platform initialized");
        Arc::new(Self {
            backend,
            config,
            isolates: AtomicUsize::new(0),
        })
    }

    /// Install the process-wide platform.
    ///
    /// Idempotent: once installed, later calls return the existing platform
    /// and leave the given backend unused.
    pub fn init(backend: Arc<dyn EngineBackend>, config: BridgeConfig) -> Arc<Self> {
        let mut global = GLOBAL_PLATFORM.write();
        if let Some(existing) = global.as_ref() {
            warn!(engine = backend.name(), "platform already initialized, ignoring backend");
            return existing.clone();
        }
        let platform = Self::with_config(backend, config);
        *global = Some(platform.clone());
        platform
    }

    /// The process-wide platform.
    pub fn current() -> EmbedResult<Arc<Self>> {
        GLOBAL_PLATFORM.read().clone().ok_or(EmbedError::PlatformNotInitialized)
    }

    pub fn is_initialized() -> bool {
        GLOBAL_PLATFORM.read().is_some()
    }

    /// Uninstall the process-wide platform. The backend shuts down once the
    /// last isolate created from it is gone.
    pub fn deinit() -> bool {
        let removed = GLOBAL_PLATFORM.write().take();
        if removed.is_some() {
            debug!("platform uninstalled");
        }
        removed.is_some()
    }

    pub fn backend(&self) -> &Arc<dyn EngineBackend> {
        &self.backend
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.backend.name()
    }

    pub fn engine_version(&self) -> &str {
        self.backend.version()
    }

    /// Create an isolate on this platform.
    pub fn new_isolate(self: &Arc<Self>) -> EmbedResult<Isolate> {
        let backend = self.backend.create_isolate().map_err(EmbedError::Backend)?;
        self.isolates.fetch_add(1, Ordering::Relaxed);
        Ok(Isolate::from_backend(self.clone(), backend))
    }

    /// Number of isolates created from this platform.
    pub fn isolates_created(&self) -> usize {
        self.isolates.load(Ordering::Relaxed)
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        self.backend.shutdown();
        debug!(engine = self.backend.name(), "platform shut down");
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("engine", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}
