//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use otter_embed::reference::ReferenceEngine;
use otter_embed::{BridgeConfig, Context, Isolate, Platform};

static TRACING: Once = Once::new();

/// Route `tracing` output to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh reference engine and a platform over it.
pub fn setup() -> (Arc<ReferenceEngine>, Arc<Platform>) {
    setup_with(BridgeConfig::default())
}

pub fn setup_with(config: BridgeConfig) -> (Arc<ReferenceEngine>, Arc<Platform>) {
    init_tracing();
    let engine = Arc::new(ReferenceEngine::new());
    let platform = Platform::with_config(engine.clone(), config);
    (engine, platform)
}

/// Run `f` inside a fresh context of a fresh isolate.
pub fn in_context<R>(platform: &Arc<Platform>, f: impl FnOnce(&Context) -> R) -> R {
    let isolate = platform.new_isolate().unwrap();
    isolate
        .with(|isolate: &Isolate| {
            let ctx = Context::new_in(isolate, None).unwrap();
            ctx.with(f)
        })
        .unwrap()
}
