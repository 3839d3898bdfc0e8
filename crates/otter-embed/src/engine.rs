//! Compiling and running scripts.

use std::fmt;
use tracing::debug;

use otter_embed_core::{ScriptOrigin, UnitId};

use crate::bridge;
use crate::context::Context;
use crate::error::{EmbedResult, protocol_violation};
use crate::isolate::Isolate;
use crate::value::Value;

/// Compiler front for an isolate.
#[derive(Debug, Clone)]
pub struct Engine {
    isolate: Isolate,
}

impl Engine {
    /// Engine for the calling thread's current isolate.
    pub fn new() -> Self {
        match Isolate::current() {
            Some(isolate) => Self { isolate },
            None => protocol_violation("creating an engine requires an entered isolate"),
        }
    }

    pub fn for_isolate(isolate: &Isolate) -> Self {
        Self {
            isolate: isolate.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.isolate.platform().engine_name()
    }

    pub fn version(&self) -> &str {
        self.isolate.platform().engine_version()
    }

    /// Compile `source` in the isolate's current context.
    ///
    /// `line` and `column` offset the locations reported for the script.
    pub fn compile(&self, source: &str, name: Option<&str>, line: u32, column: u32) -> EmbedResult<Script> {
        let Some(ctx) = self.isolate.current_context() else {
            protocol_violation("compiling requires an entered context");
        };
        self.isolate.ensure_locked();

        let origin = ScriptOrigin::new(name, line, column);
        let _call = self.isolate.begin_call();
        let unit = self
            .isolate
            .backend()
            .compile(ctx.id(), source, &origin)
            .map_err(|thrown| bridge::to_host_error(&ctx, thrown))?;
        debug!(unit = unit.0, name = ?origin.name, "script compiled");

        Ok(Script {
            isolate: self.isolate.clone(),
            unit,
            source: source.to_string(),
            origin,
        })
    }
}

/// A compiled script unit.
pub struct Script {
    isolate: Isolate,
    unit: UnitId,
    source: String,
    origin: ScriptOrigin,
}

impl Script {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> Option<&str> {
        self.origin.name.as_deref()
    }

    pub fn origin(&self) -> &ScriptOrigin {
        &self.origin
    }

    /// Run in the isolate's current context.
    pub fn run(&self) -> EmbedResult<Value> {
        match self.isolate.current_context() {
            Some(ctx) => self.run_in(&ctx),
            None => protocol_violation("running a script requires an entered context"),
        }
    }

    pub fn run_in(&self, ctx: &Context) -> EmbedResult<Value> {
        if ctx.isolate() != &self.isolate {
            protocol_violation("running a script in a context of another isolate");
        }
        debug!(unit = self.unit.0, context = ctx.id().0, "running script");
        ctx.run_unit(self.unit)
    }
}

impl Drop for Script {
    fn drop(&mut self) {
        self.isolate.backend().release_unit(self.unit);
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("unit", &self.unit.0)
            .field("name", &self.origin.name)
            .finish()
    }
}
