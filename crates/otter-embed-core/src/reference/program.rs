//! The scope a reference program runs in.

use std::sync::Arc;

use crate::backend::{BackendIsolate, FunctionOrigin, MessageInfo, NativeFunction, Thrown};
use crate::error::ErrorKind;
use crate::value::{ContextId, ObjectId, PropertyKey, ScriptValue};

use super::ReferenceIsolate;
use super::heap::Unit;

/// Handle a program uses to act on its isolate, in the context it runs in.
///
/// Cloning is cheap; functions created with [`ProgramScope::function`]
/// capture a clone so their bodies can keep acting after the program returns.
#[derive(Clone)]
pub struct ProgramScope {
    isolate: Arc<ReferenceIsolate>,
    ctx: ContextId,
    unit: Arc<Unit>,
}

impl ProgramScope {
    pub(crate) fn new(isolate: Arc<ReferenceIsolate>, ctx: ContextId, unit: Arc<Unit>) -> Self {
        Self { isolate, ctx, unit }
    }

    pub fn context(&self) -> ContextId {
        self.ctx
    }

    pub fn global(&self) -> ScriptValue {
        ScriptValue::Object(self.isolate.global(self.ctx))
    }

    /// Source text of the running unit.
    pub fn source(&self) -> &str {
        &self.unit.source
    }

    /// Character offset of the first occurrence of `needle` in the source.
    pub fn offset_of(&self, needle: &str) -> usize {
        match self.unit.source.find(needle) {
            Some(byte) => self.unit.source[..byte].chars().count(),
            None => 0,
        }
    }

    fn target(&self, target: &ScriptValue, key: &PropertyKey, verb: &str) -> Result<ObjectId, Thrown> {
        target.as_object().ok_or_else(|| {
            self.raise(
                ErrorKind::TypeError,
                &format!("Cannot {verb} properties of {} (reading '{key}')", target.type_name()),
            )
        })
    }

    pub fn get(&self, target: &ScriptValue, key: impl Into<PropertyKey>) -> Result<ScriptValue, Thrown> {
        let key = key.into();
        let obj = self.target(target, &key, "read")?;
        self.isolate.get(self.ctx, obj, &key)
    }

    pub fn set(&self, target: &ScriptValue, key: impl Into<PropertyKey>, value: impl Into<ScriptValue>) -> Result<(), Thrown> {
        let key = key.into();
        let obj = self.target(target, &key, "set")?;
        self.isolate.set(self.ctx, obj, &key, value.into())
    }

    pub fn has(&self, target: &ScriptValue, key: impl Into<PropertyKey>) -> Result<bool, Thrown> {
        let key = key.into();
        let obj = self.target(target, &key, "read")?;
        self.isolate.has(self.ctx, obj, &key)
    }

    pub fn delete(&self, target: &ScriptValue, key: impl Into<PropertyKey>) -> Result<bool, Thrown> {
        let key = key.into();
        let obj = self.target(target, &key, "delete")?;
        self.isolate.delete(self.ctx, obj, &key)
    }

    pub fn keys(&self, target: &ScriptValue) -> Result<Vec<String>, Thrown> {
        match target.as_object() {
            Some(obj) => Ok(self
                .isolate
                .keys(self.ctx, obj)?
                .into_iter()
                .map(|k| k.to_string())
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve a global identifier; undeclared names are a ReferenceError.
    pub fn lookup(&self, name: &str) -> Result<ScriptValue, Thrown> {
        let global = self.global();
        if self.has(&global, name)? {
            self.get(&global, name)
        } else {
            Err(self.raise(ErrorKind::ReferenceError, &format!("{name} is not defined")))
        }
    }

    /// Assign a global identifier.
    pub fn assign(&self, name: &str, value: impl Into<ScriptValue>) -> Result<(), Thrown> {
        let value = value.into();
        self.isolate.infer_name(&value, name);
        self.set(&self.global(), name, value)
    }

    pub fn call(&self, func: &ScriptValue, this: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        match func.as_object() {
            Some(f) => self.isolate.call(self.ctx, f, this, args),
            None => Err(self.raise(
                ErrorKind::TypeError,
                &format!("{} is not a function", self.to_string(func)?),
            )),
        }
    }

    /// `target[name](...args)`.
    pub fn call_method(&self, target: &ScriptValue, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        let func = self.get(target, name)?;
        if func.as_object().is_none() {
            return Err(self.raise(ErrorKind::TypeError, &format!("{name} is not a function")));
        }
        self.call(&func, target, args)
    }

    pub fn construct(&self, func: &ScriptValue, args: &[ScriptValue]) -> Result<ScriptValue, Thrown> {
        match func.as_object() {
            Some(f) => self.isolate.construct(self.ctx, f, args),
            None => Err(self.raise(ErrorKind::TypeError, "value is not a constructor")),
        }
    }

    /// Create a script function whose body is `body`, defined at the start
    /// of the unit.
    pub fn function<F>(&self, name: &str, body: F) -> ScriptValue
    where
        F: Fn(&ProgramScope, &ScriptValue, &[ScriptValue]) -> Result<ScriptValue, Thrown> + Send + Sync + 'static,
    {
        self.function_at(name, 0, body)
    }

    /// Create a script function defined at character `offset` of the unit.
    pub fn function_at<F>(&self, name: &str, offset: usize, body: F) -> ScriptValue
    where
        F: Fn(&ProgramScope, &ScriptValue, &[ScriptValue]) -> Result<ScriptValue, Thrown> + Send + Sync + 'static,
    {
        let scope = self.clone();
        let native: Arc<dyn NativeFunction> =
            Arc::new(move |this: &ScriptValue, args: &[ScriptValue]| body(&scope, this, args));
        let func = self.isolate.new_function(self.ctx, name, native);

        let (line, column, _) = self.locate(offset);
        let origin = &self.unit.origin;
        self.isolate.set_origin(
            func,
            FunctionOrigin {
                resource_name: origin.name.clone(),
                line_number: line - 1,
                column_number: column,
                line_offset: origin.line_offset,
                column_offset: origin.column_offset,
                inferred_name: None,
            },
        );
        ScriptValue::Object(func)
    }

    pub fn array(&self, items: impl IntoIterator<Item = ScriptValue>) -> ScriptValue {
        let array = self.isolate.new_array(self.ctx, 0);
        for (i, item) in items.into_iter().enumerate() {
            self.isolate.write_own(array, &PropertyKey::Index(i as u32), item);
        }
        ScriptValue::Object(array)
    }

    pub fn object<'a>(&self, props: impl IntoIterator<Item = (&'a str, ScriptValue)>) -> ScriptValue {
        let obj = self.isolate.new_object(self.ctx);
        for (name, value) in props {
            self.isolate.write_own(obj, &PropertyKey::from(name), value);
        }
        ScriptValue::Object(obj)
    }

    pub fn length(&self, target: &ScriptValue) -> u32 {
        target.as_object().map(|o| self.isolate.array_length(o)).unwrap_or(0)
    }

    /// Script `String(value)`.
    pub fn to_string(&self, value: &ScriptValue) -> Result<String, Thrown> {
        self.isolate.to_display_string(self.ctx, value)
    }

    /// `throw value` for a non-error value.
    pub fn throw(&self, value: impl Into<ScriptValue>) -> Thrown {
        Thrown::value(value.into())
    }

    /// Build an error thrown from this unit.
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> ThrowBuilder<'_> {
        ThrowBuilder {
            scope: self,
            kind,
            message: message.into(),
            span: None,
            frames: Vec::new(),
        }
    }

    fn raise(&self, kind: ErrorKind, message: &str) -> Thrown {
        self.isolate.throw_error(self.ctx, kind, message)
    }

    /// Line number, zero-based column and line text of a character offset.
    fn locate(&self, pos: usize) -> (u32, u32, String) {
        let source = &self.unit.source;
        let origin = &self.unit.origin;
        let before: String = source.chars().take(pos).collect();
        let line_index = before.matches('\n').count();
        let line_start = before.rfind('\n').map(|b| before[..=b].chars().count()).unwrap_or(0);
        let mut column = (pos - line_start) as u32;
        if line_index == 0 {
            column += origin.column_offset;
        }
        let text = source.lines().nth(line_index).unwrap_or_default().to_string();
        (origin.line_offset + line_index as u32 + 1, column, text)
    }

    fn script_name(&self) -> String {
        self.unit.origin.name.clone().unwrap_or_else(|| "<anonymous>".to_string())
    }
}

/// Builder for an error thrown at a source location.
pub struct ThrowBuilder<'a> {
    scope: &'a ProgramScope,
    kind: ErrorKind,
    message: String,
    span: Option<(usize, usize)>,
    frames: Vec<(Option<String>, usize)>,
}

impl ThrowBuilder<'_> {
    /// Character span of the throwing expression.
    pub fn at(mut self, start: usize, end: usize) -> Self {
        self.span = Some((start, end));
        self
    }

    /// Add a stack frame at a character offset, innermost first.
    pub fn frame(mut self, function: Option<&str>, offset: usize) -> Self {
        self.frames.push((function.map(str::to_string), offset));
        self
    }

    pub fn build(self) -> Thrown {
        let scope = self.scope;
        let mut thrown = scope.isolate.throw_error(scope.ctx, self.kind, &self.message);

        let mut stack = format!("{}: {}", self.kind.name(), self.message);
        for (function, offset) in &self.frames {
            let (line, column, _) = scope.locate(*offset);
            let location = format!("{}:{}:{}", scope.script_name(), line, column + 1);
            match function {
                Some(f) => stack.push_str(&format!("\n    at {f} ({location})")),
                None => stack.push_str(&format!("\n    at {location}")),
            }
        }

        if let Some((start, end)) = self.span {
            let (line, start_col, text) = scope.locate(start);
            thrown.message = Some(MessageInfo {
                script_name: scope.unit.origin.name.clone(),
                line_number: Some(line),
                start_pos: Some(start),
                end_pos: Some(end),
                start_col: Some(start_col),
                end_col: Some(start_col + (end - start) as u32),
                source_line: Some(text),
            });
        }

        if let Some(obj) = thrown.exception.as_object() {
            scope.isolate.set_stack(obj, &stack);
        }
        thrown.stack = Some(stack);
        thrown
    }
}

#[cfg(test)]
mod tests {
    use super::super::ReferenceEngine;
    use crate::backend::{EngineBackend, ScriptOrigin};
    use crate::error::ErrorKind;
    use crate::value::ScriptValue;

    const SOURCE: &str = "\nfunction hello()\n{\n    throw Error('hello world');\n}\n\nhello();";

    #[test]
    fn test_error_location_and_stack() {
        let engine = ReferenceEngine::new();
        engine.define(SOURCE, |cx| {
            let start = cx.offset_of("throw");
            Err(cx
                .error(ErrorKind::Error, "hello world")
                .at(start, start + 1)
                .frame(Some("hello"), start + 10)
                .frame(None, cx.offset_of("hello();"))
                .build())
        });
        let isolate = engine.create_isolate().unwrap();
        let ctx = isolate.create_context();
        let unit = isolate.compile(ctx, SOURCE, &ScriptOrigin::new(Some("test"), 10, 10)).unwrap();
        let thrown = isolate.run(ctx, unit).unwrap_err();

        let info = thrown.message.unwrap();
        assert_eq!(info.line_number, Some(14));
        assert_eq!(info.start_col, Some(4));
        assert_eq!(info.end_col, Some(5));
        assert_eq!(info.source_line.as_deref(), Some("    throw Error('hello world');"));
        assert_eq!(
            thrown.stack.as_deref(),
            Some("Error: hello world\n    at hello (test:14:15)\n    at test:17:1")
        );
    }

    #[test]
    fn test_lookup_undeclared_is_reference_error() {
        let engine = ReferenceEngine::new();
        engine.define("missing", |cx| cx.lookup("missing"));
        engine.define("x = 3; x", |cx| {
            cx.assign("x", 3)?;
            cx.lookup("x")
        });
        let isolate = engine.create_isolate().unwrap();
        let ctx = isolate.create_context();

        let unit = isolate.compile(ctx, "missing", &ScriptOrigin::default()).unwrap();
        let thrown = isolate.run(ctx, unit).unwrap_err();
        assert_eq!(thrown.stack.as_deref(), Some("ReferenceError: missing is not defined"));

        let unit = isolate.compile(ctx, "x = 3; x", &ScriptOrigin::default()).unwrap();
        assert_eq!(isolate.run(ctx, unit).unwrap(), ScriptValue::Int(3));
    }
}
