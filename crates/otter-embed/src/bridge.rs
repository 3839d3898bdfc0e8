//! Error translation between the realms.
//!
//! Host errors raised inside callbacks become script exceptions of the
//! matching kind. The original [`HostError`] is parked against the exception
//! object, so when script does not catch it the host caller receives the same
//! error back instead of a generic script error.

use tracing::debug;

use otter_embed_core::{ErrorKind, HostError, ObjectClass, PropertyKey, ScriptError, ScriptValue, StackTrace, Thrown};

use crate::context::Context;
use crate::error::EmbedError;

/// Raise `error` into script running in `ctx`.
pub fn to_script_exception(ctx: &Context, error: &HostError) -> Thrown {
    let kind = error.kind().script_kind();
    let message = error.script_message();
    let thrown = script_error(ctx, kind, &message);
    if let Some(exception) = thrown.exception.as_object() {
        ctx.isolate().park_host_error(exception, error.clone());
    }
    debug!(kind = error.kind().name(), script_kind = kind.name(), "host error raised into script");
    thrown
}

/// A fresh script error of `kind`.
pub(crate) fn script_error(ctx: &Context, kind: ErrorKind, message: &str) -> Thrown {
    let exception = ctx.backend().new_error(ctx.id(), kind, message);
    Thrown {
        exception: ScriptValue::Object(exception),
        message: None,
        stack: Some(format!("{}: {}", kind.name(), message)),
    }
}

/// Raise a bridge failure into script.
pub(crate) fn embed_error_to_thrown(ctx: &Context, error: EmbedError) -> Thrown {
    match error {
        EmbedError::Host(host) => to_script_exception(ctx, &host),
        EmbedError::Script(script) => script_error(ctx, script.kind, &script.message),
        EmbedError::IndexOutOfRange { .. } => script_error(ctx, ErrorKind::RangeError, &error.to_string()),
        other => script_error(ctx, ErrorKind::Error, &other.to_string()),
    }
}

/// Convert an exception that escaped script into a host error.
pub fn to_host_error(ctx: &Context, thrown: Thrown) -> EmbedError {
    if let Some(exception) = thrown.exception.as_object() {
        if let Some(host) = ctx.isolate().take_host_error(exception) {
            debug!(kind = host.kind().name(), "host error returned from script");
            return EmbedError::Host(host);
        }
    }

    let backend = ctx.backend();
    let read = |obj, name: &str| -> Option<String> {
        let value = backend.get(ctx.id(), obj, &PropertyKey::from(name)).ok()?;
        if value.is_undefined() {
            return None;
        }
        backend.to_display_string(ctx.id(), &value).ok()
    };
    let display = |value: &ScriptValue| {
        backend
            .to_display_string(ctx.id(), value)
            .unwrap_or_else(|_| value.type_name().to_string())
    };

    let (name, message, stack_property) = match thrown.exception {
        ScriptValue::Object(obj) if backend.class_of(obj) == ObjectClass::Error => (
            read(obj, "name").unwrap_or_else(|| "Error".to_string()),
            read(obj, "message").unwrap_or_default(),
            read(obj, "stack"),
        ),
        ref other => ("Error".to_string(), display(other), None),
    };

    let header = format!("{name}: {message}");
    let mut error = ScriptError::new(name, message);
    if let Some(info) = thrown.message {
        error.script_name = info.script_name;
        error.line_number = info.line_number;
        error.start_pos = info.start_pos;
        error.end_pos = info.end_pos;
        error.start_col = info.start_col;
        error.end_col = info.end_col;
        error.source_line = info.source_line;
    }
    let stack = match (thrown.stack, stack_property) {
        (Some(text), _) => Some(StackTrace::parse_with_header(text, &header)),
        (None, Some(text)) => Some(StackTrace::parse_lenient(text)),
        (None, None) => None,
    };
    if let Some(stack) = stack {
        error = error.with_stack(stack);
    }
    debug!(name = %error.name, line = ?error.line_number, "script exception returned to host");
    EmbedError::from(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use otter_embed_core::reference::ReferenceEngine;
    use otter_embed_core::{HostErrorKind, MessageInfo};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("account {0} is frozen")]
    struct Frozen(u32);

    fn with_context<R>(f: impl FnOnce(&Context) -> R) -> R {
        let platform = Platform::new(Arc::new(ReferenceEngine::new()));
        let isolate = platform.new_isolate().unwrap();
        isolate
            .with(|isolate| {
                let ctx = Context::new_in(isolate, None).unwrap();
                ctx.with(f)
            })
            .unwrap()
    }

    #[test]
    fn test_kind_mapping() {
        with_context(|ctx| {
            let cases = [
                (HostError::index("list index out of range"), "RangeError", "list index out of range"),
                (HostError::attribute("no attribute 'x'"), "ReferenceError", "no attribute 'x'"),
                (HostError::type_error("not a number"), "TypeError", "not a number"),
                (HostError::syntax("bad input"), "SyntaxError", "bad input"),
                (HostError::other("KeyError", "'k'"), "Error", "KeyError: 'k'"),
            ];
            for (host, name, message) in cases {
                let thrown = to_script_exception(ctx, &host);
                let obj = thrown.exception.as_object().unwrap();
                let backend = ctx.backend();
                assert_eq!(
                    backend.get(ctx.id(), obj, &"name".into()).unwrap(),
                    ScriptValue::String(name.into())
                );
                assert_eq!(
                    backend.get(ctx.id(), obj, &"message".into()).unwrap(),
                    ScriptValue::String(message.into())
                );
            }
        });
    }

    #[test]
    fn test_domain_error_roundtrip() {
        with_context(|ctx| {
            let host = HostError::domain(Frozen(7));
            let thrown = to_script_exception(ctx, &host);
            let back = to_host_error(ctx, thrown);
            let host = back.as_host().unwrap();
            assert_eq!(host.kind(), &HostErrorKind::Other("Frozen".into()));
            assert_eq!(host.downcast_ref::<Frozen>().map(|f| f.0), Some(7));
        });
    }

    #[test]
    fn test_script_error_fields() {
        with_context(|ctx| {
            let mut thrown = script_error(ctx, ErrorKind::TypeError, "x is not a function");
            thrown.stack = Some("TypeError: x is not a function\n    at f (app.js:3:9)".into());
            thrown.message = Some(MessageInfo {
                script_name: Some("app.js".into()),
                line_number: Some(3),
                start_pos: Some(20),
                end_pos: Some(23),
                start_col: Some(8),
                end_col: Some(11),
                source_line: Some("  return x();".into()),
            });
            let err = to_host_error(ctx, thrown);
            let script = err.as_script().unwrap();
            assert_eq!(script.kind, ErrorKind::TypeError);
            assert_eq!(script.line_number, Some(3));
            assert_eq!(script.source_line.as_deref(), Some("  return x();"));
            assert_eq!(script.frames()[0].as_tuple(), (Some("f"), Some("app.js"), Some(3), Some(9)));
            assert_eq!(err.to_string(), "TypeError: x is not a function ( app.js @ 3 : 8 )  -> return x();");
        });
    }

    #[test]
    fn test_multiline_message_with_frame_like_line() {
        with_context(|ctx| {
            let message = "bad input\n    at line two\ndetails";
            let mut thrown = script_error(ctx, ErrorKind::Error, message);
            thrown.stack = Some(format!("Error: {message}\n    at f (app.js:1:1)"));
            let err = to_host_error(ctx, thrown);
            let script = err.as_script().unwrap();
            assert_eq!(script.message, message);
            assert_eq!(script.frames().len(), 1);
            assert_eq!(script.frames()[0].function_name.as_deref(), Some("f"));
        });
    }

    #[test]
    fn test_script_written_stack_never_panics() {
        with_context(|ctx| {
            let thrown = script_error(ctx, ErrorKind::Error, "boom");
            let obj = thrown.exception.as_object().unwrap();
            ctx.backend()
                .set(ctx.id(), obj, &"stack".into(), ScriptValue::String("not\n    at a (b:1)\nreally".into()))
                .unwrap();
            let err = to_host_error(ctx, Thrown::value(thrown.exception));
            let script = err.as_script().unwrap();
            assert_eq!(script.frames().len(), 1);
            assert_eq!(script.stack_trace.as_ref().map(|s| s.text()), Some("not\n    at a (b:1)\nreally"));
        });
    }

    #[test]
    fn test_thrown_primitive() {
        with_context(|ctx| {
            let err = to_host_error(ctx, Thrown::value(ScriptValue::Int(42)));
            let script = err.as_script().unwrap();
            assert_eq!(script.name, "Error");
            assert_eq!(script.message, "42");
            assert!(script.stack_trace.is_none());
        });
    }
}
