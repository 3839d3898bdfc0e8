//! Integration tests for error translation between host and script

mod common;

use otter_embed::reference::ProgramScope;
use otter_embed::{EmbedError, ErrorKind, HostError, HostErrorKind, ScriptValue, Thrown, Value, parse_stack};

const SOURCE: &str = "\nfunction hello()\n{\n    throw Error('hello world');\n}\n\nhello();";

#[derive(Debug, thiserror::Error)]
#[error("account {0} is frozen")]
struct Frozen(u32);

fn define_hello(engine: &otter_embed::reference::ReferenceEngine) {
    engine.define(SOURCE, |cx| {
        let start = cx.offset_of("throw");
        Err(cx
            .error(ErrorKind::Error, "hello world")
            .at(start, start + 1)
            .frame(Some("hello"), start + 10)
            .frame(None, cx.offset_of("hello();"))
            .build())
    });
}

/// `try { f() } catch (e) { e.name + ': ' + e.message }`
fn catch_call(cx: &ProgramScope) -> Result<ScriptValue, Thrown> {
    let f = cx.lookup("f")?;
    match cx.call(&f, &ScriptValue::Undefined, &[]) {
        Ok(value) => Ok(value),
        Err(thrown) => {
            let name = cx.get(&thrown.exception, "name")?;
            let message = cx.get(&thrown.exception, "message")?;
            Ok(ScriptValue::String(format!("{}: {}", cx.to_string(&name)?, cx.to_string(&message)?)))
        }
    }
}

#[test]
fn test_script_error_location_and_stack() {
    let (engine, platform) = common::setup();
    define_hello(&engine);
    common::in_context(&platform, |ctx| {
        let err = ctx.eval_with_origin(SOURCE, Some("test"), 10, 10).unwrap_err();
        let script = err.as_script().expect("script error");

        assert_eq!(script.kind, ErrorKind::Error);
        assert_eq!(script.name, "Error");
        assert_eq!(script.message, "hello world");
        assert_eq!(script.script_name.as_deref(), Some("test"));
        assert_eq!(script.line_number, Some(14));
        assert_eq!(script.start_col, Some(4));
        assert_eq!(script.end_col, Some(5));
        assert_eq!(script.source_line.as_deref(), Some("    throw Error('hello world');"));

        let frames: Vec<_> = script.frames().iter().map(|f| f.as_tuple()).collect();
        assert_eq!(
            frames,
            vec![
                (Some("hello"), Some("test"), Some(14), Some(15)),
                (None, Some("test"), Some(17), Some(1)),
            ]
        );
        assert_eq!(
            err.to_string(),
            "Error: hello world ( test @ 14 : 4 )  -> throw Error('hello world');"
        );

        let mut printed = Vec::new();
        script.print_stack_trace(&mut printed).unwrap();
        assert_eq!(
            String::from_utf8(printed).unwrap(),
            "Error: hello world\n    at hello (test:14:15)\n    at test:17:1"
        );
    });
}

#[test]
fn test_host_error_caught_by_script() {
    let (engine, platform) = common::setup();
    engine.define("try { f() } catch (e) { e.name + ': ' + e.message }", catch_call);
    common::in_context(&platform, |ctx| {
        let f = Value::function("f", |_| Err(HostError::index("list index out of range")));
        ctx.locals().set("f", f).unwrap();
        assert_eq!(
            ctx.eval("try { f() } catch (e) { e.name + ': ' + e.message }").unwrap(),
            Value::from("RangeError: list index out of range")
        );
    });
}

#[test]
fn test_uncaught_host_error_returns_to_host() {
    let (engine, platform) = common::setup();
    engine.define("f()", |cx| cx.call(&cx.lookup("f")?, &ScriptValue::Undefined, &[]));
    common::in_context(&platform, |ctx| {
        let f = Value::function("f", |_| Err(HostError::domain(Frozen(7))));
        ctx.locals().set("f", f).unwrap();

        let err = ctx.eval("f()").unwrap_err();
        let host = err.as_host().expect("host error");
        assert_eq!(host.downcast_ref::<Frozen>().map(|e| e.0), Some(7));
        assert_eq!(host.message(), "account 7 is frozen");

        let f = Value::function("f", |_| Err(HostError::attribute("no attribute 'x'")));
        ctx.locals().set("f", f).unwrap();
        let err = ctx.eval("f()").unwrap_err();
        assert_eq!(err.as_host().map(|e| e.kind().clone()), Some(HostErrorKind::Attribute));
    });
}

#[test]
fn test_unnamed_host_error_kind_keeps_name() {
    let (engine, platform) = common::setup();
    engine.define("try { f() } catch (e) { e.name + ': ' + e.message }", catch_call);
    common::in_context(&platform, |ctx| {
        let f = Value::function("f", |_| Err(HostError::other("NotImplementedError", "Not supported")));
        ctx.locals().set("f", f).unwrap();
        assert_eq!(
            ctx.eval("try { f() } catch (e) { e.name + ': ' + e.message }").unwrap(),
            Value::from("Error: NotImplementedError: Not supported")
        );
    });
}

#[test]
fn test_thrown_primitive() {
    let (engine, platform) = common::setup();
    engine.define("throw 42", |cx| Err(cx.throw(42)));
    common::in_context(&platform, |ctx| {
        let err = ctx.eval("throw 42").unwrap_err();
        let script = err.as_script().expect("script error");
        assert_eq!(script.name, "Error");
        assert_eq!(script.message, "42");
        assert!(script.frames().is_empty());
    });
}

#[test]
fn test_bridge_error_converts_for_callbacks() {
    let (engine, platform) = common::setup();
    engine.define("[]", |cx| Ok(cx.array(Vec::new())));
    engine.define("try { f() } catch (e) { e.name + ': ' + e.message }", catch_call);
    common::in_context(&platform, |ctx| {
        let empty = ctx.eval("[]").unwrap().as_array().expect("array");
        let f = Value::function("f", move |_| Ok(empty.get(3)?));
        ctx.locals().set("f", f).unwrap();
        assert_eq!(
            ctx.eval("try { f() } catch (e) { e.name + ': ' + e.message }").unwrap(),
            Value::from("RangeError: index 3 out of range for array of length 0")
        );
    });
}

#[test]
fn test_multiline_message_ends_only_the_eval() {
    let (engine, platform) = common::setup();
    engine.define("throw", |cx| {
        Err(cx
            .error(ErrorKind::Error, "bad input\n    at line two\ndetails")
            .frame(Some("check"), 0)
            .build())
    });
    common::in_context(&platform, |ctx| {
        let err = ctx.eval_with_origin("throw", Some("input.js"), 0, 0).unwrap_err();
        let script = err.as_script().expect("script error");
        assert_eq!(script.message, "bad input\n    at line two\ndetails");
        let frames: Vec<_> = script.frames().iter().map(|f| f.as_tuple()).collect();
        assert_eq!(frames, vec![(Some("check"), Some("input.js"), Some(1), Some(1))]);
    });
}

#[test]
fn test_parse_stack_reexport() {
    let frames = parse_stack("Error: boom\n    at f (a.js:1:2)");
    assert_eq!(frames[0].as_tuple(), (Some("f"), Some("a.js"), Some(1), Some(2)));
    assert!(matches!(
        EmbedError::from(HostError::index("x")),
        EmbedError::Host(_)
    ));
}
