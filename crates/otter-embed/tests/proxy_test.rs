//! Integration tests for host objects and functions seen from script

mod common;

use parking_lot::Mutex;
use std::sync::Arc;

use otter_embed::{Callback, HostFunction, HostList, HostObjectRef, PropertyBag, ScriptValue, Value};

#[test]
fn test_host_function_called_from_script() {
    let (engine, platform) = common::setup();
    engine.define("add(1, 2)", |cx| {
        let add = cx.lookup("add")?;
        cx.call(&add, &ScriptValue::Undefined, &[ScriptValue::Int(1), ScriptValue::Int(2)])
    });
    engine.define("add.name", |cx| cx.get(&cx.lookup("add")?, "name"));

    common::in_context(&platform, |ctx| {
        let add = Value::function("add", |args| {
            let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
            Ok(Value::Int(sum))
        });
        ctx.locals().set("add", add).unwrap();
        assert_eq!(ctx.eval("add(1, 2)").unwrap(), Value::Int(3));
        assert_eq!(ctx.eval("add.name").unwrap(), Value::from("add"));
    });
}

#[test]
fn test_host_object_identity_across_crossings() {
    let (engine, platform) = common::setup();
    engine.define("a === b", |cx| Ok(ScriptValue::Boolean(cx.lookup("a")? == cx.lookup("b")?)));

    common::in_context(&platform, |ctx| {
        let obj: HostObjectRef = Arc::new(PropertyBag::new("Thing"));
        let locals = ctx.locals();
        locals.set("a", Value::Host(obj.clone())).unwrap();
        locals.set("b", Value::Host(obj.clone())).unwrap();
        assert_eq!(ctx.eval("a === b").unwrap(), Value::Bool(true));
        assert_eq!(ctx.crossings(&obj), 2);
        assert_eq!(ctx.identity_cache_len(), 1);

        let back = locals.get("a").unwrap();
        assert!(Arc::ptr_eq(back.as_host().expect("host object"), &obj));

        locals.delete("a").unwrap();
        locals.delete("b").unwrap();
        drop(back);
        ctx.collect_garbage();
        assert_eq!(ctx.identity_cache_len(), 0);
    });
}

#[test]
fn test_script_defined_getter_and_setter() {
    let (engine, platform) = common::setup();
    engine.define("obj.__defineGetter__('x', function () { return 42; }); obj.x", |cx| {
        let obj = cx.lookup("obj")?;
        let getter = cx.function("", |_, _, _| Ok(ScriptValue::Int(42)));
        cx.call_method(&obj, "__defineGetter__", &[ScriptValue::from("x"), getter])?;
        cx.get(&obj, "x")
    });
    engine.define("obj.__defineSetter__('y', function (v) { log.push(v); }); obj.y = 7", |cx| {
        let obj = cx.lookup("obj")?;
        let setter = cx.function("", |cx, _, args| {
            let log = cx.lookup("log")?;
            cx.call_method(&log, "push", args)
        });
        cx.call_method(&obj, "__defineSetter__", &[ScriptValue::from("y"), setter])?;
        cx.set(&obj, "y", 7)?;
        Ok(ScriptValue::Int(7))
    });
    engine.define("typeof obj.__lookupGetter__('x')", |cx| {
        let obj = cx.lookup("obj")?;
        let getter = cx.call_method(&obj, "__lookupGetter__", &[ScriptValue::from("x")])?;
        Ok(ScriptValue::from(if getter.as_object().is_some() { "function" } else { "undefined" }))
    });

    common::in_context(&platform, |ctx| {
        let bag = Arc::new(PropertyBag::new("Thing").with("x", 1));
        let obj: HostObjectRef = bag.clone();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let log_list = PropertyBag::new("Log").with(
            "push",
            Value::function("push", move |args| {
                sink.lock().extend(args.iter().cloned());
                Ok(Value::Undefined)
            }),
        );
        ctx.locals().set("obj", Value::Host(obj.clone())).unwrap();
        ctx.locals().set("log", Value::host(log_list)).unwrap();

        assert_eq!(
            ctx.eval("obj.__defineGetter__('x', function () { return 42; }); obj.x").unwrap(),
            Value::Int(42)
        );
        assert_eq!(bag.value("x"), Some(Value::Int(1)));
        assert_eq!(ctx.eval("typeof obj.__lookupGetter__('x')").unwrap(), Value::from("function"));

        ctx.eval("obj.__defineSetter__('y', function (v) { log.push(v); }); obj.y = 7").unwrap();
        assert_eq!(*log.lock(), vec![Value::Int(7)]);
        assert_eq!(bag.value("y"), None);

        let proxy = ctx.proxy_of(&obj).unwrap();
        assert!(matches!(proxy.lookup_getter("x"), Some(Callback::Script(_))));
        assert!(matches!(proxy.lookup_setter("y"), Some(Callback::Script(_))));
        assert_eq!(proxy.hooked_names(), vec!["x", "y"]);
    });
}

#[test]
fn test_watchpoints() {
    let (engine, platform) = common::setup();
    engine.define("obj.p = 2", |cx| {
        cx.set(&cx.lookup("obj")?, "p", 2)?;
        Ok(ScriptValue::Int(2))
    });
    engine.define("obj.watch('q', function (name, old, val) { return val * 10; }); obj.q = 1", |cx| {
        let obj = cx.lookup("obj")?;
        let handler = cx.function("", |_, _, args| {
            let val = args.get(2).map(ScriptValue::to_number).unwrap_or(0.0);
            Ok(ScriptValue::Float(val * 10.0))
        });
        cx.call_method(&obj, "watch", &[ScriptValue::from("q"), handler])?;
        cx.set(&obj, "q", 1)?;
        Ok(ScriptValue::Int(1))
    });
    engine.define("obj.unwatch('q'); obj.q = 1", |cx| {
        let obj = cx.lookup("obj")?;
        cx.call_method(&obj, "unwatch", &[ScriptValue::from("q")])?;
        cx.set(&obj, "q", 1)?;
        Ok(ScriptValue::Int(1))
    });

    common::in_context(&platform, |ctx| {
        let bag = Arc::new(PropertyBag::new("Thing").with("p", 1));
        let obj: HostObjectRef = bag.clone();
        ctx.locals().set("obj", Value::Host(obj.clone())).unwrap();

        let proxy = ctx.proxy_of(&obj).unwrap();
        proxy.watch(
            "p",
            HostFunction::new("watch", |args| {
                let old = args[1].as_i64().unwrap_or(0);
                let new = args[2].as_i64().unwrap_or(0);
                Ok(Value::Int(old + new))
            }),
        );
        ctx.eval("obj.p = 2").unwrap();
        assert_eq!(bag.value("p"), Some(Value::Int(3)));

        proxy.unwatch("p");
        ctx.eval("obj.p = 2").unwrap();
        assert_eq!(bag.value("p"), Some(Value::Int(2)));

        ctx.eval("obj.watch('q', function (name, old, val) { return val * 10; }); obj.q = 1")
            .unwrap();
        assert_eq!(bag.value("q").and_then(|v| v.as_f64()), Some(10.0));

        ctx.eval("obj.unwatch('q'); obj.q = 1").unwrap();
        assert_eq!(bag.value("q"), Some(Value::Int(1)));
    });
}

#[test]
fn test_host_list_as_script_array() {
    let (engine, platform) = common::setup();
    engine.define("list.length", |cx| cx.get(&cx.lookup("list")?, "length"));
    engine.define("list[1] = 'b'", |cx| {
        cx.set(&cx.lookup("list")?, 1u32, "b")?;
        Ok(ScriptValue::from("b"))
    });

    common::in_context(&platform, |ctx| {
        let list = Arc::new(HostList::new(vec![Value::from("a")]));
        ctx.locals().set("list", Value::Host(list.clone())).unwrap();
        assert_eq!(ctx.eval("list.length").unwrap(), Value::Int(1));
        ctx.eval("list[1] = 'b'").unwrap();
        assert_eq!(list.to_vec(), vec![Value::from("a"), Value::from("b")]);
    });
}

#[test]
fn test_host_object_to_string_and_constructor() {
    let (engine, platform) = common::setup();
    engine.define("String(obj)", |cx| Ok(ScriptValue::String(cx.to_string(&cx.lookup("obj")?)?)));
    engine.define("obj.constructor.name", |cx| {
        let ctor = cx.get(&cx.lookup("obj")?, "constructor")?;
        cx.get(&ctor, "name")
    });

    common::in_context(&platform, |ctx| {
        ctx.locals().set("obj", Value::host(PropertyBag::new("Widget"))).unwrap();
        assert_eq!(ctx.eval("String(obj)").unwrap(), Value::from("[object Widget]"));
        assert_eq!(ctx.eval("obj.constructor.name").unwrap(), Value::from("Widget"));
    });
}

#[test]
fn test_delete_of_watched_name_reaches_host() {
    let (engine, platform) = common::setup();
    engine.define("delete thing.p", |cx| Ok(ScriptValue::Boolean(cx.delete(&cx.lookup("thing")?, "p")?)));

    common::in_context(&platform, |ctx| {
        let bag = Arc::new(PropertyBag::new("Thing").with("p", 1));
        let obj: HostObjectRef = bag.clone();
        ctx.locals().set("thing", Value::Host(obj.clone())).unwrap();

        let proxy = ctx.proxy_of(&obj).unwrap();
        proxy.watch("p", HostFunction::new("watch", |args| Ok(args[2].clone())));

        assert_eq!(ctx.eval("delete thing.p").unwrap(), Value::Bool(true));
        assert_eq!(bag.value("p"), None);
        assert_eq!(proxy.hooked_names(), vec!["p"]);
    });
}
