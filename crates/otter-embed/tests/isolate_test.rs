//! Integration tests for isolate locking and the enter stack

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use otter_embed::{BridgeConfig, Context, EmbedError, Isolate, Locker, ScriptValue, Unlocker, Value};

#[test]
fn test_reentrant_lock_levels() {
    let (_engine, platform) = common::setup();
    let isolate = platform.new_isolate().unwrap();

    assert!(!isolate.locked());
    assert_eq!(isolate.lock_level(), 0);

    isolate.lock();
    isolate.lock();
    isolate.lock();
    assert_eq!(isolate.lock_level(), 3);
    assert!(isolate.is_locked_by_current());

    isolate.unlock_all();
    assert_eq!(isolate.lock_level(), -3);
    assert!(!isolate.locked());

    isolate.relock_all();
    assert_eq!(isolate.lock_level(), 3);

    for _ in 0..3 {
        isolate.unlock();
    }
    assert_eq!(isolate.lock_level(), 0);
    assert!(!isolate.locked());
}

#[test]
fn test_locker_and_unlocker_scopes() {
    let (_engine, platform) = common::setup();
    let isolate = platform.new_isolate().unwrap();

    let outer = Locker::new(&isolate);
    {
        let _inner = Locker::new(&isolate);
        assert_eq!(isolate.lock_level(), 2);
        {
            let _unlocker = Unlocker::new(&isolate);
            assert_eq!(isolate.lock_level(), -2);
        }
        assert_eq!(isolate.lock_level(), 2);
    }
    assert_eq!(outer.isolate().lock_level(), 1);
    drop(outer);
    assert!(!isolate.locked());
}

#[test]
fn test_isolate_stack_is_lifo() {
    let (_engine, platform) = common::setup();
    let first = platform.new_isolate().unwrap();
    let second = platform.new_isolate().unwrap();

    assert_eq!(Isolate::current(), None);
    let _a = first.scope().unwrap();
    assert_eq!(Isolate::current().as_ref(), Some(&first));
    {
        let _b = second.scope().unwrap();
        assert_eq!(Isolate::current().as_ref(), Some(&second));
    }
    assert_eq!(Isolate::current().as_ref(), Some(&first));
}

#[test]
#[should_panic(expected = "not the current isolate")]
fn test_leaving_non_current_isolate_panics() {
    let (_engine, platform) = common::setup();
    let first = platform.new_isolate().unwrap();
    let second = platform.new_isolate().unwrap();
    first.enter().unwrap();
    second.enter().unwrap();
    first.leave();
}

#[test]
#[should_panic(expected = "does not hold")]
fn test_unlock_without_lock_panics() {
    let (_engine, platform) = common::setup();
    platform.new_isolate().unwrap().unlock();
}

#[test]
fn test_lock_handoff_between_threads() {
    let (engine, platform) = common::setup();
    engine.define("1 + 1", |_| Ok(ScriptValue::Int(2)));
    let isolate = platform.new_isolate().unwrap();

    isolate
        .with(|isolate| {
            isolate.lock();
            assert_eq!(isolate.lock_level(), 2);

            let (tx, rx) = crossbeam_channel::bounded(1);
            {
                let _unlocker = Unlocker::new(isolate);
                let worker = {
                    let isolate = isolate.clone();
                    thread::spawn(move || {
                        let result = isolate.with(|isolate| {
                            let ctx = Context::new_in(isolate, None).unwrap();
                            ctx.eval("1 + 1").unwrap()
                        });
                        tx.send(result.unwrap()).unwrap();
                    })
                };
                let value = rx.recv_timeout(Duration::from_secs(5)).unwrap();
                assert_eq!(value, Value::Int(2));
                worker.join().unwrap();
            }

            assert_eq!(isolate.lock_level(), 2);
            isolate.unlock();
        })
        .unwrap();
    assert!(!isolate.locked());
}

#[test]
fn test_enter_from_foreign_thread_without_lock_fails() {
    let (_engine, platform) = common::setup();
    let isolate = platform.new_isolate().unwrap();
    isolate.enter().unwrap();

    let other = isolate.clone();
    let result = thread::spawn(move || other.enter()).join().unwrap();
    match result {
        Err(EmbedError::ForeignIsolate { isolate: id }) => assert_eq!(id, isolate.id()),
        other => panic!("expected a foreign isolate error, got {other:?}"),
    }
    isolate.leave();
}

#[test]
fn test_lock_blocks_other_threads() {
    let (_engine, platform) = common::setup();
    let isolate = platform.new_isolate().unwrap();
    let locker = Locker::new(&isolate);

    let (tx, rx) = crossbeam_channel::bounded(1);
    let worker = {
        let isolate = isolate.clone();
        thread::spawn(move || {
            let _locker = Locker::new(&isolate);
            tx.send(isolate.lock_level()).unwrap();
        })
    };
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    drop(locker);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    worker.join().unwrap();
}

#[test]
fn test_single_thread_mode_skips_lock_checks() {
    let (engine, platform) = common::setup_with(BridgeConfig::single_thread());
    engine.define("1 + 1", |_| Ok(ScriptValue::Int(2)));
    let isolate = platform.new_isolate().unwrap();

    isolate.enter().unwrap();
    let ctx = Context::new(None).unwrap();
    assert_eq!(ctx.eval("1 + 1").unwrap(), Value::Int(2));
    drop(ctx);
    isolate.leave();
}

#[test]
#[should_panic(expected = "must be locked")]
fn test_shared_mode_requires_lock_to_enter_context() {
    let (_engine, platform) = common::setup();
    let isolate = platform.new_isolate().unwrap();
    isolate.enter().unwrap();
    let ctx = Context::new(None).unwrap();
    ctx.enter();
}

#[test]
#[should_panic(expected = "while a context of isolate")]
fn test_lock_change_with_foreign_context_entered_panics() {
    let (_engine, platform) = common::setup();
    let first = platform.new_isolate().unwrap();
    let second = platform.new_isolate().unwrap();

    let _scope = first.scope().unwrap();
    let ctx = Context::new(None).unwrap();
    let _entered = ctx.scope();
    second.lock();
}

fn host_bug(_: &Context) {
    panic!("host bug")
}

#[test]
fn test_panic_in_scope_unwinds_lock_and_stacks() {
    let (engine, platform) = common::setup();
    engine.define("1 + 1", |_| Ok(ScriptValue::Int(2)));
    let isolate = platform.new_isolate().unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        isolate.with(|isolate| {
            let ctx = Context::new_in(isolate, None).unwrap();
            ctx.with(host_bug)
        })
    }));
    assert!(result.is_err());
    assert_eq!(Isolate::current(), None);
    assert_eq!(Context::entered(), None);
    assert!(!isolate.locked());
    assert_eq!(isolate.lock_level(), 0);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _scope = isolate.scope().unwrap();
        let ctx = Context::new(None).unwrap();
        ctx.enter();
        host_bug(&ctx)
    }));
    assert!(result.is_err());
    assert_eq!(Isolate::current(), None);
    assert_eq!(Context::entered(), None);
    assert!(!isolate.locked());

    let worker = isolate.clone();
    let value = thread::spawn(move || {
        worker
            .with(|isolate| Context::new_in(isolate, None).unwrap().eval("1 + 1").unwrap())
            .unwrap()
    })
    .join()
    .unwrap();
    assert_eq!(value, Value::Int(2));
}
