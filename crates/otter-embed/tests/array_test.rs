//! Integration tests for array indexing and slicing

mod common;

use otter_embed::{Context, EmbedError, JsArray, ScriptValue, Slice, Value};

const TEN_DOWN: &str = "[10, 9, 8, 7, 6, 5, 4, 3, 2, 1]";

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

fn define_arrays(engine: &otter_embed::reference::ReferenceEngine) {
    engine.define(TEN_DOWN, |cx| Ok(cx.array((1..=10).rev().map(ScriptValue::Int))));
    engine.define("[]", |cx| Ok(cx.array(Vec::new())));
}

fn array(ctx: &Context, source: &str) -> JsArray {
    ctx.eval(source).unwrap().as_array().expect("array")
}

#[test]
fn test_sparse_slice_reads() {
    let (engine, platform) = common::setup();
    define_arrays(&engine);
    common::in_context(&platform, |ctx| {
        let a = array(ctx, TEN_DOWN);
        assert_eq!(a.len(), 10);
        a.delete(5).unwrap();
        assert_eq!(a.len(), 10);

        assert_eq!(a.get_slice(4..7).unwrap(), vec![Value::Int(6), Value::Undefined, Value::Int(4)]);
        assert_eq!(a.get_slice(-3..-1).unwrap(), ints(&[3, 2]));
        assert_eq!(a.get(-1).unwrap(), Value::Int(1));
        assert_eq!(a.get(5).unwrap(), Value::Undefined);
        assert_eq!(
            a.get_slice(Slice::full().step(-3)).unwrap(),
            ints(&[1, 4, 7, 10])
        );
    });
}

#[test]
fn test_index_out_of_range() {
    let (engine, platform) = common::setup();
    define_arrays(&engine);
    common::in_context(&platform, |ctx| {
        let a = array(ctx, TEN_DOWN);
        assert!(matches!(
            a.get(10),
            Err(EmbedError::IndexOutOfRange { index: 10, length: 10 })
        ));
        assert!(matches!(a.get(-11), Err(EmbedError::IndexOutOfRange { .. })));
        assert!(matches!(a.delete(42), Err(EmbedError::IndexOutOfRange { .. })));
    });
}

#[test]
fn test_slice_assignment_resizes() {
    let (engine, platform) = common::setup();
    define_arrays(&engine);
    common::in_context(&platform, |ctx| {
        let a = array(ctx, "[]");
        assert!(a.is_empty());

        a.set_slice(2..4, ints(&[42, 24])).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(
            a.to_vec().unwrap(),
            vec![Value::Undefined, Value::Undefined, Value::Int(42), Value::Int(24)]
        );

        a.set_slice(Slice::from(0..4).step(2), ints(&[7, 8])).unwrap();
        assert_eq!(
            a.to_vec().unwrap(),
            vec![Value::Int(7), Value::Undefined, Value::Int(8), Value::Int(24)]
        );

        a.set_slice(1..4, ints(&[10])).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_vec().unwrap(), ints(&[7, 10]));

        a.set_slice(0..7, ints(&[0, 1, 2])).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a.to_vec().unwrap(), ints(&[0, 1, 2]));
    });
}

#[test]
fn test_extended_slice_size_mismatch() {
    let (engine, platform) = common::setup();
    define_arrays(&engine);
    common::in_context(&platform, |ctx| {
        let a = array(ctx, TEN_DOWN);
        let err = a.set_slice(Slice::full().step(2), ints(&[1, 2])).unwrap_err();
        assert!(matches!(err, EmbedError::SliceSize { expected: 5, actual: 2 }), "{err}");
        assert!(matches!(
            a.get_slice(Slice::full().step(0)),
            Err(EmbedError::ZeroSliceStep)
        ));
    });
}

#[test]
fn test_slice_deletion() {
    let (engine, platform) = common::setup();
    define_arrays(&engine);
    common::in_context(&platform, |ctx| {
        let a = array(ctx, TEN_DOWN);
        a.delete_slice(2..5).unwrap();
        assert_eq!(a.to_vec().unwrap(), ints(&[10, 9, 5, 4, 3, 2, 1]));

        a.delete_slice(Slice::full().step(3)).unwrap();
        assert_eq!(a.len(), 7);
        assert_eq!(
            a.to_vec().unwrap(),
            vec![
                Value::Undefined,
                Value::Int(9),
                Value::Int(5),
                Value::Undefined,
                Value::Int(3),
                Value::Int(2),
                Value::Undefined,
            ]
        );
    });
}

#[test]
fn test_set_and_push() {
    let (engine, platform) = common::setup();
    define_arrays(&engine);
    common::in_context(&platform, |ctx| {
        let a = array(ctx, "[]");
        a.push(Value::from("a")).unwrap();
        a.set(3, Value::Bool(true)).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(a.get(1).unwrap(), Value::Undefined);
        a.set(-1, Value::Null).unwrap();
        assert_eq!(a.get(3).unwrap(), Value::Null);
        assert!(a.contains(&Value::from("a")).unwrap());
        assert!(!a.contains(&Value::Int(3)).unwrap());
    });
}

#[test]
fn test_index_past_engine_range_is_rejected() {
    let (engine, platform) = common::setup();
    engine.define("[1, 2, 3]", |cx| Ok(cx.array([1, 2, 3].map(ScriptValue::Int))));
    common::in_context(&platform, |ctx| {
        let a = array(ctx, "[1, 2, 3]");
        assert!(matches!(
            a.set(1 << 32, 99),
            Err(EmbedError::IndexOutOfRange { index, length: 3 }) if index == 1 << 32
        ));
        assert!(matches!(a.set(i64::MAX, 99), Err(EmbedError::IndexOutOfRange { .. })));
        assert!(matches!(
            a.set_slice(Slice::new(Some(1 << 40), None), ints(&[7])),
            Err(EmbedError::IndexOutOfRange { .. })
        ));
        assert_eq!(a.to_vec().unwrap(), ints(&[1, 2, 3]));
    });
}
