//! Value conversion across the boundary.
//!
//! Plain data is copied structurally. Host callables and host objects cross
//! by reference: each gets one engine wrapper per cache scope, found again
//! through the identity cache on later crossings. Script objects come back to
//! the host as live [`JsObject`] handles, except wrappers around our own
//! proxies, which unwrap to the original host value.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::trace;

use otter_embed_core::{HostHandler, PropertyKey, ScriptValue};

use crate::bridge;
use crate::context::Context;
use crate::error::{EmbedError, EmbedResult};
use crate::object::JsObject;
use crate::proxy::{ProxyObject, ProxyTarget};
use crate::value::{Value, host_identity};

/// Convert a host value for use in `ctx`.
pub fn to_script(ctx: &Context, value: &Value) -> EmbedResult<ScriptValue> {
    to_script_at(ctx, value, 0)
}

fn to_script_at(ctx: &Context, value: &Value, depth: usize) -> EmbedResult<ScriptValue> {
    Ok(match value {
        Value::Undefined => ScriptValue::Undefined,
        Value::Null => ScriptValue::Null,
        Value::Bool(b) => ScriptValue::Boolean(*b),
        Value::Int(i) => ScriptValue::Int(*i),
        Value::Float(f) => ScriptValue::Float(*f),
        Value::String(s) => ScriptValue::String(s.clone()),
        Value::Date(d) => ScriptValue::Date(d.timestamp_millis() as f64),
        Value::Array(items) => {
            check_depth(ctx, "list", depth)?;
            let backend = ctx.backend();
            let array = backend.new_array(ctx.id(), 0);
            for (i, item) in items.iter().enumerate() {
                let item = to_script_at(ctx, item, depth + 1)?;
                backend
                    .set(ctx.id(), array, &PropertyKey::Index(i as u32), item)
                    .map_err(|thrown| bridge::to_host_error(ctx, thrown))?;
            }
            ScriptValue::Object(array)
        }
        Value::Object(map) => {
            check_depth(ctx, "map", depth)?;
            let backend = ctx.backend();
            let object = backend.new_object(ctx.id());
            for (name, item) in map {
                let item = to_script_at(ctx, item, depth + 1)?;
                backend
                    .set(ctx.id(), object, &PropertyKey::parse(name), item)
                    .map_err(|thrown| bridge::to_host_error(ctx, thrown))?;
            }
            ScriptValue::Object(object)
        }
        Value::Function(func) => wrap(ctx, func.identity(), ProxyTarget::Function(func.clone())),
        Value::Host(obj) => wrap(ctx, host_identity(obj), ProxyTarget::Object(obj.clone())),
        Value::Script(obj) => {
            if obj.context().isolate() != ctx.isolate() {
                return Err(EmbedError::marshal(
                    format!("{obj:?}"),
                    format!(
                        "object belongs to isolate {}, not isolate {}",
                        obj.context().isolate().id(),
                        ctx.isolate().id()
                    ),
                ));
            }
            ctx.check_access(obj.context().id())?;
            ScriptValue::Object(obj.id())
        }
    })
}

fn check_depth(ctx: &Context, what: &str, depth: usize) -> EmbedResult<()> {
    let limit = ctx.isolate().config().max_marshal_depth;
    if depth >= limit {
        return Err(EmbedError::marshal(
            what,
            format!("nested deeper than {limit} levels"),
        ));
    }
    Ok(())
}

/// Wrapper for a host object or callable, created at most once per cache scope.
fn wrap(ctx: &Context, key: usize, target: ProxyTarget) -> ScriptValue {
    if let Some(wrapper) = ctx.cache().lock().lookup(key) {
        return ScriptValue::Object(wrapper);
    }

    let proxy = ProxyObject::new(ctx, target, key);
    let handler: Arc<dyn HostHandler> = proxy.clone();
    let wrapper = ctx.backend().new_host_object(ctx.id(), handler);
    proxy.bind(wrapper);
    ctx.cache().lock().insert(key, wrapper, &proxy);
    trace!(context = ctx.id().0, %wrapper, class = %proxy.class(), "host value wrapped");
    ScriptValue::Object(wrapper)
}

/// Convert a script value seen in `ctx` for host code.
pub fn to_host(ctx: &Context, value: &ScriptValue) -> Value {
    match value {
        ScriptValue::Undefined => Value::Undefined,
        ScriptValue::Null => Value::Null,
        ScriptValue::Boolean(b) => Value::Bool(*b),
        ScriptValue::Int(i) => Value::Int(*i),
        ScriptValue::Float(f) => Value::Float(*f),
        ScriptValue::String(s) => Value::String(s.clone()),
        ScriptValue::Date(ms) => match date_from_millis(*ms) {
            Some(date) => Value::Date(date),
            None => Value::Float(*ms),
        },
        ScriptValue::Object(id) => {
            if let Some(handler) = ctx.backend().host_handler(*id) {
                if let Some(proxy) = handler.as_any().downcast_ref::<ProxyObject>() {
                    return proxy.target_value();
                }
            }
            Value::Script(JsObject::new(ctx.clone(), *id))
        }
    }
}

fn date_from_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(ms as i64)
}

/// Convert a list of arguments.
pub(crate) fn to_script_args(ctx: &Context, args: &[Value]) -> EmbedResult<Vec<ScriptValue>> {
    args.iter().map(|arg| to_script(ctx, arg)).collect()
}

pub(crate) fn to_host_args(ctx: &Context, args: &[ScriptValue]) -> Vec<Value> {
    args.iter().map(|arg| to_host(ctx, arg)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::host::PropertyBag;
    use crate::platform::Platform;
    use chrono::TimeZone;
    use indexmap::IndexMap;
    use otter_embed_core::reference::ReferenceEngine;

    fn with_context<R>(config: BridgeConfig, f: impl FnOnce(&Context) -> R) -> R {
        let platform = Platform::with_config(Arc::new(ReferenceEngine::new()), config);
        let isolate = platform.new_isolate().unwrap();
        isolate
            .with(|isolate| {
                let ctx = Context::new_in(isolate, None).unwrap();
                ctx.with(f)
            })
            .unwrap()
    }

    #[test]
    fn test_primitives_roundtrip() {
        with_context(BridgeConfig::default(), |ctx| {
            for value in [
                Value::Undefined,
                Value::Null,
                Value::Bool(true),
                Value::Int(-7),
                Value::Float(2.5),
                Value::from("nul\0inside"),
            ] {
                let script = to_script(ctx, &value).unwrap();
                assert_eq!(to_host(ctx, &script), value);
            }
        });
    }

    #[test]
    fn test_date_keeps_milliseconds() {
        with_context(BridgeConfig::default(), |ctx| {
            let date = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
            let script = to_script(ctx, &Value::Date(date)).unwrap();
            assert_eq!(script, ScriptValue::Date(1_700_000_000_123.0));
            assert_eq!(to_host(ctx, &script), Value::Date(date));
        });
    }

    #[test]
    fn test_host_object_identity() {
        with_context(BridgeConfig::default(), |ctx| {
            let a = PropertyBag::new("A").into_ref();
            let b = PropertyBag::new("B").into_ref();
            let first = to_script(ctx, &Value::Host(a.clone())).unwrap();
            let second = to_script(ctx, &Value::Host(a.clone())).unwrap();
            let other = to_script(ctx, &Value::Host(b)).unwrap();
            assert_eq!(first, second);
            assert_ne!(first, other);
            assert_eq!(ctx.crossings(&a), 2);
            assert_eq!(to_host(ctx, &first), Value::Host(a));
        });
    }

    #[test]
    fn test_list_and_map_are_copied() {
        with_context(BridgeConfig::default(), |ctx| {
            let mut map = IndexMap::new();
            map.insert("xs".to_string(), Value::Array(vec![Value::Int(1), Value::Int(2)]));
            let script = to_script(ctx, &Value::Object(map.clone())).unwrap();
            let back = to_host(ctx, &script);
            let obj = back.as_script().unwrap();
            assert_eq!(obj.to_value().unwrap(), Value::Object(map));
        });
    }

    #[test]
    fn test_depth_limit() {
        with_context(BridgeConfig::default().max_marshal_depth(2), |ctx| {
            let nested = Value::Array(vec![Value::Array(vec![Value::Array(vec![])])]);
            let err = to_script(ctx, &nested).unwrap_err();
            assert!(matches!(err, EmbedError::Marshal { .. }), "{err}");
        });
    }

    #[test]
    fn test_script_handle_resolves_to_original() {
        with_context(BridgeConfig::default(), |ctx| {
            let id = ctx.backend().new_object(ctx.id());
            let handle = to_host(ctx, &ScriptValue::Object(id));
            assert_eq!(to_script(ctx, &handle).unwrap(), ScriptValue::Object(id));
        });
    }
}
