//! Control and higher-order builtins: apply, reduce, exception
//! helpers, hierarchy queries.

use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::protocol::isa;
use crate::data::value::Value;
use crate::data::{map, seq};
use crate::dispatch::{self, call_value};
use crate::env::Env;

fn arity_err(name: &str, argc: usize) -> Trace {
    Trace::error(
        ErrorKind::Arity,
        &format!("wrong number of args ({}) passed to {}", argc, name),
        Span::empty(),
    )
}

pub fn apply(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    dispatch::apply(env, args)
}

pub fn identity(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(value.clone()),
        _ => Err(arity_err("identity", args.len())),
    }
}

pub fn not(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(Value::Bool(!value.is_truthy())),
        _ => Err(arity_err("not", args.len())),
    }
}

/// The reduce bridge: realized collections are walked over their
/// backing slice directly; anything else goes element by element
/// through the seq machinery. `reduced` short-circuits either way.
pub fn reduce(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let (f, init, coll) = match args {
        [f, coll] => {
            let head = seq::first(env, coll)?;
            let tail = seq::next(env, coll)?;
            match seq::seq(env, coll)? {
                Value::Nil => return call_value(env, f, &[]),
                _ => (f, head, tail),
            }
        },
        [f, init, coll] => (f, init.clone(), coll.clone()),
        _ => return Err(arity_err("reduce", args.len())),
    };

    // fast path over contiguous storage
    let slice: Option<Vec<Value>> = match &coll {
        Value::Vector(v) => Some(v.to_vec()),
        Value::List(l) => Some(l.items().to_vec()),
        Value::ArrayChunk(c) => Some(c.window().to_vec()),
        _ => None,
    };

    let mut acc = init;
    match slice {
        Some(items) => {
            for item in items {
                acc = call_value(env, f, &[acc, item])?;
                if let Value::Reduced(inner) = &acc {
                    return Ok((**inner).clone());
                }
            }
        },
        None => {
            let mut cursor = seq::seq(env, &coll)?;
            while !cursor.is_nil() {
                let item = seq::first(env, &cursor)?;
                acc = call_value(env, f, &[acc, item])?;
                if let Value::Reduced(inner) = &acc {
                    return Ok((**inner).clone());
                }
                cursor = seq::next(env, &cursor)?;
            }
        },
    }
    Ok(acc)
}

pub fn reduced(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(Value::Reduced(Rc::new(value.clone()))),
        _ => Err(arity_err("reduced", args.len())),
    }
}

pub fn reduced_pred(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(Value::Bool(matches!(value, Value::Reduced(_)))),
        _ => Err(arity_err("reduced?", args.len())),
    }
}

/// Builds the canonical exception map. `throw`ing one of these is
/// how user code raises a rich error; native errors entering a
/// `catch` are wrapped through the same shape.
pub fn ex_info(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let (message, data, cause) = match args {
        [message, data] => (message, data, Value::Nil),
        [message, data, cause] => (message, data, cause.clone()),
        _ => return Err(arity_err("ex-info", args.len())),
    };
    Ok(Value::map_from_pairs(vec![
        (Value::keyword("__ex-info"), Value::Bool(true)),
        (Value::keyword("message"), message.clone()),
        (Value::keyword("data"), data.clone()),
        (Value::keyword("cause"), cause),
    ]))
}

fn is_ex_info(value: &Value) -> bool {
    map::get(value, &Value::keyword("__ex-info"))
        .map(|flag| flag.is_truthy())
        .unwrap_or(false)
}

pub fn ex_data(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] if is_ex_info(value) => {
            Ok(map::get(value, &Value::keyword("data")).unwrap_or(Value::Nil))
        },
        [_] => Ok(Value::Nil),
        _ => Err(arity_err("ex-data", args.len())),
    }
}

pub fn ex_message(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] if is_ex_info(value) => Ok(
            map::get(value, &Value::keyword("message")).unwrap_or(Value::Nil),
        ),
        [_] => Ok(Value::Nil),
        _ => Err(arity_err("ex-message", args.len())),
    }
}

/// `ex-data-or-map`: the whole exception map for an ex-info value,
/// otherwise the value itself. What catch bodies use to inspect a
/// wrapped native error.
pub fn ex_data_or_map(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(value.clone()),
        _ => Err(arity_err("ex-data-or-map", args.len())),
    }
}

pub fn isa_pred(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [child, parent] => {
            let empty = Value::map_from_pairs(vec![]);
            Ok(Value::Bool(isa(&empty, child, parent)))
        },
        [hierarchy, child, parent] => {
            Ok(Value::Bool(isa(hierarchy, child, parent)))
        },
        _ => Err(arity_err("isa?", args.len())),
    }
}
