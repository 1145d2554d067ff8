//! Collection and sequence builtins.

use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::foreign::ForeignFn;
use crate::data::list::List;
use crate::data::map;
use crate::data::seq::{self, Cons, LazySeq};
use crate::data::symbol::{intern_keyword, Symbol};
use crate::data::transient::{TransientMap, TransientSet, TransientVector};
use crate::data::value::Value;
use crate::data::vector::Vector;
use crate::env::Env;

fn arity_err(name: &str, argc: usize) -> Trace {
    Trace::error(
        ErrorKind::Arity,
        &format!("wrong number of args ({}) passed to {}", argc, name),
        Span::empty(),
    )
}

fn type_err(name: &str, got: &Value) -> Trace {
    Trace::error(
        ErrorKind::Type,
        &format!("{} does not support {}", name, got.type_key()),
        Span::empty(),
    )
}

pub fn list(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    Ok(Value::list(args.to_vec()))
}

pub fn vector(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    Ok(Value::vector(args.to_vec()))
}

pub fn vec(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [coll] => Ok(Value::vector(seq::realize(env, coll)?)),
        _ => Err(arity_err("vec", args.len())),
    }
}

pub fn hash_map(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    if args.len() % 2 != 0 {
        return Err(Trace::error(
            ErrorKind::ValueError,
            "hash-map needs an even number of arguments",
            Span::empty(),
        ));
    }
    Ok(Value::map_from_pairs(
        args.chunks(2).map(|kv| (kv[0].clone(), kv[1].clone())).collect(),
    ))
}

pub fn hash_set(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    Ok(Value::set_from_items(args.to_vec()))
}

pub fn conj(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll, items @ ..] = args else {
        return Err(arity_err("conj", args.len()));
    };
    let mut coll = coll.clone();
    for item in items {
        coll = match &coll {
            Value::Nil => Value::list(vec![item.clone()]),
            Value::List(l) => Value::List(Rc::new(l.conj(item.clone()))),
            Value::Vector(v) => Value::Vector(Rc::new(v.conj(item.clone()))),
            Value::Set(s) => Value::Set(Rc::new(s.conj(item.clone()))),
            Value::ArrayMap(_) | Value::HashMap(_) => {
                // conj of a [k v] pair
                let Value::Vector(pair) = item else {
                    return Err(type_err("conj onto a map", item));
                };
                if pair.len() != 2 {
                    return Err(type_err("conj onto a map", item));
                }
                map::assoc(&coll, pair.nth(0), pair.nth(1))
            },
            other => return Err(type_err("conj", other)),
        };
    }
    Ok(coll)
}

pub fn assoc(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll, kvs @ ..] = args else {
        return Err(arity_err("assoc", args.len()));
    };
    if kvs.is_empty() || kvs.len() % 2 != 0 {
        return Err(arity_err("assoc", args.len()));
    }

    let mut coll = match coll {
        Value::Nil => Value::map_from_pairs(vec![]),
        other => other.clone(),
    };
    for kv in kvs.chunks(2) {
        coll = match &coll {
            Value::ArrayMap(_) | Value::HashMap(_) => {
                map::assoc(&coll, kv[0].clone(), kv[1].clone())
            },
            Value::Vector(v) => {
                let Value::Int(index) = &kv[0] else {
                    return Err(type_err("assoc on a vector", &kv[0]));
                };
                let index = *index;
                let replaced = usize::try_from(index)
                    .ok()
                    .and_then(|i| v.assoc(i, kv[1].clone()));
                match replaced {
                    Some(replaced) => Value::Vector(Rc::new(replaced)),
                    None => {
                        return Err(Trace::error(
                            ErrorKind::Index,
                            &format!(
                                "index {} out of bounds for vector of {}",
                                index,
                                v.len()
                            ),
                            Span::empty(),
                        ))
                    },
                }
            },
            other => return Err(type_err("assoc", other)),
        };
    }
    Ok(coll)
}

pub fn dissoc(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll, keys @ ..] = args else {
        return Err(arity_err("dissoc", args.len()));
    };
    let mut coll = coll.clone();
    for key in keys {
        coll = match &coll {
            Value::Nil => Value::Nil,
            Value::ArrayMap(_) | Value::HashMap(_) => map::dissoc(&coll, key),
            other => return Err(type_err("dissoc", other)),
        };
    }
    Ok(coll)
}

pub fn disj(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll, items @ ..] = args else {
        return Err(arity_err("disj", args.len()));
    };
    let Value::Set(set) = coll else {
        return Err(type_err("disj", coll));
    };
    let mut set = Rc::clone(set);
    for item in items {
        set = Rc::new(set.disj(item));
    }
    Ok(Value::Set(set))
}

pub fn get(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let (coll, key, default) = match args {
        [coll, key] => (coll, key, Value::Nil),
        [coll, key, default] => (coll, key, default.clone()),
        _ => return Err(arity_err("get", args.len())),
    };

    let found = match coll {
        Value::ArrayMap(_) | Value::HashMap(_) => map::get(coll, key),
        Value::Set(s) => {
            if s.contains(key) {
                Some(key.clone())
            } else {
                None
            }
        },
        Value::Vector(v) => match key {
            Value::Int(index) => {
                usize::try_from(*index).ok().and_then(|i| v.get(i))
            },
            _ => None,
        },
        Value::TransientMap(t) => t.get(key)?,
        _ => None,
    };
    Ok(found.unwrap_or(default))
}

pub fn nth(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let (coll, index) = match args {
        [coll, Value::Int(index)] => (coll, *index),
        [_, other] => return Err(type_err("nth index", other)),
        _ => return Err(arity_err("nth", args.len())),
    };

    let out_of_bounds = |len: usize| {
        Trace::error(
            ErrorKind::Index,
            &format!("index {} out of bounds for count {}", index, len),
            Span::empty(),
        )
    };

    match coll {
        Value::Vector(v) => usize::try_from(index)
            .ok()
            .and_then(|i| v.get(i))
            .ok_or_else(|| out_of_bounds(v.len())),
        Value::List(l) => usize::try_from(index)
            .ok()
            .and_then(|i| l.items().get(i).cloned())
            .ok_or_else(|| out_of_bounds(l.len())),
        other => {
            let items = seq::realize(env, other)?;
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| out_of_bounds(items.len()))
        },
    }
}

pub fn count(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll] = args else {
        return Err(arity_err("count", args.len()));
    };
    let count = match coll {
        Value::Nil => 0,
        Value::List(l) => l.len(),
        Value::Vector(v) => v.len(),
        Value::ArrayMap(_) | Value::HashMap(_) => map::count(coll),
        Value::Set(s) => s.len(),
        Value::Str(s) => s.chars().count(),
        other => seq::realize(env, other)?.len(),
    };
    Ok(Value::Int(count as i64))
}

pub fn contains_pred(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll, key] = args else {
        return Err(arity_err("contains?", args.len()));
    };
    let contains = match coll {
        Value::ArrayMap(_) | Value::HashMap(_) => map::get(coll, key).is_some(),
        Value::Set(s) => s.contains(key),
        Value::Vector(v) => match key {
            Value::Int(index) => {
                usize::try_from(*index).map(|i| i < v.len()).unwrap_or(false)
            },
            _ => false,
        },
        _ => false,
    };
    Ok(Value::Bool(contains))
}

pub fn first(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [coll] => seq::first(env, coll),
        _ => Err(arity_err("first", args.len())),
    }
}

pub fn next(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [coll] => seq::next(env, coll),
        _ => Err(arity_err("next", args.len())),
    }
}

pub fn rest(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [coll] => match seq::next(env, coll)? {
            Value::Nil => Ok(Value::list(vec![])),
            more => Ok(more),
        },
        _ => Err(arity_err("rest", args.len())),
    }
}

pub fn cons(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [head, tail] => Ok(Value::Cons(Rc::new(Cons {
            head: head.clone(),
            tail: tail.clone(),
        }))),
        _ => Err(arity_err("cons", args.len())),
    }
}

pub fn seq_builtin(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [coll] => seq::seq(env, coll),
        _ => Err(arity_err("seq", args.len())),
    }
}

pub fn empty_pred(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [coll] => Ok(Value::Bool(seq::seq(env, coll)?.is_nil())),
        _ => Err(arity_err("empty?", args.len())),
    }
}

pub fn range(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let (start, end, step) = match args {
        [Value::Int(end)] => (0, *end, 1),
        [Value::Int(start), Value::Int(end)] => (*start, *end, 1),
        [Value::Int(start), Value::Int(end), Value::Int(step)] => {
            (*start, *end, *step)
        },
        _ => return Err(arity_err("range", args.len())),
    };
    if step == 0 {
        return Err(Trace::error(
            ErrorKind::ValueError,
            "range step must not be zero",
            Span::empty(),
        ));
    }

    let mut items = vec![];
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        items.push(Value::Int(i));
        i += step;
    }
    Ok(Value::list(items))
}

/// `(repeat x)` is an infinite lazy seq of `x`; `(repeat n x)` stops
/// after `n`. Both stay lazy, so only the forced prefix exists.
pub fn repeat(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [item] => Ok(repeat_lazy(None, item.clone())),
        [Value::Int(n), item] => Ok(repeat_lazy(Some(*n), item.clone())),
        [other, _] => Err(type_err("repeat count", other)),
        _ => Err(arity_err("repeat", args.len())),
    }
}

/// One step of the repetition: a cons of the item onto the next
/// step's lazy seq. The thunk has to close over the item and the
/// remaining count, and the foreign-fn surface is the one callable
/// that carries native closure state.
fn repeat_lazy(remaining: Option<i64>, item: Value) -> Value {
    let thunk = ForeignFn::new("repeat-step", move |_args| {
        Ok(match remaining {
            Some(n) if n <= 0 => Value::Nil,
            _ => Value::Cons(Rc::new(Cons {
                head: item.clone(),
                tail: repeat_lazy(remaining.map(|n| n - 1), item.clone()),
            })),
        })
    });
    Value::LazySeq(Rc::new(LazySeq::new(Value::ForeignFn(Rc::new(thunk)))))
}

pub fn transient(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Vector(v)] => Ok(Value::TransientVector(Rc::new(
            TransientVector::from_vector(v),
        ))),
        [coll @ (Value::ArrayMap(_) | Value::HashMap(_))] => {
            Ok(Value::TransientMap(Rc::new(TransientMap::from_map(coll))))
        },
        [Value::Set(s)] => {
            Ok(Value::TransientSet(Rc::new(TransientSet::from_set(s))))
        },
        [other] => Err(type_err("transient", other)),
        _ => Err(arity_err("transient", args.len())),
    }
}

pub fn conj_bang(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [coll, items @ ..] = args else {
        return Err(arity_err("conj!", args.len()));
    };
    match coll {
        Value::TransientVector(t) => {
            for item in items {
                t.conj(item.clone())?;
            }
        },
        Value::TransientSet(t) => {
            for item in items {
                t.conj(item.clone())?;
            }
        },
        other => return Err(type_err("conj!", other)),
    }
    Ok(coll.clone())
}

pub fn assoc_bang(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [Value::TransientMap(t), kvs @ ..] = args else {
        return Err(arity_err("assoc!", args.len()));
    };
    if kvs.is_empty() || kvs.len() % 2 != 0 {
        return Err(arity_err("assoc!", args.len()));
    }
    for kv in kvs.chunks(2) {
        t.assoc(kv[0].clone(), kv[1].clone())?;
    }
    Ok(args[0].clone())
}

pub fn dissoc_bang(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [Value::TransientMap(t), keys @ ..] = args else {
        return Err(arity_err("dissoc!", args.len()));
    };
    for key in keys {
        t.dissoc(key)?;
    }
    Ok(args[0].clone())
}

pub fn persistent_bang(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::TransientVector(t)] => {
            Ok(Value::Vector(Rc::new(t.persistent()?)))
        },
        [Value::TransientMap(t)] => t.persistent(),
        [Value::TransientSet(t)] => Ok(Value::Set(t.persistent()?)),
        [other] => Err(type_err("persistent!", other)),
        _ => Err(arity_err("persistent!", args.len())),
    }
}

pub fn meta(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [value] = args else {
        return Err(arity_err("meta", args.len()));
    };
    let meta = match value {
        Value::List(l) => l.meta.borrow().clone(),
        Value::Vector(v) => v.meta.borrow().clone(),
        Value::ArrayMap(m) => m.meta.borrow().clone(),
        Value::Set(s) => s.meta.borrow().clone(),
        Value::HashMap(m) => m.meta.borrow().clone(),
        Value::Symbol(s) => s.meta.borrow().clone(),
        _ => None,
    };
    Ok(meta.unwrap_or(Value::Nil))
}

/// Metadata lives beside the value: the returned collection shares
/// all structure with the input and equality ignores the change.
pub fn with_meta(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [value, meta] = args else {
        return Err(arity_err("with-meta", args.len()));
    };
    let meta = Some(meta.clone());
    Ok(match value {
        Value::List(l) => {
            let fresh = List::from_vec(l.items().to_vec());
            *fresh.meta.borrow_mut() = meta;
            Value::List(Rc::new(fresh))
        },
        Value::Vector(v) => {
            let fresh = Vector::from_vec(v.to_vec());
            *fresh.meta.borrow_mut() = meta;
            Value::Vector(Rc::new(fresh))
        },
        Value::ArrayMap(m) => {
            let fresh = crate::data::map::ArrayMap::from_pairs(m.entries().to_vec());
            *fresh.meta.borrow_mut() = meta;
            Value::ArrayMap(Rc::new(fresh))
        },
        Value::HashMap(m) => {
            let mut fresh = crate::data::map::TrieMap::new();
            for (k, v) in m.iter() {
                fresh = fresh.assoc(k, v);
            }
            *fresh.meta.borrow_mut() = meta;
            Value::HashMap(Rc::new(fresh))
        },
        Value::Set(s) => {
            let fresh = crate::data::set::Set::from_items(s.iter().collect());
            *fresh.meta.borrow_mut() = meta;
            Value::Set(Rc::new(fresh))
        },
        Value::Symbol(s) => {
            let fresh = match &s.ns {
                Some(ns) => Symbol::qualified(ns, &s.name),
                None => Symbol::simple(&s.name),
            };
            *fresh.meta.borrow_mut() = meta;
            Value::Symbol(Rc::new(fresh))
        },
        other => other.clone(),
    })
}

pub fn str_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Nil => {},
            Value::Str(s) => out.push_str(s),
            Value::Char(c) => out.push(*c),
            Value::Keyword(k) => out.push_str(&format!("{}", k)),
            Value::Symbol(s) => out.push_str(&format!("{}", s)),
            other => out.push_str(&format!("{:?}", other)),
        }
    }
    Ok(Value::from_str(&out))
}

pub fn keyword_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Str(name)] => Ok(Value::Keyword(intern_keyword(None, name))),
        [Value::Keyword(k)] => Ok(Value::Keyword(Rc::clone(k))),
        [Value::Symbol(s)] => Ok(Value::Keyword(intern_keyword(
            s.ns.as_deref(),
            &s.name,
        ))),
        [Value::Str(ns), Value::Str(name)] => {
            Ok(Value::Keyword(intern_keyword(Some(ns), name)))
        },
        _ => Err(arity_err("keyword", args.len())),
    }
}

pub fn symbol_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Str(name)] => Ok(Value::symbol(name)),
        [Value::Symbol(s)] => Ok(Value::Symbol(Rc::clone(s))),
        [Value::Str(ns), Value::Str(name)] => {
            Ok(Value::Symbol(Rc::new(Symbol::qualified(ns, name))))
        },
        _ => Err(arity_err("symbol", args.len())),
    }
}

pub fn name_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Keyword(k)] => Ok(Value::Str(Rc::clone(&k.name))),
        [Value::Symbol(s)] => Ok(Value::Str(Rc::clone(&s.name))),
        [Value::Str(s)] => Ok(Value::Str(Rc::clone(s))),
        [other] => Err(type_err("name", other)),
        _ => Err(arity_err("name", args.len())),
    }
}

pub fn namespace_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Keyword(k)] => Ok(k
            .ns
            .as_ref()
            .map(|ns| Value::Str(Rc::clone(ns)))
            .unwrap_or(Value::Nil)),
        [Value::Symbol(s)] => Ok(s
            .ns
            .as_ref()
            .map(|ns| Value::Str(Rc::clone(ns)))
            .unwrap_or(Value::Nil)),
        [other] => Err(type_err("namespace", other)),
        _ => Err(arity_err("namespace", args.len())),
    }
}

pub fn type_key(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(Value::from_str(value.type_key())),
        _ => Err(arity_err("type-key", args.len())),
    }
}
