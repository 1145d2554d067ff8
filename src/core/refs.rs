//! Reference-cell builtins: atoms, volatiles, delays, vars.

use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::cell::{Atom, Delay, Volatile};
use crate::data::value::Value;
use crate::dispatch::call_value;
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

pub fn atom(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(Value::Atom(Rc::new(Atom::new(value.clone())))),
        _ => Err(arity_err("atom", args.len())),
    }
}

pub fn deref(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Atom(a)] => Ok(a.deref()),
        [Value::Volatile(v)] => Ok(v.deref()),
        [Value::Var(v)] => Ok(v.deref()),
        [Value::Delay(d)] => d.force(env),
        [other] => Err(type_err("deref", other)),
        _ => Err(arity_err("deref", args.len())),
    }
}

pub fn reset_bang(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Atom(a), value] => a.reset(env, value.clone()),
        [other, _] => Err(type_err("reset!", other)),
        _ => Err(arity_err("reset!", args.len())),
    }
}

pub fn swap_bang(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Atom(a), f, extra @ ..] => a.swap(env, f, extra),
        [other, ..] => Err(type_err("swap!", other)),
        _ => Err(arity_err("swap!", args.len())),
    }
}

pub fn compare_and_set_bang(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Atom(a), expected, next] => Ok(Value::Bool(
            a.compare_and_set(env, expected, next.clone())?,
        )),
        [other, ..] => Err(type_err("compare-and-set!", other)),
        _ => Err(arity_err("compare-and-set!", args.len())),
    }
}

pub fn set_validator_bang(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Atom(a), Value::Nil] => {
            a.set_validator(None);
            Ok(Value::Nil)
        },
        [Value::Atom(a), f] => {
            // the validator must accept the current value
            let verdict = call_value(env, f, &[a.deref()])?;
            if !verdict.is_truthy() {
                return Err(Trace::error(
                    ErrorKind::ValueError,
                    "invalid reference state",
                    Span::empty(),
                ));
            }
            a.set_validator(Some(f.clone()));
            Ok(Value::Nil)
        },
        [other, _] => Err(type_err("set-validator!", other)),
        _ => Err(arity_err("set-validator!", args.len())),
    }
}

pub fn volatile_bang(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [value] => Ok(Value::Volatile(Rc::new(Volatile::new(value.clone())))),
        _ => Err(arity_err("volatile!", args.len())),
    }
}

pub fn vreset_bang(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Volatile(v), value] => Ok(v.reset(value.clone())),
        [other, _] => Err(type_err("vreset!", other)),
        _ => Err(arity_err("vreset!", args.len())),
    }
}

pub fn vswap_bang(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Volatile(v), f, extra @ ..] => {
            let mut call_args = vec![v.deref()];
            call_args.extend(extra.iter().cloned());
            let next = call_value(env, f, &call_args)?;
            Ok(v.reset(next))
        },
        [other, ..] => Err(type_err("vswap!", other)),
        _ => Err(arity_err("vswap!", args.len())),
    }
}

/// `delay*`: the analyzer wraps a `delay` form's body into a
/// zero-argument fn and calls this.
pub fn delay_star(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [thunk] => Ok(Value::Delay(Rc::new(Delay::new(thunk.clone())))),
        _ => Err(arity_err("delay*", args.len())),
    }
}

pub fn force(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Delay(d)] => d.force(env),
        [other] => Ok(other.clone()),
        _ => Err(arity_err("force", args.len())),
    }
}

pub fn realized_pred(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [Value::Delay(d)] => Ok(Value::Bool(d.is_realized())),
        [Value::LazySeq(l)] => Ok(Value::Bool(l.is_realized())),
        [other] => Err(type_err("realized?", other)),
        _ => Err(arity_err("realized?", args.len())),
    }
}
