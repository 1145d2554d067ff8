//! Arithmetic and comparison builtins. The VM has dedicated opcodes
//! for the two-argument forms; these vars are what higher-order code
//! sees, and they fold any argument count down with the same
//! semantics.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::num;
use crate::data::value::Value;
use crate::env::Env;

fn arity_err(name: &str, argc: usize) -> Trace {
    Trace::error(
        ErrorKind::Arity,
        &format!("wrong number of args ({}) passed to {}", argc, name),
        Span::empty(),
    )
}

fn fold(
    args: &[Value],
    identity: Value,
    f: fn(&Value, &Value) -> Result<Value, Trace>,
) -> Result<Value, Trace> {
    match args {
        [] => Ok(identity),
        [only] => f(&identity, only),
        [head, tail @ ..] => {
            let mut acc = head.clone();
            for arg in tail {
                acc = f(&acc, arg)?;
            }
            Ok(acc)
        },
    }
}

pub fn add(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    fold(args, Value::Int(0), num::add)
}

pub fn sub(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [] => Err(arity_err("-", 0)),
        [only] => num::sub(&Value::Int(0), only),
        [head, tail @ ..] => {
            let mut acc = head.clone();
            for arg in tail {
                acc = num::sub(&acc, arg)?;
            }
            Ok(acc)
        },
    }
}

pub fn mul(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    fold(args, Value::Int(1), num::mul)
}

pub fn div(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [] => Err(arity_err("/", 0)),
        [only] => num::div(&Value::Int(1), only),
        [head, tail @ ..] => {
            let mut acc = head.clone();
            for arg in tail {
                acc = num::div(&acc, arg)?;
            }
            Ok(acc)
        },
    }
}

pub fn add_promoting(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    fold(args, Value::Int(0), num::add_promote)
}

pub fn sub_promoting(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [] => Err(arity_err("-'", 0)),
        [only] => num::sub_promote(&Value::Int(0), only),
        [head, tail @ ..] => {
            let mut acc = head.clone();
            for arg in tail {
                acc = num::sub_promote(&acc, arg)?;
            }
            Ok(acc)
        },
    }
}

pub fn mul_promoting(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    fold(args, Value::Int(1), num::mul_promote)
}

pub fn mod_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [a, b] => num::mod_op(a, b),
        _ => Err(arity_err("mod", args.len())),
    }
}

pub fn rem_builtin(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [a, b] => num::rem_op(a, b),
        _ => Err(arity_err("rem", args.len())),
    }
}

pub fn inc(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [n] => num::add(n, &Value::Int(1)),
        _ => Err(arity_err("inc", args.len())),
    }
}

pub fn dec(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [n] => num::sub(n, &Value::Int(1)),
        _ => Err(arity_err("dec", args.len())),
    }
}

pub fn eq(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [] => Err(arity_err("=", 0)),
        [head, tail @ ..] => {
            Ok(Value::Bool(tail.iter().all(|v| head.equiv(v))))
        },
    }
}

pub fn neq(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let Value::Bool(equal) = eq(env, args)? else {
        unreachable!("= returns a boolean");
    };
    Ok(Value::Bool(!equal))
}

fn chain(
    name: &str,
    args: &[Value],
    accept: fn(Ordering) -> bool,
) -> Result<Value, Trace> {
    if args.is_empty() {
        return Err(arity_err(name, 0));
    }
    for pair in args.windows(2) {
        if !accept(num::compare(&pair[0], &pair[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn lt(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    chain("<", args, |o| o == Ordering::Less)
}

pub fn le(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    chain("<=", args, |o| o != Ordering::Greater)
}

pub fn gt(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    chain(">", args, |o| o == Ordering::Greater)
}

pub fn ge(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    chain(">=", args, |o| o != Ordering::Less)
}

pub fn zero_pred(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [n] => Ok(Value::Bool(
            num::compare(n, &Value::Int(0))? == Ordering::Equal,
        )),
        _ => Err(arity_err("zero?", args.len())),
    }
}

pub fn number_pred(_env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    match args {
        [v] => Ok(Value::Bool(matches!(
            v,
            Value::Int(_)
                | Value::Float(_)
                | Value::BigInt(_)
                | Value::Ratio(_)
                | Value::BigDec(_)
        ))),
        _ => Err(arity_err("number?", args.len())),
    }
}
