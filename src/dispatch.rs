//! The cross-backend dispatcher: one entry point, `call_value`, used
//! by the tree walker when it evaluates a call node, by the VM's
//! `Call` instruction, by the macroexpander, and by every builtin
//! that invokes a user function. Whatever kind of callable shows up,
//! it goes through here, so a tree-walk closure can call a bytecode
//! closure (and back) without either evaluator knowing.

use std::rc::Rc;

use crate::common::closure::FnRepr;
use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;
use crate::data::{map, seq};
use crate::env::{self, Env};
use crate::{eval, vm};

/// Applies `callee` to `args`. Closure identity is preserved: the
/// value passed in is the value the callee sees, on either backend.
pub fn call_value(
    env: &Rc<Env>,
    callee: &Value,
    args: &[Value],
) -> Result<Value, Trace> {
    match callee {
        Value::Builtin(builtin) => (builtin.f)(env, args).map_err(|mut trace| {
            if trace.kind == ErrorKind::UserException {
                // surface the thrown value through the per-thread
                // slot so the other backend sees it too
                if let Some(thrown) = &trace.thrown {
                    env::set_last_thrown(Some(thrown.clone()));
                }
            }
            trace.add_frame(builtin.name, "corvine.core", Span::empty());
            trace
        }),

        Value::Fn(closure) => match &closure.repr {
            FnRepr::Walk(_) => {
                eval::call_closure(env, closure, args, &Span::empty())
            },
            FnRepr::Code(_) => vm::call_closure(env, closure, args),
        },

        Value::MultiFn(multi) => {
            let method = multi.select(env, args)?;
            call_value(env, &method, args)
        },

        Value::ProtocolFn(pfn) => {
            let receiver = args.first().ok_or_else(|| {
                Trace::error(
                    ErrorKind::Arity,
                    &format!(
                        "protocol fn {}/{} needs a receiver",
                        pfn.protocol.name, pfn.method
                    ),
                    Span::empty(),
                )
            })?;
            let method = pfn.select(receiver)?;
            call_value(env, &method, args)
        },

        Value::Keyword(keyword) => match args {
            [Value::ForeignModule(module)] => module.lookup(&keyword.name),
            [coll] => Ok(lookup(coll, callee).unwrap_or(Value::Nil)),
            [coll, default] => Ok(lookup(coll, callee).unwrap_or_else(|| default.clone())),
            _ => Err(arity_err("keyword lookup", args.len())),
        },

        Value::ArrayMap(_) | Value::HashMap(_) => match args {
            [key] => Ok(map::get(callee, key).unwrap_or(Value::Nil)),
            [key, default] => {
                Ok(map::get(callee, key).unwrap_or_else(|| default.clone()))
            },
            _ => Err(arity_err("map lookup", args.len())),
        },

        Value::Set(set) => match args {
            [item] => Ok(if set.contains(item) {
                item.clone()
            } else {
                Value::Nil
            }),
            _ => Err(arity_err("set membership", args.len())),
        },

        Value::Vector(vector) => match args {
            [Value::Int(index)] => {
                let index = usize::try_from(*index).ok();
                index.and_then(|i| vector.get(i)).ok_or_else(|| {
                    Trace::error(
                        ErrorKind::Index,
                        &format!(
                            "index {:?} out of bounds for vector of {}",
                            args[0],
                            vector.len()
                        ),
                        Span::empty(),
                    )
                })
            },
            [other] => Err(Trace::error(
                ErrorKind::Type,
                &format!("vector index must be an integer, got {}", other.type_key()),
                Span::empty(),
            )),
            _ => Err(arity_err("vector lookup", args.len())),
        },

        Value::Var(var) => {
            let value = var.deref();
            call_value(env, &value, args)
        },

        Value::ForeignModule(module) => match args {
            [Value::Str(name)] => module.lookup(name),
            [Value::Keyword(keyword)] => module.lookup(&keyword.name),
            _ => Err(Trace::error(
                ErrorKind::Type,
                "foreign module lookup takes an export name",
                Span::empty(),
            )),
        },

        Value::ForeignFn(foreign) => foreign.invoke(args),

        other => Err(Trace::error(
            ErrorKind::Type,
            &format!("{} is not callable", other.type_key()),
            Span::empty(),
        )),
    }
}

fn lookup(coll: &Value, key: &Value) -> Option<Value> {
    match coll {
        Value::ArrayMap(_) | Value::HashMap(_) => map::get(coll, key),
        Value::Set(set) => {
            if set.contains(key) {
                Some(key.clone())
            } else {
                None
            }
        },
        _ => None,
    }
}

fn arity_err(what: &str, argc: usize) -> Trace {
    Trace::error(
        ErrorKind::Arity,
        &format!("wrong number of args ({}) for {}", argc, what),
        Span::empty(),
    )
}

/// Packs the variadic tail: drains everything past `fixed` out of
/// `args` and returns the rest argument. An empty rest is `nil`.
///
/// When `apply` set the per-thread flag and handed us exactly one
/// extra argument, that argument already is the rest seq; wrapping
/// it again is the double-wrap this flag exists to prevent.
pub fn pack_rest(args: &mut Vec<Value>, fixed: usize) -> Value {
    let flagged = env::take_apply_rest_seq();
    if flagged && args.len() == fixed + 1 {
        return args.pop().unwrap_or(Value::Nil);
    }

    let tail = args.split_off(fixed.min(args.len()));
    if tail.is_empty() {
        Value::Nil
    } else {
        Value::list(tail)
    }
}

/// `apply`: calls `f` with the leading args followed by the elements
/// of the final seqable argument. When the callee's variadic arity
/// lines up with the leading args, the seq is passed through whole
/// under the apply-rest flag instead of being realized.
pub fn apply(env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
    let [f, leading @ .., last] = args else {
        return Err(arity_err("apply", args.len()));
    };

    if variadic_pass_through(f, leading.len()) {
        let mut call_args = leading.to_vec();
        call_args.push(seq::seq(env, last)?);
        env::set_apply_rest_seq();
        let result = call_value(env, f, &call_args);
        // the flag must not outlive an errored call
        env::take_apply_rest_seq();
        return result;
    }

    let mut call_args = leading.to_vec();
    call_args.extend(seq::realize(env, last)?);
    call_value(env, f, &call_args)
}

/// Whether `f` has a variadic arity whose fixed prefix is exactly
/// the supplied leading args, with no fixed arity that could claim
/// the seq as a positional argument instead.
fn variadic_pass_through(f: &Value, leading: usize) -> bool {
    let Value::Fn(closure) = f else {
        return false;
    };
    let (variadic_match, exact_conflict) = match &closure.repr {
        FnRepr::Walk(arities) => (
            arities
                .iter()
                .any(|a| a.variadic && a.params == leading),
            arities
                .iter()
                .any(|a| !a.variadic && a.params == leading + 1),
        ),
        FnRepr::Code(protos) => (
            protos
                .iter()
                .any(|p| p.variadic && p.arity == leading),
            protos
                .iter()
                .any(|p| !p.variadic && p.arity == leading + 1),
        ),
    };
    variadic_match && !exact_conflict
}
