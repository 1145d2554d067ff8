use std::cell::RefCell;
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;
use crate::dispatch::call_value;
use crate::env::Env;

/// A synchronized reference cell. Updates go through a
/// compare-and-set loop, so a `swap!` whose function re-reads shared
/// state still lands on a consistent total; an optional validator
/// vets every new value before it is stored.
#[derive(Debug)]
pub struct Atom {
    value: RefCell<Value>,
    validator: RefCell<Option<Value>>,
}

impl Atom {
    pub fn new(value: Value) -> Atom {
        Atom {
            value: RefCell::new(value),
            validator: RefCell::new(None),
        }
    }

    pub fn deref(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn set_validator(&self, validator: Option<Value>) {
        *self.validator.borrow_mut() = validator;
    }

    fn validate(&self, env: &Rc<Env>, candidate: &Value) -> Result<(), Trace> {
        let validator = self.validator.borrow().clone();
        if let Some(f) = validator {
            let verdict = call_value(env, &f, &[candidate.clone()])?;
            if !verdict.is_truthy() {
                return Err(Trace::error(
                    ErrorKind::ValueError,
                    "invalid reference state",
                    Span::empty(),
                ));
            }
        }
        Ok(())
    }

    pub fn reset(&self, env: &Rc<Env>, value: Value) -> Result<Value, Trace> {
        self.validate(env, &value)?;
        *self.value.borrow_mut() = value.clone();
        Ok(value)
    }

    /// Store `next` only if the current value still equals `expected`.
    pub fn compare_and_set(
        &self,
        env: &Rc<Env>,
        expected: &Value,
        next: Value,
    ) -> Result<bool, Trace> {
        if !self.value.borrow().equiv(expected) {
            return Ok(false);
        }
        self.validate(env, &next)?;
        *self.value.borrow_mut() = next;
        Ok(true)
    }

    /// `swap!`: apply `f` to the current value (plus `extra` args)
    /// and CAS the result in, retrying if the cell moved underneath.
    pub fn swap(
        &self,
        env: &Rc<Env>,
        f: &Value,
        extra: &[Value],
    ) -> Result<Value, Trace> {
        loop {
            let current = self.deref();
            let mut args = Vec::with_capacity(extra.len() + 1);
            args.push(current.clone());
            args.extend(extra.iter().cloned());
            let next = call_value(env, f, &args)?;
            if self.compare_and_set(env, &current, next.clone())? {
                return Ok(next);
            }
        }
    }
}

/// An unsynchronized mutable cell: fast single-threaded mutation,
/// no CAS, no validator.
#[derive(Debug)]
pub struct Volatile {
    value: RefCell<Value>,
}

impl Volatile {
    pub fn new(value: Value) -> Volatile {
        Volatile {
            value: RefCell::new(value),
        }
    }

    pub fn deref(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn reset(&self, value: Value) -> Value {
        *self.value.borrow_mut() = value.clone();
        value
    }
}

/// A memoized thunk: forced at most once, then cached.
#[derive(Debug)]
pub struct Delay {
    thunk: RefCell<Option<Value>>,
    cached: RefCell<Option<Value>>,
}

impl Delay {
    pub fn new(thunk: Value) -> Delay {
        Delay {
            thunk: RefCell::new(Some(thunk)),
            cached: RefCell::new(None),
        }
    }

    pub fn is_realized(&self) -> bool {
        self.cached.borrow().is_some()
    }

    pub fn force(&self, env: &Rc<Env>) -> Result<Value, Trace> {
        if let Some(cached) = &*self.cached.borrow() {
            return Ok(cached.clone());
        }
        let thunk = self.thunk.borrow_mut().take().ok_or_else(|| {
            Trace::error(
                ErrorKind::ValueError,
                "delay forced itself while realizing",
                Span::empty(),
            )
        })?;
        let result = call_value(env, &thunk, &[])?;
        *self.cached.borrow_mut() = Some(result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn atom_cas_semantics() {
        let env = Env::bare();
        let atom = Atom::new(Value::Int(0));

        assert!(atom
            .compare_and_set(&env, &Value::Int(0), Value::Int(1))
            .unwrap());
        assert!(!atom
            .compare_and_set(&env, &Value::Int(0), Value::Int(2))
            .unwrap());
        assert_eq!(atom.deref(), Value::Int(1));
    }

    #[test]
    fn volatile_is_plain_storage() {
        let v = Volatile::new(Value::Nil);
        v.reset(Value::Int(9));
        assert_eq!(v.deref(), Value::Int(9));
    }
}
