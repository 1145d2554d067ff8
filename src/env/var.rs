use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;

/// A named mutable reference cell interned in a namespace: a root
/// binding plus a stack of dynamic bindings pushed by `binding`
/// forms. The stack is per-thread in spirit; the core runs one
/// evaluator per OS thread, so it lives on the var itself.
#[derive(Debug)]
pub struct Var {
    pub ns_name: Rc<str>,
    pub name: Rc<str>,
    root: RefCell<Value>,
    bound: Cell<bool>,
    pub macro_flag: Cell<bool>,
    pub dynamic: Cell<bool>,
    pub private: Cell<bool>,
    bindings: RefCell<Vec<Value>>,
}

impl Var {
    pub fn unbound(ns_name: &Rc<str>, name: &str) -> Var {
        Var {
            ns_name: Rc::clone(ns_name),
            name: Rc::from(name),
            root: RefCell::new(Value::Nil),
            bound: Cell::new(false),
            macro_flag: Cell::new(false),
            dynamic: Cell::new(false),
            private: Cell::new(false),
            bindings: RefCell::new(vec![]),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get() || !self.bindings.borrow().is_empty()
    }

    /// Replaces the root binding.
    pub fn bind_root(&self, value: Value) {
        *self.root.borrow_mut() = value;
        self.bound.set(true);
    }

    /// The top dynamic binding if any, else the root.
    pub fn deref(&self) -> Value {
        match self.bindings.borrow().last() {
            Some(top) => top.clone(),
            None => self.root.borrow().clone(),
        }
    }

    pub fn push_binding(&self, value: Value) {
        self.bindings.borrow_mut().push(value);
    }

    pub fn pop_binding(&self) -> Result<(), Trace> {
        match self.bindings.borrow_mut().pop() {
            Some(_) => Ok(()),
            None => Err(Trace::error(
                ErrorKind::ValueError,
                &format!("no binding frame to pop on {}/{}", self.ns_name, self.name),
                Span::empty(),
            )),
        }
    }

    /// `set!`: mutate the top thread binding; an error without one.
    pub fn set_top(&self, value: Value) -> Result<(), Trace> {
        match self.bindings.borrow_mut().last_mut() {
            Some(top) => {
                *top = value;
                Ok(())
            },
            None => Err(Trace::error(
                ErrorKind::ValueError,
                &format!(
                    "can't set! {}/{} outside a binding frame",
                    self.ns_name, self.name
                ),
                Span::empty(),
            )),
        }
    }

    /// The live dynamic bindings, exposed for GC root collection.
    pub fn binding_values(&self) -> Vec<Value> {
        self.bindings.borrow().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn var() -> Var {
        Var::unbound(&Rc::from("user"), "x")
    }

    #[test]
    fn root_and_dynamic_stack() {
        let v = var();
        assert!(!v.is_bound());
        v.bind_root(Value::Int(1));
        assert_eq!(v.deref(), Value::Int(1));

        v.push_binding(Value::Int(2));
        assert_eq!(v.deref(), Value::Int(2));
        v.set_top(Value::Int(3)).unwrap();
        assert_eq!(v.deref(), Value::Int(3));
        v.pop_binding().unwrap();
        assert_eq!(v.deref(), Value::Int(1));
    }

    #[test]
    fn set_without_frame_is_an_error() {
        let v = var();
        v.bind_root(Value::Int(1));
        let err = v.set_top(Value::Int(9)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert!(v.pop_binding().is_err());
    }
}
