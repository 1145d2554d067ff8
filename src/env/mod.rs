//! Namespaces, vars, and the process-wide environment, plus the
//! per-thread slots the evaluators share (last thrown exception,
//! the apply-rest flag).

pub mod namespace;
pub mod var;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;
use crate::env::namespace::Namespace;
use crate::env::var::Var;
use crate::gc::Collector;

pub const CORE_NS: &str = "corvine.core";

/// The process-wide environment: the namespace table, the current
/// namespace, and an optional collector handle. Created at process
/// start, populated by the builtin registry, mutated by `def` and
/// `require` throughout execution.
pub struct Env {
    namespaces: RefCell<HashMap<Rc<str>, Rc<Namespace>>>,
    current: RefCell<Rc<Namespace>>,
    pub collector: RefCell<Option<Rc<dyn Collector>>>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Env(current: {})", self.current.borrow().name)
    }
}

impl Env {
    /// An environment with only an empty `user` namespace:
    /// no builtins, no printer vars. Mostly for tests; embedders
    /// want [`crate::boot`].
    pub fn bare() -> Rc<Env> {
        let user = Rc::new(Namespace::new("user"));
        let mut namespaces = HashMap::new();
        namespaces.insert(Rc::clone(&user.name), Rc::clone(&user));
        Rc::new(Env {
            namespaces: RefCell::new(namespaces),
            current: RefCell::new(user),
            collector: RefCell::new(None),
        })
    }

    pub fn find_namespace(&self, name: &str) -> Option<Rc<Namespace>> {
        self.namespaces.borrow().get(name).map(Rc::clone)
    }

    pub fn find_or_create_namespace(&self, name: &str) -> Rc<Namespace> {
        if let Some(existing) = self.find_namespace(name) {
            return existing;
        }
        let ns = Rc::new(Namespace::new(name));
        self.namespaces
            .borrow_mut()
            .insert(Rc::clone(&ns.name), Rc::clone(&ns));
        tracing::trace!(ns = name, "created namespace");
        ns
    }

    pub fn current_ns(&self) -> Rc<Namespace> {
        Rc::clone(&self.current.borrow())
    }

    pub fn set_current_ns(&self, ns: Rc<Namespace>) {
        *self.current.borrow_mut() = ns;
    }

    pub fn namespace_names(&self) -> Vec<Rc<str>> {
        self.namespaces.borrow().keys().map(Rc::clone).collect()
    }

    /// Resolves a possibly-qualified name against the current
    /// namespace: unqualified names search interns then refers;
    /// qualified names try the alias table first, then the namespace
    /// registry by full name.
    pub fn resolve(&self, ns: Option<&str>, name: &str) -> Option<Rc<Var>> {
        let current = self.current_ns();
        match ns {
            None => current.resolve(name),
            Some(qualifier) => {
                if let Some(var) = current.resolve_qualified(qualifier, name) {
                    return Some(var);
                }
                self.find_namespace(qualifier)
                    .and_then(|target| target.resolve(name))
            },
        }
    }

    /// Like `resolve`, but an `undefined-var` error on a miss or an
    /// unbound hit, annotated with `span`.
    pub fn resolve_value(
        &self,
        ns: Option<&str>,
        name: &str,
        span: &Span,
    ) -> Result<Value, Trace> {
        let var = self.resolve(ns, name).ok_or_else(|| {
            Trace::error(
                ErrorKind::UndefinedVar,
                &format!("unable to resolve var {}", qualify(ns, name)),
                span.clone(),
            )
        })?;
        if !var.is_bound() {
            return Err(Trace::error(
                ErrorKind::UndefinedVar,
                &format!("var {} is unbound", qualify(ns, name)),
                span.clone(),
            ));
        }
        Ok(var.deref())
    }
}

fn qualify(ns: Option<&str>, name: &str) -> String {
    match ns {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

thread_local! {
    /// The value most recently raised by `throw` on this thread.
    /// The `Trace` carries the value too; this slot exists so the
    /// other backend (and the GC root walk) can reach it without
    /// holding the in-flight error.
    static LAST_THROWN: RefCell<Option<Value>> = const { RefCell::new(None) };

    /// Set by `apply` so the variadic packer does not rewrap a rest
    /// argument that is already a seq. Cleared on consumption.
    static APPLY_REST_SEQ: Cell<bool> = const { Cell::new(false) };

    /// The trace an active `catch`/`finally` is handling. A `throw`
    /// of that same exception value re-raises the original trace
    /// (with its original kind) instead of minting a user exception.
    static PENDING_RETHROW: RefCell<Option<Trace>> = const { RefCell::new(None) };
}

pub fn set_last_thrown(value: Option<Value>) {
    LAST_THROWN.with(|slot| *slot.borrow_mut() = value);
}

pub fn take_last_thrown() -> Option<Value> {
    LAST_THROWN.with(|slot| slot.borrow_mut().take())
}

pub fn peek_last_thrown() -> Option<Value> {
    LAST_THROWN.with(|slot| slot.borrow().clone())
}

pub fn set_apply_rest_seq() {
    APPLY_REST_SEQ.with(|flag| flag.set(true));
}

/// Reads and clears the flag: at most one variadic pack sees it.
pub fn take_apply_rest_seq() -> bool {
    APPLY_REST_SEQ.with(|flag| flag.replace(false))
}

pub fn set_pending_rethrow(trace: Trace) {
    PENDING_RETHROW.with(|slot| *slot.borrow_mut() = Some(trace));
}

pub fn take_pending_rethrow() -> Option<Trace> {
    PENDING_RETHROW.with(|slot| slot.borrow_mut().take())
}

/// Clears the per-thread slots; called on evaluator shutdown.
pub fn reset_thread_state() {
    set_last_thrown(None);
    APPLY_REST_SEQ.with(|flag| flag.set(false));
    PENDING_RETHROW.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_walks_the_registry() {
        let env = Env::bare();
        let geom = env.find_or_create_namespace("geom");
        let area = geom.intern("area");
        area.bind_root(Value::Int(7));

        // fully qualified name, no alias needed
        assert_eq!(
            env.resolve_value(Some("geom"), "area", &Span::empty()).unwrap(),
            Value::Int(7)
        );

        // alias resolution wins over the registry
        env.current_ns().set_alias("g", geom);
        assert_eq!(
            env.resolve_value(Some("g"), "area", &Span::empty()).unwrap(),
            Value::Int(7)
        );

        let missing = env
            .resolve_value(None, "nope", &Span::empty())
            .unwrap_err();
        assert_eq!(missing.kind, ErrorKind::UndefinedVar);
    }

    #[test]
    fn unbound_vars_do_not_resolve_to_values() {
        let env = Env::bare();
        env.current_ns().intern("declared");
        let err = env
            .resolve_value(None, "declared", &Span::empty())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedVar);
    }

    #[test]
    fn apply_flag_clears_on_read() {
        set_apply_rest_seq();
        assert!(take_apply_rest_seq());
        assert!(!take_apply_rest_seq());
    }
}
