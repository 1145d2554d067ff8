use std::cell::RefCell;
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::map::{self, TrieMap};
use crate::data::value::Value;
use crate::dispatch::call_value;
use crate::env::Env;

/// A named capability: a fixed list of method signatures plus a table
/// of per-type implementations. Extending a type swaps the whole
/// impls map for a new persistent one; readers never see a partial
/// update. The core assumes one writer per protocol at a time.
#[derive(Debug)]
pub struct Protocol {
    pub name: Rc<str>,
    /// `(method-name, arity)` signatures, fixed at definition.
    pub sigs: Vec<(Rc<str>, usize)>,
    /// type key -> (method name -> fn value), both persistent maps.
    impls: RefCell<Value>,
}

impl Protocol {
    pub fn new(name: &str, sigs: Vec<(Rc<str>, usize)>) -> Protocol {
        Protocol {
            name: Rc::from(name),
            sigs,
            impls: RefCell::new(Value::map_from_pairs(vec![])),
        }
    }

    /// Installs (or replaces) one method implementation for a type.
    pub fn extend_method(&self, type_key: &str, method: &str, f: Value) {
        let impls = self.impls.borrow().clone();
        let key = Value::from_str(type_key);
        let methods = map::get(&impls, &key)
            .unwrap_or_else(|| Value::map_from_pairs(vec![]));
        let methods = map::assoc(&methods, Value::from_str(method), f);
        *self.impls.borrow_mut() = map::assoc(&impls, key, methods);
    }

    pub fn lookup(&self, type_key: &str, method: &str) -> Option<Value> {
        let impls = self.impls.borrow();
        let methods = map::get(&impls, &Value::from_str(type_key))?;
        map::get(&methods, &Value::from_str(method))
    }

    pub fn extends_type(&self, type_key: &str) -> bool {
        map::get(&self.impls.borrow(), &Value::from_str(type_key)).is_some()
    }
}

/// A first-class protocol method: dispatches on the type key of its
/// first argument, with a monomorphic inline cache in front of the
/// impls lookup.
#[derive(Debug)]
pub struct ProtocolFn {
    pub protocol: Rc<Protocol>,
    pub method: Rc<str>,
    cache: RefCell<Option<(&'static str, Value)>>,
}

impl ProtocolFn {
    pub fn new(protocol: Rc<Protocol>, method: &str) -> ProtocolFn {
        ProtocolFn {
            protocol,
            method: Rc::from(method),
            cache: RefCell::new(None),
        }
    }

    /// The method fn for `receiver`'s type, from the cache when the
    /// last call saw the same type.
    pub fn select(&self, receiver: &Value) -> Result<Value, Trace> {
        let type_key = receiver.type_key();

        if let Some((cached_key, cached_fn)) = &*self.cache.borrow() {
            if *cached_key == type_key {
                return Ok(cached_fn.clone());
            }
        }

        match self.protocol.lookup(type_key, &self.method) {
            Some(f) => {
                *self.cache.borrow_mut() = Some((type_key, f.clone()));
                Ok(f)
            },
            None => Err(Trace::error(
                ErrorKind::Type,
                &format!(
                    "no implementation of {}/{} for {}",
                    self.protocol.name, self.method, type_key
                ),
                Span::empty(),
            )),
        }
    }
}

/// Is `child` a `parent`, under an externally supplied hierarchy?
/// Equality first, then the hierarchy's ancestor sets, then
/// element-wise over equal-length vectors.
pub fn isa(hierarchy: &Value, child: &Value, parent: &Value) -> bool {
    if child.equiv(parent) {
        return true;
    }

    if let Some(ancestors) = map::get(hierarchy, &Value::keyword("ancestors")) {
        if let Some(Value::Set(set)) = map::get(&ancestors, child).as_ref() {
            if set.contains(parent) {
                return true;
            }
        }
    }

    if let (Value::Vector(c), Value::Vector(p)) = (child, parent) {
        if c.len() == p.len() {
            return (0..c.len()).all(|i| isa(hierarchy, &c.nth(i), &p.nth(i)));
        }
    }

    false
}

/// A multimethod: a dispatch function, a method table keyed by
/// dispatch value, and an optional hierarchy var for `isa?`-aware
/// lookup. Calls go through three cache levels: first-argument
/// identity, then dispatch value, then the structural table walk.
/// Any method-table update invalidates both caches.
#[derive(Debug)]
pub struct MultiFn {
    pub name: Rc<str>,
    pub dispatch_fn: Value,
    methods: RefCell<TrieMap>,
    pub hierarchy: RefCell<Option<Value>>,
    identity_cache: RefCell<Option<(usize, Value)>>,
    value_cache: RefCell<Option<(Value, Value)>>,
}

impl MultiFn {
    pub fn new(name: &str, dispatch_fn: Value) -> MultiFn {
        MultiFn {
            name: Rc::from(name),
            dispatch_fn,
            methods: RefCell::new(TrieMap::new()),
            hierarchy: RefCell::new(None),
            identity_cache: RefCell::new(None),
            value_cache: RefCell::new(None),
        }
    }

    pub fn add_method(&self, dispatch_value: Value, f: Value) {
        let next = self.methods.borrow().assoc(dispatch_value, f);
        *self.methods.borrow_mut() = next;
        self.invalidate();
    }

    fn invalidate(&self) {
        *self.identity_cache.borrow_mut() = None;
        *self.value_cache.borrow_mut() = None;
    }

    pub fn set_hierarchy(&self, hierarchy: Option<Value>) {
        *self.hierarchy.borrow_mut() = hierarchy;
        self.invalidate();
    }

    /// Resolves the method to invoke for `args`.
    pub fn select(&self, env: &Rc<Env>, args: &[Value]) -> Result<Value, Trace> {
        // Level one: same first argument as last time.
        if let (Some(first), Some((id, method))) =
            (args.first(), &*self.identity_cache.borrow())
        {
            if first.identity() == Some(*id) {
                return Ok(method.clone());
            }
        }

        let dispatch_value = call_value(env, &self.dispatch_fn, args)?;

        // Level two: same dispatch value as last time.
        if let Some((value, method)) = &*self.value_cache.borrow() {
            if value.eql(&dispatch_value) {
                return Ok(method.clone());
            }
        }

        // Level three: the table, exact then hierarchy then default.
        let method = self.structural_lookup(&dispatch_value).ok_or_else(|| {
            Trace::error(
                ErrorKind::ValueError,
                &format!(
                    "no method in {} for dispatch value {:?}",
                    self.name, dispatch_value
                ),
                Span::empty(),
            )
        })?;

        *self.value_cache.borrow_mut() =
            Some((dispatch_value, method.clone()));
        if let Some(id) = args.first().and_then(Value::identity) {
            *self.identity_cache.borrow_mut() = Some((id, method.clone()));
        }
        Ok(method)
    }

    fn structural_lookup(&self, dispatch_value: &Value) -> Option<Value> {
        let methods = self.methods.borrow();

        if let Some(exact) = methods.get(dispatch_value) {
            return Some(exact);
        }

        if let Some(hierarchy) = &*self.hierarchy.borrow() {
            let hierarchy = match hierarchy {
                Value::Var(var) => var.deref(),
                other => other.clone(),
            };
            for (candidate, method) in methods.iter() {
                if isa(&hierarchy, dispatch_value, &candidate) {
                    return Some(method);
                }
            }
        }

        methods.get(&Value::keyword("default"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn protocol_extension_and_cache() {
        let protocol =
            Rc::new(Protocol::new("Countable", vec![(Rc::from("size"), 1)]));
        let builtin = Value::Int(0); // stand-in; select only stores it
        protocol.extend_method("string", "size", builtin.clone());

        let pfn = ProtocolFn::new(Rc::clone(&protocol), "size");
        let found = pfn.select(&Value::from_str("hi")).unwrap();
        assert!(found.eql(&builtin));
        // second hit comes from the monomorphic cache
        let again = pfn.select(&Value::from_str("other")).unwrap();
        assert!(again.eql(&builtin));

        let miss = pfn.select(&Value::Int(1)).unwrap_err();
        assert_eq!(miss.kind, ErrorKind::Type);
    }

    #[test]
    fn isa_consults_ancestors() {
        let hierarchy = Value::map_from_pairs(vec![(
            Value::keyword("ancestors"),
            Value::map_from_pairs(vec![(
                Value::keyword("circle"),
                Value::set_from_items(vec![Value::keyword("shape")]),
            )]),
        )]);

        assert!(isa(&hierarchy, &Value::keyword("circle"), &Value::keyword("shape")));
        assert!(isa(&hierarchy, &Value::keyword("circle"), &Value::keyword("circle")));
        assert!(!isa(&hierarchy, &Value::keyword("shape"), &Value::keyword("circle")));
    }

    #[test]
    fn method_updates_invalidate_caches() {
        use crate::env::Env;

        let env = Env::bare();
        let multi = MultiFn::new("area", Value::keyword("shape"));
        multi.add_method(Value::keyword("circle"), Value::Int(1));

        let circle = Value::map_from_pairs(vec![(
            Value::keyword("shape"),
            Value::keyword("circle"),
        )]);
        assert!(multi.select(&env, &[circle.clone()]).unwrap().eql(&Value::Int(1)));
        // identity cache is hot now; a replacement must evict it
        multi.add_method(Value::keyword("circle"), Value::Int(2));
        assert!(multi.select(&env, &[circle]).unwrap().eql(&Value::Int(2)));

        // no match and no default is an error...
        let blob = Value::map_from_pairs(vec![(
            Value::keyword("shape"),
            Value::keyword("blob"),
        )]);
        assert!(multi.select(&env, &[blob.clone()]).is_err());
        // ...until a default method lands
        multi.add_method(Value::keyword("default"), Value::Int(0));
        assert!(multi.select(&env, &[blob]).unwrap().eql(&Value::Int(0)));
    }

    #[test]
    fn vector_isa_is_elementwise() {
        let hierarchy = Value::map_from_pairs(vec![(
            Value::keyword("ancestors"),
            Value::map_from_pairs(vec![(
                Value::keyword("circle"),
                Value::set_from_items(vec![Value::keyword("shape")]),
            )]),
        )]);

        let child = Value::vector(vec![
            Value::keyword("circle"),
            Value::keyword("circle"),
        ]);
        let parent = Value::vector(vec![
            Value::keyword("shape"),
            Value::keyword("circle"),
        ]);
        assert!(isa(&hierarchy, &child, &parent));
        assert!(!isa(&hierarchy, &parent, &child));
    }
}
