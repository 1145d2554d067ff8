use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::map;
use crate::data::set::Set;
use crate::data::value::Value;
use crate::data::vector::Vector;

fn used_err() -> Trace {
    Trace::error(
        ErrorKind::ValueError,
        "transient used after persistent!",
        Span::empty(),
    )
}

/// A single-owner mutable builder for a persistent vector.
/// `persistent!` finalizes it exactly once; every operation after
/// that raises. Sharing a transient across threads is undefined.
#[derive(Debug)]
pub struct TransientVector {
    slots: RefCell<Vec<Value>>,
    consumed: Cell<bool>,
}

impl TransientVector {
    pub fn new() -> TransientVector {
        TransientVector {
            slots: RefCell::new(vec![]),
            consumed: Cell::new(false),
        }
    }

    pub fn from_vector(vector: &Vector) -> TransientVector {
        TransientVector {
            slots: RefCell::new(vector.to_vec()),
            consumed: Cell::new(false),
        }
    }

    fn check(&self) -> Result<(), Trace> {
        if self.consumed.get() {
            Err(used_err())
        } else {
            Ok(())
        }
    }

    pub fn conj(&self, value: Value) -> Result<(), Trace> {
        self.check()?;
        self.slots.borrow_mut().push(value);
        Ok(())
    }

    pub fn len(&self) -> Result<usize, Trace> {
        self.check()?;
        Ok(self.slots.borrow().len())
    }

    pub fn persistent(&self) -> Result<Vector, Trace> {
        self.check()?;
        self.consumed.set(true);
        Ok(Vector::from_vec(std::mem::take(
            &mut *self.slots.borrow_mut(),
        )))
    }
}

impl Default for TransientVector {
    fn default() -> Self {
        TransientVector::new()
    }
}

/// A single-owner mutable builder for a map. Holds either map
/// representation and promotes exactly like the persistent `assoc`.
#[derive(Debug)]
pub struct TransientMap {
    map: RefCell<Value>,
    consumed: Cell<bool>,
}

impl TransientMap {
    pub fn new() -> TransientMap {
        TransientMap {
            map: RefCell::new(Value::map_from_pairs(vec![])),
            consumed: Cell::new(false),
        }
    }

    pub fn from_map(map: &Value) -> TransientMap {
        TransientMap {
            map: RefCell::new(map.clone()),
            consumed: Cell::new(false),
        }
    }

    fn check(&self) -> Result<(), Trace> {
        if self.consumed.get() {
            Err(used_err())
        } else {
            Ok(())
        }
    }

    pub fn assoc(&self, key: Value, value: Value) -> Result<(), Trace> {
        self.check()?;
        let next = map::assoc(&self.map.borrow(), key, value);
        *self.map.borrow_mut() = next;
        Ok(())
    }

    pub fn dissoc(&self, key: &Value) -> Result<(), Trace> {
        self.check()?;
        let next = map::dissoc(&self.map.borrow(), key);
        *self.map.borrow_mut() = next;
        Ok(())
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, Trace> {
        self.check()?;
        Ok(map::get(&self.map.borrow(), key))
    }

    pub fn persistent(&self) -> Result<Value, Trace> {
        self.check()?;
        self.consumed.set(true);
        Ok(std::mem::replace(
            &mut *self.map.borrow_mut(),
            Value::Nil,
        ))
    }
}

impl Default for TransientMap {
    fn default() -> Self {
        TransientMap::new()
    }
}

/// A single-owner mutable builder for a set.
#[derive(Debug)]
pub struct TransientSet {
    set: RefCell<Rc<Set>>,
    consumed: Cell<bool>,
}

impl TransientSet {
    pub fn new() -> TransientSet {
        TransientSet {
            set: RefCell::new(Rc::new(Set::empty())),
            consumed: Cell::new(false),
        }
    }

    pub fn from_set(set: &Rc<Set>) -> TransientSet {
        TransientSet {
            set: RefCell::new(Rc::clone(set)),
            consumed: Cell::new(false),
        }
    }

    fn check(&self) -> Result<(), Trace> {
        if self.consumed.get() {
            Err(used_err())
        } else {
            Ok(())
        }
    }

    pub fn conj(&self, value: Value) -> Result<(), Trace> {
        self.check()?;
        let next = Rc::new(self.set.borrow().conj(value));
        *self.set.borrow_mut() = next;
        Ok(())
    }

    pub fn disj(&self, value: &Value) -> Result<(), Trace> {
        self.check()?;
        let next = Rc::new(self.set.borrow().disj(value));
        *self.set.borrow_mut() = next;
        Ok(())
    }

    pub fn persistent(&self) -> Result<Rc<Set>, Trace> {
        self.check()?;
        self.consumed.set(true);
        Ok(Rc::clone(&self.set.borrow()))
    }
}

impl Default for TransientSet {
    fn default() -> Self {
        TransientSet::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vector_builds_then_seals() {
        let t = TransientVector::new();
        for i in 0..1000 {
            t.conj(Value::Int(i)).unwrap();
        }
        let v = t.persistent().unwrap();
        assert_eq!(v.len(), 1000);
        assert_eq!(v.nth(999), Value::Int(999));

        let err = t.conj(Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert!(t.persistent().is_err());
    }

    #[test]
    fn map_builder_promotes_like_assoc() {
        let t = TransientMap::new();
        for i in 0..20 {
            t.assoc(Value::Int(i), Value::Int(i)).unwrap();
        }
        let m = t.persistent().unwrap();
        assert!(matches!(m, Value::HashMap(_)));
        assert_eq!(map::count(&m), 20);
    }

    #[test]
    fn set_builder() {
        let t = TransientSet::new();
        t.conj(Value::Int(1)).unwrap();
        t.conj(Value::Int(1)).unwrap();
        t.conj(Value::Int(2)).unwrap();
        let s = t.persistent().unwrap();
        assert_eq!(s.len(), 2);
        assert!(t.conj(Value::Int(3)).is_err());
    }
}
