use std::cell::RefCell;

use crate::common::span::Span;
use crate::data::value::Value;

/// A persistent list: a contiguous immutable run of values.
///
/// Lists double as code during macroexpansion, so alongside the
/// elements a list may carry a parallel array of per-element source
/// positions. Transformations that rebuild a form copy the positions
/// over, so errors in expanded code still point at what the user
/// wrote.
#[derive(Debug)]
pub struct List {
    items: Vec<Value>,
    positions: Option<Vec<Span>>,
    pub meta: RefCell<Option<Value>>,
}

impl List {
    pub fn empty() -> List {
        List::from_vec(vec![])
    }

    pub fn from_vec(items: Vec<Value>) -> List {
        List {
            items,
            positions: None,
            meta: RefCell::new(None),
        }
    }

    /// A list whose elements remember where they were read from.
    pub fn with_positions(items: Vec<Value>, positions: Vec<Span>) -> List {
        debug_assert_eq!(items.len(), positions.len());
        List {
            items,
            positions: Some(positions),
            meta: RefCell::new(None),
        }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&Value> {
        self.items.first()
    }

    /// The list without its first element, positions carried along.
    pub fn rest(&self) -> List {
        List {
            items: self.items.get(1..).unwrap_or(&[]).to_vec(),
            positions: self
                .positions
                .as_ref()
                .map(|p| p.get(1..).unwrap_or(&[]).to_vec()),
            meta: RefCell::new(None),
        }
    }

    /// Prepend; a list conj grows at the head.
    pub fn conj(&self, value: Value) -> List {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.push(value);
        items.extend(self.items.iter().cloned());
        let positions = self.positions.as_ref().map(|p| {
            let mut positions = Vec::with_capacity(p.len() + 1);
            positions.push(Span::empty());
            positions.extend(p.iter().cloned());
            positions
        });
        List {
            items,
            positions,
            meta: RefCell::new(None),
        }
    }

    pub fn position(&self, index: usize) -> Option<&Span> {
        self.positions.as_ref().and_then(|p| p.get(index))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conj_prepends() {
        let base = List::from_vec(vec![Value::Int(2), Value::Int(3)]);
        let grown = base.conj(Value::Int(1));

        assert_eq!(grown.items(), &[Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(base.items(), &[Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn positions_follow_rest() {
        let file: std::rc::Rc<str> = std::rc::Rc::from("macro.clj");
        let list = List::with_positions(
            vec![Value::symbol("when"), Value::Int(1)],
            vec![Span::new(&file, 1, 2), Span::new(&file, 1, 8)],
        );

        let rest = list.rest();
        assert_eq!(rest.position(0), Some(&Span::new(&file, 1, 8)));
    }
}
