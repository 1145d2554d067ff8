use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use crate::data::hash::{hash_str, mix};
use crate::data::value::Value;

/// A symbol: an optional namespace part and a name.
/// Symbols are compared by `(ns, name)`; unlike keywords
/// they are not interned, and they may carry metadata.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
    pub meta: RefCell<Option<Value>>,
}

impl Symbol {
    pub fn simple(name: &str) -> Symbol {
        Symbol {
            ns: None,
            name: Rc::from(name),
            meta: RefCell::new(None),
        }
    }

    pub fn qualified(ns: &str, name: &str) -> Symbol {
        Symbol {
            ns: Some(Rc::from(ns)),
            name: Rc::from(name),
            meta: RefCell::new(None),
        }
    }

    pub fn hash(&self) -> u32 {
        let ns = self.ns.as_deref().unwrap_or("");
        mix(hash_str(ns) ^ hash_str(&self.name).rotate_left(7))
    }
}

impl PartialEq for Symbol {
    /// Identity is `(ns, name)`; metadata is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.name == other.name
    }
}

impl Eq for Symbol {}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A keyword: like a symbol, but canonical. Keywords are interned
/// by `(ns, name)` in a per-thread table, so pointer equality is
/// sufficient and the structural hash can be computed once.
#[derive(Debug)]
pub struct Keyword {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
    hash: u32,
}

impl Keyword {
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        // Interned: one canonical cell per (ns, name).
        std::ptr::eq(self, other)
    }
}

impl Eq for Keyword {}

impl Display for Keyword {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, ":{}/{}", ns, self.name),
            None => write!(f, ":{}", self.name),
        }
    }
}

thread_local! {
    static KEYWORDS: RefCell<HashMap<(Option<Rc<str>>, Rc<str>), Rc<Keyword>>> =
        RefCell::new(HashMap::new());
}

/// Returns the canonical keyword for `(ns, name)`,
/// interning it on first use.
pub fn intern_keyword(ns: Option<&str>, name: &str) -> Rc<Keyword> {
    KEYWORDS.with(|table| {
        let mut table = table.borrow_mut();
        let key = (ns.map(Rc::from), Rc::from(name));
        if let Some(existing) = table.get(&key) {
            return Rc::clone(existing);
        }

        let hash = {
            let ns = ns.unwrap_or("");
            // offset keywords away from the same-named symbol
            mix(hash_str(ns) ^ hash_str(name).rotate_left(7) ^ 0x9e37_79b9)
        };
        let keyword = Rc::new(Keyword {
            ns: key.0.clone(),
            name: Rc::clone(&key.1),
            hash,
        });
        table.insert(key, Rc::clone(&keyword));
        keyword
    })
}

/// Shorthand for an unqualified keyword value.
pub fn keyword(name: &str) -> Rc<Keyword> {
    intern_keyword(None, name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keywords_are_canonical() {
        let a = intern_keyword(None, "shape");
        let b = intern_keyword(None, "shape");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.hash(), b.hash());

        let qualified = intern_keyword(Some("geom"), "shape");
        assert!(!Rc::ptr_eq(&a, &qualified));
    }

    #[test]
    fn symbols_compare_by_parts() {
        let a = Symbol::qualified("user", "x");
        let b = Symbol::qualified("user", "x");
        let c = Symbol::simple("x");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{}", a), "user/x");
        assert_eq!(format!("{}", c), "x");
    }

    #[test]
    fn keyword_hash_differs_from_symbol() {
        let k = keyword("x");
        let s = Symbol::simple("x");
        assert_ne!(k.hash(), s.hash());
    }
}
