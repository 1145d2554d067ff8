use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;

use crate::common::closure::Closure;
use crate::common::trace::Trace;
use crate::data::cell::{Atom, Delay, Volatile};
use crate::data::foreign::{ForeignFn, ForeignModule};
use crate::data::list::List;
use crate::data::map::{ArrayMap, TrieMap};
use crate::data::num::{self, BigDec};
use crate::data::protocol::{MultiFn, Protocol, ProtocolFn};
use crate::data::seq::{ArrayChunk, ChunkBuffer, ChunkedCons, Cons, LazySeq};
use crate::data::set::Set;
use crate::data::symbol::{Keyword, Symbol};
use crate::data::transient::{TransientMap, TransientSet, TransientVector};
use crate::data::vector::Vector;
use crate::env::var::Var;
use crate::env::Env;

/// The signature of a native routine. Natives that invoke user
/// functions do so back through `dispatch::call_value`, never by
/// poking an evaluator directly.
pub type NativeFn = fn(&Rc<Env>, &[Value]) -> Result<Value, Trace>;

/// A named native routine, callable like any function value.
pub struct Builtin {
    pub name: &'static str,
    pub f: NativeFn,
}

impl Debug for Builtin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

/// A compiled pattern. Equality is by source pattern:
/// two patterns built from the same text are the same value.
#[derive(Debug)]
pub struct Pattern {
    pub source: Rc<str>,
    pub regex: regex::Regex,
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Pattern, Trace> {
        let regex = regex::Regex::new(source).map_err(|e| {
            Trace::error(
                crate::common::trace::ErrorKind::ValueError,
                &format!("invalid pattern: {}", e),
                crate::common::span::Span::empty(),
            )
        })?;
        Ok(Pattern {
            source: Rc::from(source),
            regex,
        })
    }
}

/// What the language talks about. Everything an evaluator produces,
/// a var holds, or a collection contains is a `Value`.
///
/// Immediate variants (`Nil` through `Char`) are copied; everything
/// else is a reference-counted pointer, so cloning a `Value` is O(1)
/// and persistent collections can share structure freely.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(Rc<str>),
    Symbol(Rc<Symbol>),
    Keyword(Rc<Keyword>),

    // Persistent collections.
    List(Rc<List>),
    Vector(Rc<Vector>),
    /// Small maps: flat `[k v k v ...]`, up to eight entries.
    ArrayMap(Rc<ArrayMap>),
    /// Large maps: 32-way hash-array-mapped trie.
    HashMap(Rc<TrieMap>),
    Set(Rc<Set>),

    // Functions.
    Fn(Rc<Closure>),
    Builtin(Rc<Builtin>),
    Protocol(Rc<Protocol>),
    ProtocolFn(Rc<ProtocolFn>),
    MultiFn(Rc<MultiFn>),
    Var(Rc<Var>),

    // Reference cells.
    Atom(Rc<Atom>),
    Volatile(Rc<Volatile>),

    // Sequences.
    LazySeq(Rc<LazySeq>),
    Cons(Rc<Cons>),
    ChunkedCons(Rc<ChunkedCons>),
    ArrayChunk(Rc<ArrayChunk>),
    ChunkBuffer(Rc<ChunkBuffer>),

    // Single-owner mutable builders.
    TransientVector(Rc<TransientVector>),
    TransientMap(Rc<TransientMap>),
    TransientSet(Rc<TransientSet>),

    // The rest of the numeric tower.
    BigInt(Rc<BigInt>),
    Ratio(Rc<BigRational>),
    BigDec(Rc<BigDec>),

    Delay(Rc<Delay>),
    /// Reduction short-circuit marker.
    Reduced(Rc<Value>),
    Regex(Rc<Pattern>),

    // Opaque foreign code handles. Their evaluation semantics live
    // behind the foreign interface, not in the core.
    ForeignModule(Rc<ForeignModule>),
    ForeignFn(Rc<ForeignFn>),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn from_str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Keyword(crate::data::symbol::keyword(name))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Rc::new(Symbol::simple(name)))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(List::from_vec(items)))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(Vector::from_vec(items)))
    }

    /// Builds a map value, choosing the array-map representation for
    /// eight or fewer entries and the trie above that.
    pub fn map_from_pairs(pairs: Vec<(Value, Value)>) -> Value {
        if pairs.len() <= ArrayMap::MAX_ENTRIES {
            Value::ArrayMap(Rc::new(ArrayMap::from_pairs(pairs)))
        } else {
            let mut map = TrieMap::new();
            for (k, v) in pairs {
                map = map.assoc(k, v);
            }
            Value::HashMap(Rc::new(map))
        }
    }

    pub fn set_from_items(items: Vec<Value>) -> Value {
        Value::Set(Rc::new(Set::from_items(items)))
    }

    /// The canonical type key used by protocol and multimethod
    /// dispatch. Custom record types would carry their own name;
    /// every built-in variant maps to a fixed short string.
    pub fn type_key(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::ArrayMap(_) | Value::HashMap(_) => "map",
            Value::Set(_) => "set",
            Value::Fn(_) | Value::Builtin(_) => "fn",
            Value::Protocol(_) => "protocol",
            Value::ProtocolFn(_) => "protocol-fn",
            Value::MultiFn(_) => "multi-fn",
            Value::Var(_) => "var",
            Value::Atom(_) => "atom",
            Value::Volatile(_) => "volatile",
            Value::LazySeq(_) | Value::Cons(_) | Value::ChunkedCons(_) => "seq",
            Value::ArrayChunk(_) => "chunk",
            Value::ChunkBuffer(_) => "chunk-buffer",
            Value::TransientVector(_) => "transient-vector",
            Value::TransientMap(_) => "transient-map",
            Value::TransientSet(_) => "transient-set",
            Value::BigInt(_) => "big-integer",
            Value::Ratio(_) => "ratio",
            Value::BigDec(_) => "big-decimal",
            Value::Delay(_) => "delay",
            Value::Reduced(_) => "reduced",
            Value::Regex(_) => "regex",
            Value::ForeignModule(_) => "foreign-module",
            Value::ForeignFn(_) => "foreign-fn",
        }
    }

    /// Pointer identity, for `eq?`-style checks and identity caches.
    /// `None` for immediates, which have no identity.
    pub fn identity(&self) -> Option<usize> {
        let addr = match self {
            // Rc<str> is a wide pointer; identity is the data address
            Value::Str(r) => Rc::as_ptr(r) as *const u8 as usize,
            Value::Symbol(r) => Rc::as_ptr(r) as usize,
            Value::Keyword(r) => Rc::as_ptr(r) as usize,
            Value::List(r) => Rc::as_ptr(r) as usize,
            Value::Vector(r) => Rc::as_ptr(r) as usize,
            Value::ArrayMap(r) => Rc::as_ptr(r) as usize,
            Value::HashMap(r) => Rc::as_ptr(r) as usize,
            Value::Set(r) => Rc::as_ptr(r) as usize,
            Value::Fn(r) => Rc::as_ptr(r) as usize,
            Value::Builtin(r) => Rc::as_ptr(r) as usize,
            Value::Protocol(r) => Rc::as_ptr(r) as usize,
            Value::ProtocolFn(r) => Rc::as_ptr(r) as usize,
            Value::MultiFn(r) => Rc::as_ptr(r) as usize,
            Value::Var(r) => Rc::as_ptr(r) as usize,
            Value::Atom(r) => Rc::as_ptr(r) as usize,
            Value::Volatile(r) => Rc::as_ptr(r) as usize,
            Value::LazySeq(r) => Rc::as_ptr(r) as usize,
            Value::Cons(r) => Rc::as_ptr(r) as usize,
            Value::ChunkedCons(r) => Rc::as_ptr(r) as usize,
            Value::ArrayChunk(r) => Rc::as_ptr(r) as usize,
            Value::ChunkBuffer(r) => Rc::as_ptr(r) as usize,
            Value::TransientVector(r) => Rc::as_ptr(r) as usize,
            Value::TransientMap(r) => Rc::as_ptr(r) as usize,
            Value::TransientSet(r) => Rc::as_ptr(r) as usize,
            Value::BigInt(r) => Rc::as_ptr(r) as usize,
            Value::Ratio(r) => Rc::as_ptr(r) as usize,
            Value::BigDec(r) => Rc::as_ptr(r) as usize,
            Value::Delay(r) => Rc::as_ptr(r) as usize,
            Value::Reduced(r) => Rc::as_ptr(r) as usize,
            Value::Regex(r) => Rc::as_ptr(r) as usize,
            Value::ForeignModule(r) => Rc::as_ptr(r) as usize,
            Value::ForeignFn(r) => Rc::as_ptr(r) as usize,
            _ => return None,
        };
        Some(addr)
    }

    /// Strict structural equality: the relation collections key on.
    /// Floats compare by bit pattern here; metadata never counts.
    /// Consistent with `hash::hash_value`.
    pub fn eql(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => {
                slice_eql(a.items(), b.items())
            },
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len()
                    && (0..a.len()).all(|i| a.nth(i).eql(&b.nth(i)))
            },
            // The two map representations are one logical type.
            (Value::ArrayMap(_), Value::ArrayMap(_))
            | (Value::ArrayMap(_), Value::HashMap(_))
            | (Value::HashMap(_), Value::ArrayMap(_))
            | (Value::HashMap(_), Value::HashMap(_)) => map_eql(self, other),
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|item| b.contains(&item))
            },
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Ratio(a), Value::Ratio(b)) => a == b,
            (Value::BigDec(a), Value::BigDec(b)) => a == b,
            (Value::Reduced(a), Value::Reduced(b)) => a.eql(b),
            (Value::Regex(a), Value::Regex(b)) => a.source == b.source,
            (Value::ArrayChunk(a), Value::ArrayChunk(b)) => {
                slice_eql(a.window(), b.window())
            },
            (Value::Cons(a), Value::Cons(b)) => {
                a.head.eql(&b.head) && a.tail.eql(&b.tail)
            },
            // Identity-only variants.
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => {
                    std::mem::discriminant(self) == std::mem::discriminant(other)
                        && a == b
                },
                _ => false,
            },
        }
    }

    /// The user-visible `=`: like `eql`, except floats compare
    /// numerically (`0.0 = -0.0`, `NaN ≠ NaN`).
    pub fn equiv(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a == b,
            _ => self.eql(other),
        }
    }

    /// Numeric comparison along the promotion ladder; a type error
    /// for anything outside the numeric tower.
    pub fn compare_numeric(&self, other: &Value) -> Result<std::cmp::Ordering, Trace> {
        num::compare(self, other)
    }
}

fn slice_eql(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eql(y))
}

fn map_eql(a: &Value, b: &Value) -> bool {
    let (a_len, b_len) = (map_len(a), map_len(b));
    if a_len != b_len {
        return false;
    }
    map_pairs(a).iter().all(|(k, v)| {
        matches!(crate::data::map::get(b, k), Some(found) if found.eql(v))
    })
}

fn map_len(m: &Value) -> usize {
    match m {
        Value::ArrayMap(a) => a.len(),
        Value::HashMap(h) => h.len(),
        _ => unreachable!("map_len on a non-map"),
    }
}

fn map_pairs(m: &Value) -> Vec<(Value, Value)> {
    match m {
        Value::ArrayMap(a) => a.entries().to_vec(),
        Value::HashMap(h) => h.iter().collect(),
        _ => unreachable!("map_pairs on a non-map"),
    }
}

impl PartialEq for Value {
    /// Note: this is the language's structural equality,
    /// not Rust representation equality.
    fn eq(&self, other: &Self) -> bool {
        self.eql(other)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Char(c) => write!(f, "\\{}", c),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Keyword(k) => write!(f, "{}", k),
            Value::List(l) => {
                write!(f, "(")?;
                debug_join(f, l.items())?;
                write!(f, ")")
            },
            Value::Vector(v) => {
                write!(f, "[")?;
                debug_join(f, &v.to_vec())?;
                write!(f, "]")
            },
            Value::ArrayMap(_) | Value::HashMap(_) => {
                write!(f, "{{")?;
                let pairs = map_pairs(self);
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?} {:?}", k, v)?;
                }
                write!(f, "}}")
            },
            Value::Set(s) => {
                write!(f, "#{{")?;
                let items: Vec<Value> = s.iter().collect();
                debug_join(f, &items)?;
                write!(f, "}}")
            },
            Value::Fn(c) => write!(f, "#fn[{}]", c.trace_name()),
            Value::Builtin(b) => write!(f, "#builtin[{}]", b.name),
            Value::Protocol(p) => write!(f, "#protocol[{}]", p.name),
            Value::ProtocolFn(p) => {
                write!(f, "#protocol-fn[{}/{}]", p.protocol.name, p.method)
            },
            Value::MultiFn(m) => write!(f, "#multi-fn[{}]", m.name),
            Value::Var(v) => write!(f, "#'{}/{}", v.ns_name, v.name),
            Value::Atom(_) => write!(f, "#atom"),
            Value::Volatile(_) => write!(f, "#volatile"),
            Value::LazySeq(_) => write!(f, "#lazy-seq"),
            Value::Cons(c) => write!(f, "#cons[{:?}]", c.head),
            Value::ChunkedCons(_) => write!(f, "#chunked-cons"),
            Value::ArrayChunk(c) => write!(f, "#chunk[{}]", c.window().len()),
            Value::ChunkBuffer(_) => write!(f, "#chunk-buffer"),
            Value::TransientVector(_) => write!(f, "#transient-vector"),
            Value::TransientMap(_) => write!(f, "#transient-map"),
            Value::TransientSet(_) => write!(f, "#transient-set"),
            Value::BigInt(n) => write!(f, "{}N", n),
            Value::Ratio(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Value::BigDec(d) => write!(f, "{}M", d),
            Value::Delay(_) => write!(f, "#delay"),
            Value::Reduced(v) => write!(f, "#reduced[{:?}]", v),
            Value::Regex(p) => write!(f, "#\"{}\"", p.source),
            Value::ForeignModule(m) => write!(f, "#foreign-module[{}]", m.name),
            Value::ForeignFn(ff) => write!(f, "#foreign-fn[{}]", ff.name),
        }
    }
}

fn debug_join(f: &mut Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{:?}", item)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::from_str("").is_truthy());
        assert!(Value::list(vec![]).is_truthy());
    }

    #[test]
    fn float_key_equality_is_bitwise() {
        assert!(Value::Float(f64::NAN).eql(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).eql(&Value::Float(-0.0)));
        // ...but user `=` is numeric
        assert!(!Value::Float(f64::NAN).equiv(&Value::Float(f64::NAN)));
        assert!(Value::Float(0.0).equiv(&Value::Float(-0.0)));
    }

    #[test]
    fn array_map_equals_trie_map() {
        let small = Value::map_from_pairs(vec![
            (Value::keyword("a"), Value::Int(1)),
            (Value::keyword("b"), Value::Int(2)),
        ]);
        let mut trie = TrieMap::new();
        trie = trie.assoc(Value::keyword("b"), Value::Int(2));
        trie = trie.assoc(Value::keyword("a"), Value::Int(1));
        let large = Value::HashMap(Rc::new(trie));

        assert!(small.eql(&large));
        assert!(large.eql(&small));
    }

    #[test]
    fn closures_compare_by_identity() {
        let a = Value::keyword("x");
        assert!(a.identity().is_some());
        assert!(Value::Int(3).identity().is_none());
    }
}
