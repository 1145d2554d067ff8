use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;
use crate::dispatch::call_value;
use crate::env::Env;

/// A lazy sequence: a zero-argument thunk and a one-slot cache.
/// The first force runs the thunk, stores the result, and drops the
/// thunk reference; every later force returns the cache. Realization
/// is not synchronized; callers racing an unrealized seq from two
/// threads must serialize outside the core.
#[derive(Debug)]
pub struct LazySeq {
    thunk: RefCell<Option<Value>>,
    realized: RefCell<Option<Value>>,
}

impl LazySeq {
    pub fn new(thunk: Value) -> LazySeq {
        LazySeq {
            thunk: RefCell::new(Some(thunk)),
            realized: RefCell::new(None),
        }
    }

    pub fn is_realized(&self) -> bool {
        self.realized.borrow().is_some()
    }

    /// The realized value, forcing the thunk on first use.
    pub fn force(&self, env: &Rc<Env>) -> Result<Value, Trace> {
        if let Some(cached) = &*self.realized.borrow() {
            return Ok(cached.clone());
        }

        let thunk = self.thunk.borrow_mut().take().ok_or_else(|| {
            Trace::error(
                ErrorKind::ValueError,
                "lazy seq forced itself while realizing",
                Span::empty(),
            )
        })?;

        let result = call_value(env, &thunk, &[])?;
        *self.realized.borrow_mut() = Some(result.clone());
        Ok(result)
    }
}

/// A cons cell: a head and anything seq-producing as the tail.
#[derive(Debug)]
pub struct Cons {
    pub head: Value,
    pub tail: Value,
}

/// A slice view over a realized run of values. `off` lets `next`
/// drop a prefix without copying the run.
#[derive(Debug)]
pub struct ArrayChunk {
    items: Rc<[Value]>,
    off: usize,
}

impl ArrayChunk {
    pub fn new(items: Rc<[Value]>, off: usize) -> ArrayChunk {
        ArrayChunk { items, off }
    }

    pub fn from_vec(items: Vec<Value>) -> ArrayChunk {
        ArrayChunk {
            items: items.into(),
            off: 0,
        }
    }

    /// The live window: everything at or past `off`.
    pub fn window(&self) -> &[Value] {
        self.items.get(self.off..).unwrap_or(&[])
    }

    pub fn first(&self) -> Option<Value> {
        self.window().first().cloned()
    }

    /// The chunk advanced by one, sharing the backing run.
    pub fn advance(&self) -> Option<ArrayChunk> {
        if self.window().len() > 1 {
            Some(ArrayChunk {
                items: Rc::clone(&self.items),
                off: self.off + 1,
            })
        } else {
            None
        }
    }
}

/// A builder for an [`ArrayChunk`]; single-pass by design.
/// `finish` hands the buffered values over and seals the buffer.
#[derive(Debug)]
pub struct ChunkBuffer {
    items: RefCell<Vec<Value>>,
    consumed: Cell<bool>,
}

impl ChunkBuffer {
    pub fn new() -> ChunkBuffer {
        ChunkBuffer {
            items: RefCell::new(vec![]),
            consumed: Cell::new(false),
        }
    }

    fn check(&self) -> Result<(), Trace> {
        if self.consumed.get() {
            Err(Trace::error(
                ErrorKind::ValueError,
                "chunk buffer used after finish",
                Span::empty(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn add(&self, value: Value) -> Result<(), Trace> {
        self.check()?;
        self.items.borrow_mut().push(value);
        Ok(())
    }

    pub fn finish(&self) -> Result<ArrayChunk, Trace> {
        self.check()?;
        self.consumed.set(true);
        Ok(ArrayChunk::from_vec(std::mem::take(
            &mut *self.items.borrow_mut(),
        )))
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        ChunkBuffer::new()
    }
}

/// A cons whose head is a whole chunk: `first` reads the chunk,
/// `next` walks within it, and only when the chunk runs dry does the
/// underlying "more" sequence get touched.
#[derive(Debug)]
pub struct ChunkedCons {
    pub chunk: Rc<ArrayChunk>,
    pub more: Value,
}

/// Canonicalizes a value into a seq, or `nil` when it is empty.
/// Forcing happens here: a lazy seq's thunk runs at most once, and
/// whatever it returned is seq'd in turn.
pub fn seq(env: &Rc<Env>, value: &Value) -> Result<Value, Trace> {
    match value {
        Value::Nil => Ok(Value::Nil),
        Value::List(l) => {
            if l.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(value.clone())
            }
        },
        Value::Vector(v) => {
            if v.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(Value::ArrayChunk(Rc::new(ArrayChunk::from_vec(v.to_vec()))))
            }
        },
        Value::Str(s) => {
            if s.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(Value::list(s.chars().map(Value::Char).collect()))
            }
        },
        Value::ArrayMap(_) | Value::HashMap(_) => {
            let pairs: Vec<Value> = match value {
                Value::ArrayMap(m) => m
                    .entries()
                    .iter()
                    .map(|(k, v)| Value::vector(vec![k.clone(), v.clone()]))
                    .collect(),
                Value::HashMap(m) => m
                    .iter()
                    .map(|(k, v)| Value::vector(vec![k, v]))
                    .collect(),
                _ => unreachable!(),
            };
            if pairs.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(Value::list(pairs))
            }
        },
        Value::Set(s) => {
            let items: Vec<Value> = s.iter().collect();
            if items.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(Value::list(items))
            }
        },
        Value::Cons(_) | Value::ChunkedCons(_) => Ok(value.clone()),
        Value::ArrayChunk(c) => {
            if c.window().is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(value.clone())
            }
        },
        Value::LazySeq(l) => {
            let forced = l.force(env)?;
            seq(env, &forced)
        },
        other => Err(Trace::error(
            ErrorKind::Type,
            &format!("{} is not seqable", other.type_key()),
            Span::empty(),
        )),
    }
}

/// The first element of a seqable value, `nil` when empty.
pub fn first(env: &Rc<Env>, value: &Value) -> Result<Value, Trace> {
    match seq(env, value)? {
        Value::Nil => Ok(Value::Nil),
        Value::List(l) => Ok(l.first().cloned().unwrap_or(Value::Nil)),
        Value::Cons(c) => Ok(c.head.clone()),
        Value::ArrayChunk(c) => Ok(c.first().unwrap_or(Value::Nil)),
        Value::ChunkedCons(c) => Ok(c.chunk.first().unwrap_or(Value::Nil)),
        other => unreachable!("seq produced a non-seq: {:?}", other),
    }
}

/// The seq past the first element, `nil` when exhausted.
pub fn next(env: &Rc<Env>, value: &Value) -> Result<Value, Trace> {
    match seq(env, value)? {
        Value::Nil => Ok(Value::Nil),
        Value::List(l) => {
            let rest = l.rest();
            if rest.is_empty() {
                Ok(Value::Nil)
            } else {
                Ok(Value::List(Rc::new(rest)))
            }
        },
        Value::Cons(c) => seq(env, &c.tail),
        Value::ArrayChunk(c) => match c.advance() {
            Some(advanced) => Ok(Value::ArrayChunk(Rc::new(advanced))),
            None => Ok(Value::Nil),
        },
        Value::ChunkedCons(c) => match c.chunk.advance() {
            Some(advanced) => Ok(Value::ChunkedCons(Rc::new(ChunkedCons {
                chunk: Rc::new(advanced),
                more: c.more.clone(),
            }))),
            None => seq(env, &c.more),
        },
        other => unreachable!("seq produced a non-seq: {:?}", other),
    }
}

/// Realizes a whole seq into a vector. Diverges on infinite seqs,
/// exactly like the operations built on it.
pub fn realize(env: &Rc<Env>, value: &Value) -> Result<Vec<Value>, Trace> {
    let mut out = vec![];
    let mut cursor = seq(env, value)?;
    while !cursor.is_nil() {
        out.push(first(env, &cursor)?);
        cursor = next(env, &cursor)?;
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::env::Env;

    #[test]
    fn chunk_windows() {
        let chunk =
            ArrayChunk::from_vec(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(chunk.first(), Some(Value::Int(1)));

        let advanced = chunk.advance().unwrap();
        assert_eq!(advanced.window(), &[Value::Int(2), Value::Int(3)]);
        // the original window is unchanged
        assert_eq!(chunk.window().len(), 3);

        let last = advanced.advance().unwrap();
        assert_eq!(last.advance().map(|c| c.window().len()), None);
    }

    #[test]
    fn chunk_buffer_is_single_pass() {
        let buffer = ChunkBuffer::new();
        buffer.add(Value::Int(1)).unwrap();
        buffer.add(Value::Int(2)).unwrap();
        let chunk = buffer.finish().unwrap();
        assert_eq!(chunk.window().len(), 2);
        assert!(buffer.add(Value::Int(3)).is_err());
        assert!(buffer.finish().is_err());
    }

    #[test]
    fn walking_plain_collections() {
        let env = Env::bare();
        let v = Value::vector(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(first(&env, &v).unwrap(), Value::Int(1));

        let rest = next(&env, &v).unwrap();
        assert_eq!(first(&env, &rest).unwrap(), Value::Int(2));
        assert_eq!(next(&env, &rest).unwrap(), Value::Nil);

        assert_eq!(
            realize(&env, &Value::from_str("ab")).unwrap(),
            vec![Value::Char('a'), Value::Char('b')]
        );
    }

    #[test]
    fn chunked_cons_falls_through_to_more() {
        let env = Env::bare();
        let chunked = Value::ChunkedCons(Rc::new(ChunkedCons {
            chunk: Rc::new(ArrayChunk::from_vec(vec![Value::Int(1)])),
            more: Value::list(vec![Value::Int(2)]),
        }));
        assert_eq!(
            realize(&env, &chunked).unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );
    }
}
