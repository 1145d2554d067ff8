use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

/// A `Span` names the place a form came from: a file (if any), a line,
/// and a column. The analyzer attaches one to every node it lowers;
/// the bytecode generator copies them into per-instruction debug
/// arrays. A `Span` is meant to be paired with other datastructures,
/// to be used during error reporting.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Span {
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub column: u32,
}

impl Span {
    /// Create a new `Span` pointing into a named file.
    pub fn new(file: &Rc<str>, line: u32, column: u32) -> Span {
        Span {
            file: Some(Rc::clone(file)),
            line,
            column,
        }
    }

    /// A `Span` with a position but no file, e.g. forms typed at a repl.
    pub fn floating(line: u32, column: u32) -> Span {
        Span {
            file: None,
            line,
            column,
        }
    }

    /// Create a new empty `Span`.
    /// An empty `Span` carries no location;
    /// if combined with another `Span`, the resulting `Span` will just be the other.
    pub fn empty() -> Span {
        Span {
            file: None,
            line: 0,
            column: 0,
        }
    }

    /// Checks if a `Span` is empty.
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.line == 0 && self.column == 0
    }

    /// Picks the more informative of two `Span`s,
    /// preferring the first when both carry a location.
    pub fn or(&self, other: &Span) -> Span {
        if self.is_empty() {
            other.clone()
        } else {
            self.clone()
        }
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<unknown>");
        }

        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "<repl>:{}:{}", self.line, self.column),
        }
    }
}

/// A wrapper for spanning types.
/// For example, an evaluator node, such as
/// ```ignore
/// pub enum Node {
///     Constant(Value),
///     LocalRef(usize),
///     // ...
/// }
/// ```
/// can be spanned to indicate where it was analyzed from (a `Spanned<Node>`).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub item: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(item: T, span: Span) -> Spanned<T> {
        Spanned { item, span }
    }

    /// Wraps an item with an empty `Span`,
    /// for nodes synthesized by the runtime rather than read from source.
    pub fn bare(item: T) -> Spanned<T> {
        Spanned {
            item,
            span: Span::empty(),
        }
    }

    /// A destructive alias for `self.item`.
    pub fn into_item(self) -> T {
        self.item
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn preference() {
        let file: Rc<str> = Rc::from("core.clj");
        let a = Span::new(&file, 3, 9);
        let b = Span::empty();

        assert_eq!(b.or(&a), a);
        assert_eq!(a.or(&b), a);
    }

    #[test]
    fn display() {
        let file: Rc<str> = Rc::from("core.clj");
        assert_eq!(format!("{}", Span::new(&file, 12, 4)), "core.clj:12:4");
        assert_eq!(format!("{}", Span::floating(1, 1)), "<repl>:1:1");
        assert_eq!(format!("{}", Span::empty()), "<unknown>");
    }
}
