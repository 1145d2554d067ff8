use std::cell::RefCell;
use std::rc::Rc;

use crate::common::proto::FnProto;
use crate::compiler::node::WalkArity;
use crate::data::value::Value;

/// How a closure's body is represented: walked directly as a tree,
/// or compiled to bytecode. The two kinds are interchangeable at every
/// call site; the cross-backend dispatcher routes each to its
/// evaluator.
#[derive(Debug, Clone)]
pub enum FnRepr {
    /// Tree-walk arities, in declaration order.
    Walk(Vec<Rc<WalkArity>>),
    /// Compiled arities: the primary proto first, extras after.
    Code(Vec<Rc<FnProto>>),
}

/// Wraps a function prototype with the context it closed over.
/// This is the runtime function value: the thing `fn` evaluates to,
/// vars hold, and `call` invokes.
///
/// `captured` is a `RefCell` for exactly one reason: letfn patching,
/// which must point freshly made sibling closures at each other after
/// all of them exist. Everywhere else captures are written once at
/// creation.
#[derive(Debug)]
pub struct Closure {
    pub name: Option<Rc<str>>,
    pub repr: FnRepr,
    pub captured: RefCell<Vec<Value>>,
    /// Namespace the fn was defined in; var lookups inside the body
    /// resolve against it, not the caller's namespace.
    pub defining_ns: Rc<str>,
}

impl Closure {
    /// Constructs a new `Closure` by wrapping a representation
    /// with its captured values.
    pub fn wrap(
        name: Option<Rc<str>>,
        repr: FnRepr,
        captured: Vec<Value>,
        defining_ns: Rc<str>,
    ) -> Closure {
        Closure {
            name,
            repr,
            captured: RefCell::new(captured),
            defining_ns,
        }
    }

    /// Whether this closure runs on the bytecode backend.
    pub fn is_compiled(&self) -> bool {
        matches!(self.repr, FnRepr::Code(_))
    }

    /// The name to show in tracebacks.
    pub fn trace_name(&self) -> &str {
        self.name.as_deref().unwrap_or("fn")
    }
}
