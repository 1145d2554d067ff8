use std::rc::Rc;

use crate::common::proto::AritySpec;
use crate::common::span::Spanned;
use crate::data::value::Value;

/// The analyzed tree the evaluators consume. The analyzer has
/// already resolved every local to a slot index and classified every
/// `recur` as loop-level or fn-level; the core only executes.
///
/// Slot layout within a function frame:
/// `captures..., self?, params..., rest?, lets...`, identical for
/// the tree-walk and bytecode backends.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A pre-evaluated constant.
    Constant(Value),
    /// An indexed read from the local stack.
    LocalRef(usize),
    /// A var lookup, optionally namespace-qualified.
    VarRef {
        ns: Option<Rc<str>>,
        name: Rc<str>,
    },
    If {
        test: Box<Spanned<Node>>,
        then: Box<Spanned<Node>>,
        els: Option<Box<Spanned<Node>>>,
    },
    Do(Vec<Spanned<Node>>),
    Let {
        bindings: Vec<Binding>,
        body: Box<Spanned<Node>>,
    },
    /// Mutually recursive fns: all closures are created first, then
    /// each has its sibling captures patched in.
    LetFn {
        bindings: Vec<Binding>,
        body: Box<Spanned<Node>>,
    },
    Fn(FnDef),
    Call {
        callee: Box<Spanned<Node>>,
        args: Vec<Spanned<Node>>,
    },
    Def {
        name: Rc<str>,
        init: Option<Box<Spanned<Node>>>,
        macro_flag: bool,
        dynamic: bool,
        private: bool,
    },
    SetBang {
        ns: Option<Rc<str>>,
        name: Rc<str>,
        expr: Box<Spanned<Node>>,
    },
    Loop {
        bindings: Vec<Binding>,
        body: Box<Spanned<Node>>,
    },
    Recur {
        kind: RecurKind,
        /// First slot to rebind: the loop's binding base, or the
        /// enclosing arity's parameter base.
        base: usize,
        args: Vec<Spanned<Node>>,
    },
    Quote(Value),
    Throw(Box<Spanned<Node>>),
    Try {
        body: Box<Spanned<Node>>,
        catch: Option<CatchClause>,
        finally: Option<Box<Spanned<Node>>>,
    },
    DefProtocol {
        name: Rc<str>,
        sigs: Vec<(Rc<str>, usize)>,
    },
    ExtendType {
        type_key: Rc<str>,
        protocol: Box<Spanned<Node>>,
        methods: Vec<(Rc<str>, Spanned<Node>)>,
    },
    DefMulti {
        name: Rc<str>,
        dispatch: Box<Spanned<Node>>,
        hierarchy: Option<Box<Spanned<Node>>>,
    },
    DefMethod {
        name: Rc<str>,
        dispatch_value: Box<Spanned<Node>>,
        method: Box<Spanned<Node>>,
    },
    /// `lazy-seq`: the body becomes a zero-argument closure wrapped
    /// in a lazy sequence.
    LazySeq(FnDef),
}

/// Loop vs fn-level `recur`, distinguished by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurKind {
    Loop,
    Fn,
}

/// One `let`/`loop` binding: the analyzer-assigned slot, the name
/// (debug only), and the init expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub slot: usize,
    pub name: Rc<str>,
    pub init: Spanned<Node>,
}

/// A `catch` clause: the exception lands in `slot` for the body.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub slot: usize,
    pub body: Box<Spanned<Node>>,
}

/// One arity of a tree-walk function.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkArity {
    pub params: usize,
    pub variadic: bool,
    /// Parent-frame slots to copy at closure creation.
    pub capture_slots: Vec<usize>,
    pub has_self_ref: bool,
    /// Total slots the body frame needs.
    pub local_count: usize,
    pub body: Spanned<Node>,
}

impl WalkArity {
    pub fn param_base(&self) -> usize {
        self.capture_slots.len() + usize::from(self.has_self_ref)
    }
}

impl AritySpec for WalkArity {
    fn fixed(&self) -> usize {
        self.params
    }
    fn is_variadic(&self) -> bool {
        self.variadic
    }
}

/// A `fn` form: optional self-name plus its arities.
#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: Option<Rc<str>>,
    pub arities: Vec<Rc<WalkArity>>,
}

/// Constructors for assembling trees by hand, the way the analyzer
/// would. The corpus tests and benches lean on these heavily.
pub mod build {
    use super::*;
    use crate::common::span::Spanned;

    pub fn constant(value: Value) -> Spanned<Node> {
        Spanned::bare(Node::Constant(value))
    }

    pub fn int(n: i64) -> Spanned<Node> {
        constant(Value::Int(n))
    }

    pub fn local(slot: usize) -> Spanned<Node> {
        Spanned::bare(Node::LocalRef(slot))
    }

    pub fn var_ref(name: &str) -> Spanned<Node> {
        Spanned::bare(Node::VarRef {
            ns: None,
            name: Rc::from(name),
        })
    }

    pub fn var_ref_in(ns: &str, name: &str) -> Spanned<Node> {
        Spanned::bare(Node::VarRef {
            ns: Some(Rc::from(ns)),
            name: Rc::from(name),
        })
    }

    pub fn if_node(
        test: Spanned<Node>,
        then: Spanned<Node>,
        els: Option<Spanned<Node>>,
    ) -> Spanned<Node> {
        Spanned::bare(Node::If {
            test: Box::new(test),
            then: Box::new(then),
            els: els.map(Box::new),
        })
    }

    pub fn do_node(stmts: Vec<Spanned<Node>>) -> Spanned<Node> {
        Spanned::bare(Node::Do(stmts))
    }

    pub fn binding(slot: usize, name: &str, init: Spanned<Node>) -> Binding {
        Binding {
            slot,
            name: Rc::from(name),
            init,
        }
    }

    pub fn let_node(bindings: Vec<Binding>, body: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::Let {
            bindings,
            body: Box::new(body),
        })
    }

    pub fn loop_node(bindings: Vec<Binding>, body: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::Loop {
            bindings,
            body: Box::new(body),
        })
    }

    pub fn letfn_node(bindings: Vec<Binding>, body: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::LetFn {
            bindings,
            body: Box::new(body),
        })
    }

    pub fn recur(kind: RecurKind, base: usize, args: Vec<Spanned<Node>>) -> Spanned<Node> {
        Spanned::bare(Node::Recur { kind, base, args })
    }

    pub fn call(callee: Spanned<Node>, args: Vec<Spanned<Node>>) -> Spanned<Node> {
        Spanned::bare(Node::Call {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn def(name: &str, init: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::Def {
            name: Rc::from(name),
            init: Some(Box::new(init)),
            macro_flag: false,
            dynamic: false,
            private: false,
        })
    }

    pub fn def_dynamic(name: &str, init: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::Def {
            name: Rc::from(name),
            init: Some(Box::new(init)),
            macro_flag: false,
            dynamic: true,
            private: false,
        })
    }

    pub fn set_bang(name: &str, expr: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::SetBang {
            ns: None,
            name: Rc::from(name),
            expr: Box::new(expr),
        })
    }

    pub fn throw(expr: Spanned<Node>) -> Spanned<Node> {
        Spanned::bare(Node::Throw(Box::new(expr)))
    }

    pub fn try_node(
        body: Spanned<Node>,
        catch: Option<(usize, Spanned<Node>)>,
        finally: Option<Spanned<Node>>,
    ) -> Spanned<Node> {
        Spanned::bare(Node::Try {
            body: Box::new(body),
            catch: catch.map(|(slot, body)| CatchClause {
                slot,
                body: Box::new(body),
            }),
            finally: finally.map(Box::new),
        })
    }

    /// A single fixed arity with no captures.
    pub fn arity(params: usize, locals_past_params: usize, body: Spanned<Node>) -> Rc<WalkArity> {
        Rc::new(WalkArity {
            params,
            variadic: false,
            capture_slots: vec![],
            has_self_ref: false,
            local_count: params + locals_past_params,
            body,
        })
    }

    pub fn fn_node(name: Option<&str>, arities: Vec<Rc<WalkArity>>) -> Spanned<Node> {
        Spanned::bare(Node::Fn(FnDef {
            name: name.map(Rc::from),
            arities,
        }))
    }

    pub fn lazy_seq(body: Spanned<Node>, local_count: usize) -> Spanned<Node> {
        Spanned::bare(Node::LazySeq(FnDef {
            name: None,
            arities: vec![Rc::new(WalkArity {
                params: 0,
                variadic: false,
                capture_slots: vec![],
                has_self_ref: false,
                local_count,
                body,
            })],
        }))
    }
}
