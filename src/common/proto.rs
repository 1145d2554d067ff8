use std::rc::Rc;

use crate::common::chunk::Chunk;

/// A compiled function prototype: everything about a single arity of a
/// function that is known at compile time. The running [`Closure`]
/// pairs a proto with captured values.
///
/// Locals are laid out `captures, self?, params, rest?, lets...`;
/// the self-reference slot (for named fns) sits at `capture_count`.
///
/// [`Closure`]: crate::common::closure::Closure
#[derive(Debug, Clone, PartialEq)]
pub struct FnProto {
    pub name: Option<Rc<str>>,
    /// Fixed parameter count. A variadic arity accepts this many or more.
    pub arity: usize,
    pub variadic: bool,
    /// Total local slots the body needs, captures and params included.
    pub local_count: usize,
    pub has_self_ref: bool,
    /// Parent-frame slot indices to copy at closure creation.
    pub capture_slots: Vec<usize>,
    pub chunk: Chunk,
}

impl FnProto {
    pub fn capture_count(&self) -> usize {
        self.capture_slots.len()
    }

    /// The slot holding the closure's own value, when the fn is named.
    pub fn self_slot(&self) -> usize {
        self.capture_slots.len()
    }

    /// Where the parameters start in the local layout.
    pub fn param_base(&self) -> usize {
        self.capture_slots.len() + usize::from(self.has_self_ref)
    }
}

/// Anything with a fixed parameter count and a variadic flag
/// can participate in multi-arity selection. Both the compiled
/// [`FnProto`] and the tree-walk arity implement this, so the
/// two backends cannot drift on dispatch rules.
pub trait AritySpec {
    fn fixed(&self) -> usize;
    fn is_variadic(&self) -> bool;
}

impl AritySpec for FnProto {
    fn fixed(&self) -> usize {
        self.arity
    }
    fn is_variadic(&self) -> bool {
        self.variadic
    }
}

/// Picks the arity for a call with `argc` arguments:
/// the arity whose fixed count equals `argc`, otherwise the unique
/// variadic arity whose fixed prefix fits. `None` is an arity error
/// at the call site.
pub fn select_arity<A: AritySpec>(arities: &[Rc<A>], argc: usize) -> Option<&Rc<A>> {
    if let Some(exact) = arities
        .iter()
        .find(|a| !a.is_variadic() && a.fixed() == argc)
    {
        return Some(exact);
    }
    arities
        .iter()
        .find(|a| a.is_variadic() && argc >= a.fixed())
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fake(usize, bool);
    impl AritySpec for Fake {
        fn fixed(&self) -> usize {
            self.0
        }
        fn is_variadic(&self) -> bool {
            self.1
        }
    }

    #[test]
    fn exact_beats_variadic() {
        let arities = vec![Rc::new(Fake(2, false)), Rc::new(Fake(1, true))];
        let chosen = select_arity(&arities, 2).unwrap();
        assert_eq!(chosen.fixed(), 2);
        assert!(!chosen.is_variadic());
    }

    #[test]
    fn variadic_takes_the_rest() {
        let arities = vec![Rc::new(Fake(2, false)), Rc::new(Fake(1, true))];
        assert!(select_arity(&arities, 5).unwrap().is_variadic());
        assert!(select_arity(&arities, 1).unwrap().is_variadic());
        assert!(select_arity(&arities, 0).is_none());
    }
}
