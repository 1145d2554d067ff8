//! The tree-walk evaluator: the reference backend. Every `Node` has
//! an obvious small-step interpretation here; the bytecode VM is
//! checked against this one form at a time.

use std::cell::Cell;
use std::rc::Rc;

use crate::common::closure::{Closure, FnRepr};
use crate::common::proto::select_arity;
use crate::common::span::{Span, Spanned};
use crate::common::trace::{ErrorKind, Trace};
use crate::compiler::node::{Binding, FnDef, Node, RecurKind, WalkArity};
use crate::data::seq::LazySeq;
use crate::data::value::Value;
use crate::data::protocol;
use crate::dispatch::{call_value, pack_rest};
use crate::env::{self, Env};
use crate::gc::Roots;

/// Bound on the local stack: all active locals of all tree-walk
/// frames on this walker.
pub const LOCALS_MAX: usize = 256;

/// Bound on nested function calls, shared per thread across both
/// backends. Catches unbounded recursion independently of the OS
/// stack.
pub const CALL_DEPTH_MAX: usize = 512;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Scoped call-depth bump: the count drops on every exit path.
pub struct DepthGuard;

impl DepthGuard {
    pub fn enter(span: &Span) -> Result<DepthGuard, Trace> {
        let depth = CALL_DEPTH.with(|d| {
            d.set(d.get() + 1);
            d.get()
        });
        if depth > CALL_DEPTH_MAX {
            CALL_DEPTH.with(|d| d.set(d.get() - 1));
            return Err(Trace::error(
                ErrorKind::StackOverflow,
                "call depth exceeded",
                span.clone(),
            ));
        }
        Ok(DepthGuard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Evaluates a top-level node. The correctness oracle: `run(node)`
/// and `vm::run(compile(node))` must agree on every deterministic
/// program.
pub fn run(env: &Rc<Env>, node: &Spanned<Node>) -> Result<Value, Trace> {
    let mut walker = Walker::new(Rc::clone(env));
    walker.eval(node)
}

/// Invokes a tree-walk closure on a fresh local stack. The entry the
/// cross-backend dispatcher uses.
pub fn call_closure(
    env: &Rc<Env>,
    closure: &Rc<Closure>,
    args: &[Value],
    span: &Span,
) -> Result<Value, Trace> {
    let _depth = DepthGuard::enter(span)?;

    let FnRepr::Walk(arities) = &closure.repr else {
        unreachable!("bytecode closure routed to the tree walker");
    };
    let arity = select_arity(arities, args.len()).ok_or_else(|| {
        Trace::error(
            ErrorKind::Arity,
            &format!(
                "wrong number of args ({}) passed to {}",
                args.len(),
                closure.trace_name()
            ),
            span.clone(),
        )
    })?;

    // the body resolves vars against the namespace the fn was
    // defined in, not the caller's
    let saved_ns = env.current_ns();
    if !closure.defining_ns.is_empty()
        && *closure.defining_ns != *saved_ns.name
    {
        let defining = env.find_or_create_namespace(&closure.defining_ns);
        env.set_current_ns(defining);
    }

    let mut walker = Walker::new(Rc::clone(env));
    let result = walker.run_arity(closure, arity, args);
    env.set_current_ns(saved_ns);

    result.map_err(|mut trace| {
        trace.add_frame(
            closure.trace_name(),
            &closure.defining_ns,
            span.clone(),
        );
        trace
    })
}

struct Walker {
    env: Rc<Env>,
    locals: Vec<Value>,
    /// Set by a tail-position `recur`; the nearest loop or arity
    /// driver consumes it and rebinds.
    pending: Option<(RecurKind, usize, Vec<Value>)>,
}

impl Walker {
    fn new(env: Rc<Env>) -> Walker {
        Walker {
            env,
            locals: vec![],
            pending: None,
        }
    }

    fn store(&mut self, slot: usize, value: Value, span: &Span) -> Result<(), Trace> {
        let index = slot;
        if index >= LOCALS_MAX {
            return Err(Trace::error(
                ErrorKind::StackOverflow,
                "local stack exhausted",
                span.clone(),
            ));
        }
        if index >= self.locals.len() {
            self.locals.resize(index + 1, Value::Nil);
        }
        self.locals[index] = value;
        Ok(())
    }

    fn load(&self, slot: usize, span: &Span) -> Result<Value, Trace> {
        self.locals.get(slot).cloned().ok_or_else(|| {
            Trace::error(
                ErrorKind::UndefinedVar,
                &format!("local slot {} read before binding", slot),
                span.clone(),
            )
        })
    }

    /// GC safe point: polled before each node. The root set is the
    /// live locals, the pending recur buffer, and the in-flight
    /// exception; everything else is reachable through the env.
    fn safe_point(&self) {
        let collector = self.env.collector.borrow().clone();
        let Some(collector) = collector else { return };
        if !collector.should_collect() {
            return;
        }
        let thrown = env::peek_last_thrown();
        let mut roots = Roots::new().slice(&self.locals);
        if let Some((_, _, args)) = &self.pending {
            roots = roots.slice(args);
        }
        if let Some(thrown) = &thrown {
            roots = roots.value(thrown);
        }
        collector.collect(&roots, &self.env);
    }

    fn eval(&mut self, node: &Spanned<Node>) -> Result<Value, Trace> {
        self.safe_point();
        let span = &node.span;

        match &node.item {
            Node::Constant(value) | Node::Quote(value) => Ok(value.clone()),
            Node::LocalRef(slot) => self.load(*slot, span),
            Node::VarRef { ns, name } => {
                self.env.resolve_value(ns.as_deref(), name, span)
            },
            Node::If { test, then, els } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(then)
                } else {
                    match els {
                        Some(els) => self.eval(els),
                        None => Ok(Value::Nil),
                    }
                }
            },
            Node::Do(stmts) => {
                let mut result = Value::Nil;
                for stmt in stmts {
                    result = self.eval(stmt)?;
                    if self.pending.is_some() {
                        break;
                    }
                }
                Ok(result)
            },
            Node::Let { bindings, body } => {
                let saved = self.locals.len();
                let result = self.eval_let(bindings, body);
                // tail cleanup on success and error alike
                self.locals.truncate(saved);
                result
            },
            Node::LetFn { bindings, body } => {
                let saved = self.locals.len();
                let result = self.eval_letfn(bindings, body, span);
                self.locals.truncate(saved);
                result
            },
            Node::Fn(def) => self.make_closure(def, span),
            Node::LazySeq(def) => {
                let thunk = self.make_closure(def, span)?;
                Ok(Value::LazySeq(Rc::new(LazySeq::new(thunk))))
            },
            Node::Call { callee, args } => {
                let callee = self.eval(callee)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                call_value_spanned(&self.env, &callee, &evaluated, span)
            },
            Node::Def {
                name,
                init,
                macro_flag,
                dynamic,
                private,
            } => {
                let var = self.env.current_ns().intern(name);
                if let Some(init) = init {
                    let value = self.eval(init)?;
                    var.bind_root(value);
                }
                var.macro_flag.set(*macro_flag);
                var.dynamic.set(*dynamic);
                var.private.set(*private);
                tracing::trace!(var = %name, "def");
                Ok(Value::Symbol(Rc::new(
                    crate::data::symbol::Symbol::qualified(&var.ns_name, name),
                )))
            },
            Node::SetBang { ns, name, expr } => {
                let value = self.eval(expr)?;
                let var =
                    self.env.resolve(ns.as_deref(), name).ok_or_else(|| {
                        Trace::error(
                            ErrorKind::UndefinedVar,
                            &format!("unable to resolve var {}", name),
                            span.clone(),
                        )
                    })?;
                var.set_top(value.clone()).map_err(|mut trace| {
                    trace.add_context(span.clone());
                    trace
                })?;
                Ok(value)
            },
            Node::Loop { bindings, body } => {
                let saved = self.locals.len();
                let result = self.eval_loop(bindings, body, span);
                self.locals.truncate(saved);
                result
            },
            Node::Recur { kind, base, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.pending = Some((*kind, *base, values));
                Ok(Value::Nil)
            },
            Node::Throw(expr) => {
                let value = self.eval(expr)?;
                env::set_last_thrown(Some(value.clone()));
                // rethrowing the exception under treatment keeps its
                // original trace and kind
                if let Some(original) = env::take_pending_rethrow() {
                    if original.to_exception_value().eql(&value) {
                        return Err(original);
                    }
                }
                Err(Trace::thrown(value, span.clone()))
            },
            Node::Try {
                body,
                catch,
                finally,
            } => self.eval_try(body, catch.as_ref(), finally.as_deref(), span),
            Node::DefProtocol { name, sigs } => {
                let protocol = Rc::new(protocol::Protocol::new(name, sigs.clone()));
                let var = self.env.current_ns().intern(name);
                var.bind_root(Value::Protocol(Rc::clone(&protocol)));
                // each method becomes a first-class protocol fn
                for (method, _arity) in sigs {
                    let pfn = protocol::ProtocolFn::new(Rc::clone(&protocol), method);
                    let method_var = self.env.current_ns().intern(method);
                    method_var.bind_root(Value::ProtocolFn(Rc::new(pfn)));
                }
                Ok(Value::Protocol(protocol))
            },
            Node::ExtendType {
                type_key,
                protocol,
                methods,
            } => {
                let Value::Protocol(protocol) = self.eval(protocol)? else {
                    return Err(Trace::error(
                        ErrorKind::Type,
                        "extend-type expects a protocol",
                        span.clone(),
                    ));
                };
                for (method, body) in methods {
                    let f = self.eval(body)?;
                    protocol.extend_method(type_key, method, f);
                }
                Ok(Value::Nil)
            },
            Node::DefMulti {
                name,
                dispatch,
                hierarchy,
            } => {
                let dispatch = self.eval(dispatch)?;
                let multi = Rc::new(protocol::MultiFn::new(name, dispatch));
                if let Some(hierarchy) = hierarchy {
                    let hierarchy = self.eval(hierarchy)?;
                    multi.set_hierarchy(Some(hierarchy));
                }
                let var = self.env.current_ns().intern(name);
                var.bind_root(Value::MultiFn(Rc::clone(&multi)));
                Ok(Value::MultiFn(multi))
            },
            Node::DefMethod {
                name,
                dispatch_value,
                method,
            } => {
                let multi = self.env.resolve_value(None, name, span)?;
                let Value::MultiFn(multi) = multi else {
                    return Err(Trace::error(
                        ErrorKind::Type,
                        &format!("{} is not a multimethod", name),
                        span.clone(),
                    ));
                };
                let dispatch_value = self.eval(dispatch_value)?;
                let method = self.eval(method)?;
                multi.add_method(dispatch_value, method);
                Ok(Value::MultiFn(multi))
            },
        }
    }

    fn eval_let(
        &mut self,
        bindings: &[Binding],
        body: &Spanned<Node>,
    ) -> Result<Value, Trace> {
        for binding in bindings {
            let value = self.eval(&binding.init)?;
            self.store(binding.slot, value, &binding.init.span)?;
        }
        self.eval(body)
    }

    /// Mutually recursive closures: create them all (siblings not
    /// yet bound read as placeholders), then re-capture each from
    /// the finished binding slots. The only way closures form a
    /// cycle; everywhere else captures are final at creation.
    fn eval_letfn(
        &mut self,
        bindings: &[Binding],
        body: &Spanned<Node>,
        span: &Span,
    ) -> Result<Value, Trace> {
        for binding in bindings {
            let value = self.eval(&binding.init)?;
            self.store(binding.slot, value, &binding.init.span)?;
        }

        for binding in bindings {
            let Value::Fn(closure) = self.load(binding.slot, span)? else {
                continue;
            };
            let FnRepr::Walk(arities) = &closure.repr else {
                continue;
            };
            let capture_slots = arities
                .first()
                .map(|a| a.capture_slots.clone())
                .unwrap_or_default();
            let mut captured = Vec::with_capacity(capture_slots.len());
            for slot in &capture_slots {
                captured.push(self.load(*slot, span)?);
            }
            *closure.captured.borrow_mut() = captured;
        }

        self.eval(body)
    }

    fn eval_loop(
        &mut self,
        bindings: &[Binding],
        body: &Spanned<Node>,
        span: &Span,
    ) -> Result<Value, Trace> {
        for binding in bindings {
            let value = self.eval(&binding.init)?;
            self.store(binding.slot, value, &binding.init.span)?;
        }

        loop {
            let result = self.eval(body)?;
            match self.pending.take() {
                Some((RecurKind::Loop, base, values)) => {
                    for (offset, value) in values.into_iter().enumerate() {
                        self.store(base + offset, value, span)?;
                    }
                },
                Some(other) => {
                    // fn-level recur unwinds past this loop
                    self.pending = Some(other);
                    return Ok(result);
                },
                None => return Ok(result),
            }
        }
    }

    fn eval_try(
        &mut self,
        body: &Spanned<Node>,
        catch: Option<&crate::compiler::node::CatchClause>,
        finally: Option<&Spanned<Node>>,
        span: &Span,
    ) -> Result<Value, Trace> {
        let saved = self.locals.len();
        let outcome = self.eval(body);

        let outcome = match (outcome, catch) {
            (Err(trace), Some(clause)) if trace.catchable() => {
                self.locals.truncate(saved);
                // a native error surfaces as an ex-info map;
                // a thrown value arrives as itself
                let exception = trace.to_exception_value();
                env::take_last_thrown();
                env::set_pending_rethrow(trace);
                self.store(clause.slot, exception, span)?;
                self.eval(&clause.body)
            },
            (other, _) => other,
        };

        if let Some(finally) = finally {
            self.locals.truncate(saved);
            // finally's result is discarded; its error is not
            self.eval(finally)?;
        }

        outcome
    }

    fn make_closure(&mut self, def: &FnDef, span: &Span) -> Result<Value, Trace> {
        let capture_slots = def
            .arities
            .first()
            .map(|a| a.capture_slots.clone())
            .unwrap_or_default();
        let mut captured = Vec::with_capacity(capture_slots.len());
        for slot in &capture_slots {
            captured.push(self.load(*slot, span)?);
        }

        Ok(Value::Fn(Rc::new(Closure::wrap(
            def.name.clone(),
            FnRepr::Walk(def.arities.clone()),
            captured,
            self.env.current_ns().name.clone(),
        ))))
    }

    /// Runs one selected arity: binds the frame layout, drives the
    /// fn-level recur loop.
    fn run_arity(
        &mut self,
        closure: &Rc<Closure>,
        arity: &Rc<WalkArity>,
        args: &[Value],
    ) -> Result<Value, Trace> {
        let span = &arity.body.span;
        if arity.local_count > LOCALS_MAX {
            return Err(Trace::error(
                ErrorKind::StackOverflow,
                "local stack exhausted",
                span.clone(),
            ));
        }

        // captures, then self, then params
        let mut slot = 0;
        for value in closure.captured.borrow().iter() {
            self.store(slot, value.clone(), span)?;
            slot += 1;
        }
        if arity.has_self_ref {
            self.store(slot, Value::Fn(Rc::clone(closure)), span)?;
            slot += 1;
        }

        let mut args = args.to_vec();
        if arity.variadic {
            let rest = pack_rest(&mut args, arity.params);
            args.push(rest);
        } else if args.len() != arity.params {
            return Err(Trace::error(
                ErrorKind::Arity,
                &format!(
                    "wrong number of args ({}) passed to {}",
                    args.len(),
                    closure.trace_name()
                ),
                span.clone(),
            ));
        }
        let param_base = slot;
        for value in args {
            self.store(slot, value, span)?;
            slot += 1;
        }

        loop {
            let result = self.eval(&arity.body)?;
            match self.pending.take() {
                Some((RecurKind::Fn, base, values)) => {
                    debug_assert_eq!(base, param_base);
                    for (offset, value) in values.into_iter().enumerate() {
                        self.store(base + offset, value, span)?;
                    }
                },
                Some(unexpected) => {
                    self.pending = Some(unexpected);
                    return Ok(result);
                },
                None => return Ok(result),
            }
        }
    }
}

/// `call_value`, annotating any error with the call site.
pub fn call_value_spanned(
    env: &Rc<Env>,
    callee: &Value,
    args: &[Value],
    span: &Span,
) -> Result<Value, Trace> {
    call_value(env, callee, args).map_err(|mut trace| {
        trace.add_context(span.clone());
        trace
    })
}
