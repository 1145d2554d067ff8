//! The stack VM: the fast backend. Executes chunks produced by
//! `compiler::gen`, one fixed-size instruction at a time, against a
//! value stack, a call-frame stack, and an exception-handler stack.
//! Anything it cannot call directly (builtins, tree-walk closures,
//! keywords, multimethods, ...) it routes through the cross-backend
//! dispatcher, so the two evaluators stay interchangeable.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::common::closure::{Closure, FnRepr};
use crate::common::opcode::{Instruction, Opcode};
use crate::common::proto::{select_arity, FnProto};
use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::compiler::gen::OPERAND_FLAG;
use crate::data::num;
use crate::data::protocol::{MultiFn, Protocol, ProtocolFn};
use crate::data::seq::LazySeq;
use crate::data::symbol::Symbol;
use crate::data::value::Value;
use crate::dispatch::{self, pack_rest};
use crate::env::{self, Env};
use crate::eval::DepthGuard;
use crate::gc::Roots;

/// Fixed capacity of the value stack.
pub const STACK_MAX: usize = 32 * 1024;
/// Fixed capacity of the call-frame stack.
pub const FRAMES_MAX: usize = 256;
/// Fixed capacity of the exception-handler stack.
pub const HANDLERS_MAX: usize = 16;

/// One activation record: where we are in which proto, where this
/// frame's locals begin, and where the stack rolls back to on return
/// (the caller's callee slot).
struct Frame {
    proto: Rc<FnProto>,
    ip: usize,
    base: usize,
    ret_sp: usize,
    /// The caller's namespace, when this frame switched to the
    /// closure's defining namespace; restored on return or unwind.
    saved_ns: Option<Rc<crate::env::namespace::Namespace>>,
}

/// One active `try` region.
struct Handler {
    catch_ip: usize,
    sp: usize,
    frame_count: usize,
}

enum Flow {
    Continue,
    Done(Value),
}

/// Runs a compiled top-level proto to completion.
pub fn run(env: &Rc<Env>, proto: &Rc<FnProto>) -> Result<Value, Trace> {
    let mut vm = Vm::new(Rc::clone(env));
    vm.push_frame(Rc::clone(proto), 0, 0, None)?;
    vm.execute()
}

/// Invokes a bytecode closure from outside the VM: the entry the
/// cross-backend dispatcher uses when a tree walker or a builtin
/// calls into compiled code. VM-to-VM calls never come through here;
/// the running dispatch loop pushes frames in place instead.
pub fn call_closure(
    env: &Rc<Env>,
    closure: &Rc<Closure>,
    args: &[Value],
) -> Result<Value, Trace> {
    let _depth = DepthGuard::enter(&Span::empty())?;

    let mut vm = Vm::new(Rc::clone(env));
    vm.stack.push(Value::Fn(Rc::clone(closure)));
    vm.stack.extend(args.iter().cloned());
    vm.call(args.len(), &Span::empty())?;
    vm.execute().map_err(|mut trace| {
        trace.add_frame(closure.trace_name(), &closure.defining_ns, Span::empty());
        trace
    })
}

struct Vm {
    env: Rc<Env>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
}

impl Vm {
    fn new(env: Rc<Env>) -> Vm {
        Vm {
            env,
            stack: vec![],
            frames: vec![],
            handlers: vec![],
        }
    }

    fn push_frame(
        &mut self,
        proto: Rc<FnProto>,
        base: usize,
        ret_sp: usize,
        defining_ns: Option<&Rc<str>>,
    ) -> Result<(), Trace> {
        if self.frames.len() >= FRAMES_MAX {
            return Err(Trace::error(
                ErrorKind::StackOverflow,
                "call frame stack exhausted",
                self.here(),
            ));
        }
        if base + proto.local_count > STACK_MAX {
            return Err(Trace::error(
                ErrorKind::StackOverflow,
                "value stack exhausted",
                self.here(),
            ));
        }

        // enter the closure's defining namespace for the body
        let mut saved_ns = None;
        if let Some(ns) = defining_ns {
            if !ns.is_empty() && **ns != *self.env.current_ns().name {
                saved_ns = Some(self.env.current_ns());
                let defining = self.env.find_or_create_namespace(ns);
                self.env.set_current_ns(defining);
            }
        }

        tracing::trace!(
            fn_name = proto.name.as_deref().unwrap_or("fn"),
            base,
            depth = self.frames.len(),
            "push frame"
        );
        self.frames.push(Frame {
            proto,
            ip: 0,
            base,
            ret_sp,
            saved_ns,
        });
        Ok(())
    }

    /// The source position of the instruction that just executed.
    fn here(&self) -> Span {
        match self.frames.last() {
            Some(frame) => {
                frame.proto.chunk.span_at(frame.ip.saturating_sub(1), None)
            },
            None => Span::empty(),
        }
    }

    fn pop(&mut self) -> Result<Value, Trace> {
        self.stack.pop().ok_or_else(|| {
            Trace::error(
                ErrorKind::InvalidInstruction,
                "value stack underflow",
                self.here(),
            )
        })
    }

    fn push(&mut self, value: Value) -> Result<(), Trace> {
        if self.stack.len() >= STACK_MAX {
            return Err(Trace::error(
                ErrorKind::StackOverflow,
                "value stack exhausted",
                self.here(),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    fn local(&self, slot: usize) -> Result<Value, Trace> {
        let frame = self.frames.last().expect("no active frame");
        self.stack.get(frame.base + slot).cloned().ok_or_else(|| {
            Trace::error(
                ErrorKind::InvalidInstruction,
                &format!("local slot {} outside the live stack", slot),
                self.here(),
            )
        })
    }

    /// GC safe point, polled once per dispatch iteration. Roots: the
    /// live stack (frames, locals, temporaries, constants reachable
    /// through frames) and the in-flight exception.
    fn safe_point(&self) {
        let collector = self.env.collector.borrow().clone();
        let Some(collector) = collector else { return };
        if !collector.should_collect() {
            return;
        }
        let thrown = env::peek_last_thrown();
        let mut roots = Roots::new().slice(&self.stack);
        if let Some(thrown) = &thrown {
            roots = roots.value(thrown);
        }
        collector.collect(&roots, &self.env);
    }

    fn execute(&mut self) -> Result<Value, Trace> {
        loop {
            match self.step() {
                Ok(Flow::Continue) => {},
                Ok(Flow::Done(value)) => return Ok(value),
                Err(trace) => {
                    if let Some(fatal) = self.unwind(trace) {
                        return Err(fatal);
                    }
                },
            }
        }
    }

    /// On a raise: find the innermost live handler, restore its
    /// saved stack and frame depth, and land on the catch target
    /// with the exception value pushed. Uncatchable kinds and a dry
    /// handler stack propagate out.
    fn unwind(&mut self, mut trace: Trace) -> Option<Trace> {
        trace.add_context(self.here());

        if trace.catchable() {
            // drop handlers stranded above a frame that already returned
            while let Some(handler) = self.handlers.last() {
                if handler.frame_count <= self.frames.len() {
                    break;
                }
                self.handlers.pop();
            }

            if let Some(handler) = self.handlers.pop() {
                self.stack.truncate(handler.sp);
                // restore the namespaces of unwound frames, top down
                while self.frames.len() > handler.frame_count {
                    let dropped = self.frames.pop().expect("frame count checked");
                    if let Some(ns) = dropped.saved_ns {
                        self.env.set_current_ns(ns);
                    }
                }
                if let Some(frame) = self.frames.last_mut() {
                    frame.ip = handler.catch_ip;
                    let exception = trace.to_exception_value();
                    env::take_last_thrown();
                    env::set_pending_rethrow(trace);
                    self.stack.push(exception);
                    return None;
                }
            }
        }

        // fatal: record the error path and put the namespace back
        while let Some(frame) = self.frames.pop() {
            trace.add_frame(
                frame.proto.name.as_deref().unwrap_or("fn"),
                "",
                frame.proto.chunk.span_at(frame.ip.saturating_sub(1), None),
            );
            if let Some(ns) = frame.saved_ns {
                self.env.set_current_ns(ns);
            }
        }
        Some(trace)
    }

    fn fetch(&mut self) -> Option<Instruction> {
        let frame = self.frames.last_mut()?;
        let inst = frame.proto.chunk.code.get(frame.ip).copied();
        if inst.is_some() {
            frame.ip += 1;
        }
        inst
    }

    fn step(&mut self) -> Result<Flow, Trace> {
        self.safe_point();

        let Some(inst) = self.fetch() else {
            // ran off the end: an implicit return (top-level chunks
            // carry no Ret)
            let result = self.stack.pop().unwrap_or(Value::Nil);
            return self.do_return(result);
        };
        let span = self.here();

        match inst.op {
            Opcode::Const => {
                let value = self.constant(inst.operand)?;
                self.push(value)?;
            },
            Opcode::Nil => self.push(Value::Nil)?,
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,

            Opcode::Pop => {
                self.pop()?;
            },
            Opcode::Dup => {
                let top = self.pop()?;
                self.push(top.clone())?;
                self.push(top)?;
            },
            Opcode::PopUnder => {
                let top = self.pop()?;
                let keep = self.stack.len() - (inst.operand as usize).min(self.stack.len());
                self.stack.truncate(keep);
                self.push(top)?;
            },

            Opcode::LocalLoad => {
                let value = self.local(inst.operand as usize)?;
                self.push(value)?;
            },
            Opcode::LocalStore => {
                let value = self.pop()?;
                let frame = self.frames.last().expect("no active frame");
                let index = frame.base + inst.operand as usize;
                if index >= self.stack.len() {
                    return Err(Trace::error(
                        ErrorKind::InvalidInstruction,
                        "store outside the live stack",
                        span,
                    ));
                }
                self.stack[index] = value;
            },

            Opcode::Jump => self.jump(inst.offset()),
            Opcode::JumpIfFalse => {
                let test = self.pop()?;
                if !test.is_truthy() {
                    self.jump(inst.offset());
                }
            },
            Opcode::JumpBack => self.jump_back(inst.operand),

            Opcode::Call => self.call(inst.operand as usize, &span)?,
            Opcode::TailCall => {
                if let Some(flow) = self.tail_call(inst.operand as usize, &span)? {
                    return Ok(flow);
                }
            },
            Opcode::Ret => {
                let result = self.pop()?;
                return self.do_return(result);
            },
            Opcode::Closure => self.make_closure(inst.operand, &span)?,
            Opcode::LetFnPatch => self.letfn_patch(inst, &span)?,

            Opcode::Recur => self.recur(inst)?,
            Opcode::RecurLoop => {
                self.recur(inst)?;
                // companion JumpBack, consumed without a dispatch
                let companion = self.fetch().ok_or_else(|| {
                    Trace::error(
                        ErrorKind::InvalidInstruction,
                        "recur-loop without its jump",
                        span.clone(),
                    )
                })?;
                self.jump_back(companion.operand);
            },

            Opcode::ListNew => {
                let items = self.pop_many(inst.operand as usize)?;
                self.push(Value::list(items))?;
            },
            Opcode::VecNew => {
                let items = self.pop_many(inst.operand as usize)?;
                self.push(Value::vector(items))?;
            },
            Opcode::SetNew => {
                let items = self.pop_many(inst.operand as usize)?;
                self.push(Value::set_from_items(items))?;
            },
            Opcode::MapNew => {
                let mut flat = self.pop_many(inst.operand as usize * 2)?;
                let mut pairs = Vec::with_capacity(inst.operand as usize);
                while flat.len() >= 2 {
                    let value = flat.pop().expect("checked length");
                    let key = flat.pop().expect("checked length");
                    pairs.push((key, value));
                }
                pairs.reverse();
                self.push(Value::map_from_pairs(pairs))?;
            },

            Opcode::VarLoad => {
                let (ns, name) = self.symbol_constant(inst.operand)?;
                let value =
                    self.env.resolve_value(ns.as_deref(), &name, &span)?;
                self.push(value)?;
            },
            Opcode::Def
            | Opcode::DefMacro
            | Opcode::DefDynamic
            | Opcode::DefPrivate => self.def(inst, &span)?,
            Opcode::SetBang => {
                let value = self.pop()?;
                let (ns, name) = self.symbol_constant(inst.operand)?;
                let var = self
                    .env
                    .resolve(ns.as_deref(), &name)
                    .ok_or_else(|| {
                        Trace::error(
                            ErrorKind::UndefinedVar,
                            &format!("unable to resolve var {}", name),
                            span.clone(),
                        )
                    })?;
                var.set_top(value.clone())?;
                self.push(value)?;
            },
            Opcode::DefMulti => self.def_multi(inst, &span)?,
            Opcode::DefMethod => self.def_method(inst, &span)?,
            Opcode::DefProtocol => self.def_protocol(inst, &span)?,
            Opcode::ExtendTypeMethod => self.extend_type_method(inst, &span)?,
            Opcode::LazySeq => {
                let thunk = self.pop()?;
                self.push(Value::LazySeq(Rc::new(LazySeq::new(thunk))))?;
            },

            Opcode::TryBegin => {
                if self.handlers.len() >= HANDLERS_MAX {
                    return Err(Trace::error(
                        ErrorKind::StackOverflow,
                        "handler stack exhausted",
                        span,
                    ));
                }
                let frame = self.frames.last().expect("no active frame");
                self.handlers.push(Handler {
                    catch_ip: (frame.ip as isize + inst.offset() as isize)
                        as usize,
                    sp: self.stack.len(),
                    frame_count: self.frames.len(),
                });
            },
            Opcode::CatchBegin => {
                // marker: the throw path already popped the handler
                // and pushed the exception value
            },
            Opcode::PopHandler => {
                self.handlers.pop();
            },
            Opcode::TryEnd => {},
            Opcode::Throw => {
                let value = self.pop()?;
                env::set_last_thrown(Some(value.clone()));
                // rethrowing the exception under treatment keeps its
                // original trace and kind
                if let Some(original) = env::take_pending_rethrow() {
                    if original.to_exception_value().eql(&value) {
                        return Err(original);
                    }
                }
                return Err(Trace::thrown(value, span));
            },

            Opcode::Add => self.binop(num::add)?,
            Opcode::Sub => self.binop(num::sub)?,
            Opcode::Mul => self.binop(num::mul)?,
            Opcode::Div => self.binop(num::div)?,
            Opcode::Mod => self.binop(num::mod_op)?,
            Opcode::Rem => self.binop(num::rem_op)?,
            Opcode::AddP => self.binop(num::add_promote)?,
            Opcode::SubP => self.binop(num::sub_promote)?,
            Opcode::MulP => self.binop(num::mul_promote)?,
            Opcode::Eq => {
                let (a, b) = self.pop_two()?;
                self.push(Value::Bool(a.equiv(&b)))?;
            },
            Opcode::Neq => {
                let (a, b) = self.pop_two()?;
                self.push(Value::Bool(!a.equiv(&b)))?;
            },
            Opcode::Lt => self.compare(|o| o == Ordering::Less)?,
            Opcode::Le => self.compare(|o| o != Ordering::Greater)?,
            Opcode::Gt => self.compare(|o| o == Ordering::Greater)?,
            Opcode::Ge => self.compare(|o| o != Ordering::Less)?,

            Opcode::AddLocals => self.fused_binop(inst, num::add, false)?,
            Opcode::SubLocals => self.fused_binop(inst, num::sub, false)?,
            Opcode::AddLocalConst => self.fused_binop(inst, num::add, true)?,
            Opcode::SubLocalConst => self.fused_binop(inst, num::sub, true)?,
            Opcode::EqLocals => {
                let (a, b) = self.fused_operands(inst, false)?;
                self.push(Value::Bool(a.equiv(&b)))?;
            },
            Opcode::EqLocalConst => {
                let (a, b) = self.fused_operands(inst, true)?;
                self.push(Value::Bool(a.equiv(&b)))?;
            },
            Opcode::LtLocals => self.fused_compare(inst, false, |o| o == Ordering::Less)?,
            Opcode::LeLocals => {
                self.fused_compare(inst, false, |o| o != Ordering::Greater)?
            },
            Opcode::LtLocalConst => {
                self.fused_compare(inst, true, |o| o == Ordering::Less)?
            },
            Opcode::LeLocalConst => {
                self.fused_compare(inst, true, |o| o != Ordering::Greater)?
            },

            Opcode::BranchNeLocals => self.fused_branch(inst, false, BranchKind::Ne)?,
            Opcode::BranchGeLocals => self.fused_branch(inst, false, BranchKind::Ge)?,
            Opcode::BranchGtLocals => self.fused_branch(inst, false, BranchKind::Gt)?,
            Opcode::BranchNeLocalConst => {
                self.fused_branch(inst, true, BranchKind::Ne)?
            },
            Opcode::BranchGeLocalConst => {
                self.fused_branch(inst, true, BranchKind::Ge)?
            },
            Opcode::BranchGtLocalConst => {
                self.fused_branch(inst, true, BranchKind::Gt)?
            },

            Opcode::Nop => {},
            Opcode::DebugPrint => {
                tracing::debug!(top = ?self.stack.last(), "debug-print");
            },
        }

        Ok(Flow::Continue)
    }

    fn constant(&self, index: u16) -> Result<Value, Trace> {
        let frame = self.frames.last().expect("no active frame");
        frame
            .proto
            .chunk
            .constants
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                Trace::error(
                    ErrorKind::InvalidInstruction,
                    &format!("constant {} out of range", index),
                    self.here(),
                )
            })
    }

    fn symbol_constant(
        &self,
        operand: u16,
    ) -> Result<(Option<Rc<str>>, Rc<str>), Trace> {
        match self.constant(operand & !OPERAND_FLAG)? {
            Value::Symbol(symbol) => {
                Ok((symbol.ns.clone(), Rc::clone(&symbol.name)))
            },
            Value::Str(name) => Ok((None, name)),
            other => Err(Trace::error(
                ErrorKind::InvalidInstruction,
                &format!("expected a name constant, got {:?}", other),
                self.here(),
            )),
        }
    }

    fn jump(&mut self, offset: i16) {
        let frame = self.frames.last_mut().expect("no active frame");
        frame.ip = (frame.ip as isize + offset as isize) as usize;
    }

    fn jump_back(&mut self, distance: u16) {
        let frame = self.frames.last_mut().expect("no active frame");
        frame.ip -= distance as usize;
    }

    fn pop_two(&mut self) -> Result<(Value, Value), Trace> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn pop_many(&mut self, count: usize) -> Result<Vec<Value>, Trace> {
        if self.stack.len() < count {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "value stack underflow",
                self.here(),
            ));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn binop(
        &mut self,
        f: fn(&Value, &Value) -> Result<Value, Trace>,
    ) -> Result<(), Trace> {
        let (a, b) = self.pop_two()?;
        let result = f(&a, &b).map_err(|mut trace| {
            trace.add_context(self.here());
            trace
        })?;
        self.push(result)
    }

    fn compare(&mut self, accept: fn(Ordering) -> bool) -> Result<(), Trace> {
        let (a, b) = self.pop_two()?;
        let ordering = num::compare(&a, &b).map_err(|mut trace| {
            trace.add_context(self.here());
            trace
        })?;
        self.push(Value::Bool(accept(ordering)))
    }

    /// The two operands of a fused superinstruction:
    /// `locals[a], locals[b]`, or `locals[s], constants[i]`.
    fn fused_operands(
        &self,
        inst: Instruction,
        with_const: bool,
    ) -> Result<(Value, Value), Trace> {
        let (a, b) = inst.pair();
        let lhs = self.local(a)?;
        let rhs = if with_const {
            self.constant(b as u16)?
        } else {
            self.local(b)?
        };
        Ok((lhs, rhs))
    }

    fn fused_binop(
        &mut self,
        inst: Instruction,
        f: fn(&Value, &Value) -> Result<Value, Trace>,
        with_const: bool,
    ) -> Result<(), Trace> {
        let (a, b) = self.fused_operands(inst, with_const)?;
        let result = f(&a, &b).map_err(|mut trace| {
            trace.add_context(self.here());
            trace
        })?;
        self.push(result)
    }

    fn fused_compare(
        &mut self,
        inst: Instruction,
        with_const: bool,
        accept: fn(Ordering) -> bool,
    ) -> Result<(), Trace> {
        let (a, b) = self.fused_operands(inst, with_const)?;
        let ordering = num::compare(&a, &b).map_err(|mut trace| {
            trace.add_context(self.here());
            trace
        })?;
        self.push(Value::Bool(accept(ordering)))
    }

    /// A fused compare-and-branch: same observable effect as the
    /// compare followed by `JumpIfFalse`, with the branch offset in
    /// the companion jump that always follows.
    fn fused_branch(
        &mut self,
        inst: Instruction,
        with_const: bool,
        kind: BranchKind,
    ) -> Result<(), Trace> {
        let (a, b) = self.fused_operands(inst, with_const)?;
        let taken = match kind {
            BranchKind::Ne => !a.equiv(&b),
            BranchKind::Ge => {
                let ordering = num::compare(&a, &b).map_err(|mut trace| {
                    trace.add_context(self.here());
                    trace
                })?;
                ordering != Ordering::Less
            },
            BranchKind::Gt => {
                let ordering = num::compare(&a, &b).map_err(|mut trace| {
                    trace.add_context(self.here());
                    trace
                })?;
                ordering == Ordering::Greater
            },
        };

        let companion = self.fetch().ok_or_else(|| {
            Trace::error(
                ErrorKind::InvalidInstruction,
                "fused branch without its jump",
                self.here(),
            )
        })?;
        if taken {
            self.jump(companion.offset());
        }
        Ok(())
    }

    /// `Recur`: write the top `argc` values into the loop slots and
    /// drop everything above them. Copies run low-to-high; the
    /// destination is always below the source, so overlap is safe.
    fn recur(&mut self, inst: Instruction) -> Result<(), Trace> {
        let (base_offset, argc) = inst.pair();
        let frame_base = self.frames.last().expect("no active frame").base;
        let dest = frame_base + base_offset;
        let src = self.stack.len() - argc;

        for k in 0..argc {
            let value = self.stack[src + k].clone();
            self.stack[dest + k] = value;
        }
        self.stack.truncate(dest + argc);
        Ok(())
    }

    fn do_return(&mut self, result: Value) -> Result<Flow, Trace> {
        let frame = self.frames.pop().expect("return without a frame");
        if let Some(ns) = frame.saved_ns {
            self.env.set_current_ns(ns);
        }
        self.stack.truncate(frame.ret_sp);
        tracing::trace!(
            fn_name = frame.proto.name.as_deref().unwrap_or("fn"),
            depth = self.frames.len(),
            "pop frame"
        );
        if self.frames.is_empty() {
            return Ok(Flow::Done(result));
        }
        self.push(result)?;
        Ok(Flow::Continue)
    }

    /// `Call n`: stack is `..., callee, arg0..arg_{n-1}`. Bytecode
    /// closures get a frame pushed in place (the "VM already active"
    /// path); everything else goes through the dispatcher and its
    /// result replaces the call window.
    fn call(&mut self, argc: usize, span: &Span) -> Result<(), Trace> {
        let callee_idx = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| {
                Trace::error(
                    ErrorKind::InvalidInstruction,
                    "call without a callee on the stack",
                    span.clone(),
                )
            })?;
        let callee = self.stack[callee_idx].clone();

        if let Value::Fn(closure) = &callee {
            if closure.is_compiled() {
                return self.call_compiled_at(
                    Rc::clone(closure),
                    argc,
                    callee_idx,
                    callee_idx,
                    span,
                );
            }
        }

        let args = self.stack[callee_idx + 1..].to_vec();
        self.stack.truncate(callee_idx);
        let result = dispatch::call_value(&self.env, &callee, &args)
            .map_err(|mut trace| {
                trace.add_context(span.clone());
                trace
            })?;
        self.push(result)
    }

    fn tail_call(
        &mut self,
        argc: usize,
        span: &Span,
    ) -> Result<Option<Flow>, Trace> {
        let callee_idx = self.stack.len() - argc - 1;
        let callee = self.stack[callee_idx].clone();

        if let Value::Fn(closure) = &callee {
            if closure.is_compiled() {
                // slide the call window over the current frame
                let window = self.stack.split_off(callee_idx);
                let frame = self.frames.pop().expect("tail call without a frame");
                if let Some(ns) = frame.saved_ns {
                    self.env.set_current_ns(ns);
                }
                self.stack.truncate(frame.ret_sp);
                let callee_idx = self.stack.len();
                self.stack.extend(window);
                self.call_compiled_at(
                    Rc::clone(closure),
                    argc,
                    callee_idx,
                    frame.ret_sp,
                    span,
                )?;
                return Ok(None);
            }
        }

        // non-compiled callee: evaluate, then return its result
        // from the current frame
        let args = self.stack[callee_idx + 1..].to_vec();
        self.stack.truncate(callee_idx);
        let result = dispatch::call_value(&self.env, &callee, &args)
            .map_err(|mut trace| {
                trace.add_context(span.clone());
                trace
            })?;
        Ok(Some(self.do_return(result)?))
    }

    /// Shared frame setup: arity selection, variadic packing in
    /// place, capture/self injection ahead of the arguments, frame
    /// push with `base` at the first injected slot.
    fn call_compiled_at(
        &mut self,
        closure: Rc<Closure>,
        argc: usize,
        callee_idx: usize,
        ret_sp: usize,
        span: &Span,
    ) -> Result<(), Trace> {
        let FnRepr::Code(protos) = &closure.repr else {
            unreachable!("tree-walk closure in the compiled call path");
        };
        let proto = Rc::clone(select_arity(protos, argc).ok_or_else(|| {
            Trace::error(
                ErrorKind::Arity,
                &format!(
                    "wrong number of args ({}) passed to {}",
                    argc,
                    closure.trace_name()
                ),
                span.clone(),
            )
        })?);

        if proto.variadic {
            let mut args = self.stack.split_off(callee_idx + 1);
            let rest = pack_rest(&mut args, proto.arity);
            args.push(rest);
            self.stack.extend(args);
        }

        // captures (and the self slot for named fns) go ahead of the
        // arguments, shifting them right
        let mut injected: Vec<Value> = closure.captured.borrow().clone();
        if proto.has_self_ref {
            injected.push(Value::Fn(Rc::clone(&closure)));
        }
        if !injected.is_empty() {
            let _ = self
                .stack
                .splice(callee_idx + 1..callee_idx + 1, injected);
        }

        self.push_frame(
            proto,
            callee_idx + 1,
            ret_sp,
            Some(&closure.defining_ns),
        )
    }

    fn make_closure(&mut self, operand: u16, span: &Span) -> Result<(), Trace> {
        let Value::Fn(template) = self.constant(operand)? else {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "closure template is not a fn",
                span.clone(),
            ));
        };
        let FnRepr::Code(protos) = &template.repr else {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "closure template is not compiled",
                span.clone(),
            ));
        };

        let capture_slots = &protos[0].capture_slots;
        let mut captured = Vec::with_capacity(capture_slots.len());
        for slot in capture_slots {
            captured.push(self.local(*slot)?);
        }

        let closure = Closure::wrap(
            template.name.clone(),
            FnRepr::Code(protos.clone()),
            captured,
            self.env.current_ns().name.clone(),
        );
        self.push(Value::Fn(Rc::new(closure)))
    }

    /// `LetFnPatch`: the letfn binding slots now hold every sibling;
    /// point each closure's captures at the live values.
    fn letfn_patch(&mut self, inst: Instruction, span: &Span) -> Result<(), Trace> {
        let (count, base) = inst.pair();
        let frame_base = self.frames.last().expect("no active frame").base;

        for k in 0..count {
            let Value::Fn(closure) = self.stack[frame_base + base + k].clone()
            else {
                return Err(Trace::error(
                    ErrorKind::InvalidInstruction,
                    "letfn slot does not hold a fn",
                    span.clone(),
                ));
            };
            let FnRepr::Code(protos) = &closure.repr else {
                continue;
            };
            let mut captured = Vec::with_capacity(protos[0].capture_slots.len());
            for slot in &protos[0].capture_slots {
                captured.push(self.local(*slot)?);
            }
            *closure.captured.borrow_mut() = captured;
        }
        Ok(())
    }

    fn def(&mut self, inst: Instruction, span: &Span) -> Result<(), Trace> {
        let has_init = inst.operand & OPERAND_FLAG == 0;
        let (_, name) = self.symbol_constant(inst.operand)?;

        let var = self.env.current_ns().intern(&name);
        if has_init {
            let value = self.pop()?;
            var.bind_root(value);
        }
        var.macro_flag.set(inst.op == Opcode::DefMacro);
        var.dynamic.set(inst.op == Opcode::DefDynamic);
        var.private.set(inst.op == Opcode::DefPrivate);
        tracing::trace!(var = %name, at = %span, "def");

        self.push(Value::Symbol(Rc::new(Symbol::qualified(
            &var.ns_name,
            &name,
        ))))
    }

    fn def_multi(&mut self, inst: Instruction, span: &Span) -> Result<(), Trace> {
        let hierarchy = if inst.operand & OPERAND_FLAG != 0 {
            Some(self.pop()?)
        } else {
            None
        };
        let dispatch_fn = self.pop()?;
        let (_, name) = self.symbol_constant(inst.operand)?;

        let multi = Rc::new(MultiFn::new(&name, dispatch_fn));
        multi.set_hierarchy(hierarchy);
        let var = self.env.current_ns().intern(&name);
        var.bind_root(Value::MultiFn(Rc::clone(&multi)));
        tracing::trace!(multi = %name, at = %span, "defmulti");
        self.push(Value::MultiFn(multi))
    }

    fn def_method(&mut self, inst: Instruction, span: &Span) -> Result<(), Trace> {
        let method = self.pop()?;
        let dispatch_value = self.pop()?;
        let (ns, name) = self.symbol_constant(inst.operand)?;

        let multi = self.env.resolve_value(ns.as_deref(), &name, span)?;
        let Value::MultiFn(multi) = multi else {
            return Err(Trace::error(
                ErrorKind::Type,
                &format!("{} is not a multimethod", name),
                span.clone(),
            ));
        };
        multi.add_method(dispatch_value, method);
        self.push(Value::MultiFn(multi))
    }

    fn def_protocol(&mut self, inst: Instruction, span: &Span) -> Result<(), Trace> {
        let Value::Vector(descriptor) = self.constant(inst.operand)? else {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "malformed protocol descriptor",
                span.clone(),
            ));
        };
        let items = descriptor.to_vec();
        let Some(Value::Str(name)) = items.first() else {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "malformed protocol descriptor",
                span.clone(),
            ));
        };

        let mut sigs = Vec::with_capacity(items.len() - 1);
        for sig in &items[1..] {
            let Value::Vector(sig) = sig else { continue };
            if let (Some(Value::Str(method)), Some(Value::Int(arity))) =
                (sig.get(0), sig.get(1))
            {
                sigs.push((Rc::clone(&method), arity as usize));
            }
        }

        let protocol = Rc::new(Protocol::new(name, sigs.clone()));
        let var = self.env.current_ns().intern(name);
        var.bind_root(Value::Protocol(Rc::clone(&protocol)));
        for (method, _arity) in &sigs {
            let pfn = ProtocolFn::new(Rc::clone(&protocol), method);
            let method_var = self.env.current_ns().intern(method);
            method_var.bind_root(Value::ProtocolFn(Rc::new(pfn)));
        }
        self.push(Value::Protocol(protocol))
    }

    fn extend_type_method(
        &mut self,
        inst: Instruction,
        span: &Span,
    ) -> Result<(), Trace> {
        let Value::Vector(pair) = self.constant(inst.operand)? else {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "malformed extend-type descriptor",
                span.clone(),
            ));
        };
        let (Some(Value::Str(type_key)), Some(Value::Str(method))) =
            (pair.get(0), pair.get(1))
        else {
            return Err(Trace::error(
                ErrorKind::InvalidInstruction,
                "malformed extend-type descriptor",
                span.clone(),
            ));
        };

        let f = self.pop()?;
        let Some(Value::Protocol(protocol)) = self.stack.last() else {
            return Err(Trace::error(
                ErrorKind::Type,
                "extend-type expects a protocol",
                span.clone(),
            ));
        };
        protocol.extend_method(&type_key, &method, f);
        Ok(())
    }
}

enum BranchKind {
    Ne,
    Ge,
    Gt,
}
