use std::mem;
use std::rc::Rc;

use crate::common::chunk::Chunk;
use crate::common::closure::{Closure, FnRepr};
use crate::common::opcode::{pack_pair, Opcode};
use crate::common::proto::FnProto;
use crate::common::span::{Span, Spanned};
use crate::common::trace::{ErrorKind, Trace};
use crate::compiler::node::{Binding, FnDef, Node, RecurKind};
use crate::data::symbol::Symbol;
use crate::data::value::Value;
use crate::env::CORE_NS;

/// The operand bit marking a var-family instruction that carries no
/// initializer / no extra stack argument.
pub const OPERAND_FLAG: u16 = 0x8000;
const OPERAND_MAX: usize = 0x7fff;

/// Lowers a top-level node to a zero-argument prototype the VM can
/// push as its first frame. `compile` walks the analyzed tree and
/// produces (unoptimized except for superinstruction fusion)
/// bytecode. Note that this struct should not be driven manually;
/// use the `compile` function instead.
///
/// Local slots are stack-shaped: the analyzer numbers a binding by
/// the frame-relative stack position its init lands on, so a `let`
/// binding simply stays where its init was evaluated.
pub fn compile(node: &Spanned<Node>) -> Result<Rc<FnProto>, Trace> {
    let mut compiler = Compiler::base();
    compiler.walk(node, false)?;
    Ok(Rc::new(compiler.finish(None, 0, false, vec![], false)))
}

/// The bytecode generator walks a `Node` tree and emits into the
/// current chunk, nesting itself when it crosses a `fn` boundary.
struct Compiler {
    /// The previous compiler (when compiling a nested fn).
    enclosing: Option<Box<Compiler>>,
    chunk: Chunk,
    /// High-water mark of local slots, for `FnProto::local_count`.
    max_locals: usize,
    /// Innermost-last stack of loop body entry points.
    loop_starts: Vec<usize>,
}

impl Compiler {
    fn base() -> Compiler {
        Compiler {
            enclosing: None,
            chunk: Chunk::empty(),
            max_locals: 0,
            loop_starts: vec![],
        }
    }

    /// Replace the current compiler with a fresh one, keeping a
    /// reference to the old one in `self.enclosing`.
    fn enter_fn(&mut self) {
        let nested = Compiler::base();
        let enclosing = mem::replace(self, nested);
        self.enclosing = Some(Box::new(enclosing));
    }

    /// Restore the enclosing compiler, returning the nested one for
    /// chunk extraction.
    fn exit_fn(&mut self) -> Compiler {
        let enclosing = self.enclosing.take();
        match enclosing {
            Some(compiler) => mem::replace(self, *compiler),
            None => unreachable!("can not exit past the root compiler"),
        }
    }

    fn finish(
        self,
        name: Option<Rc<str>>,
        arity: usize,
        variadic: bool,
        capture_slots: Vec<usize>,
        has_self_ref: bool,
    ) -> FnProto {
        let local_count = self.max_locals.max(
            capture_slots.len() + usize::from(has_self_ref) + arity + usize::from(variadic),
        );
        FnProto {
            name,
            arity,
            variadic,
            local_count,
            has_self_ref,
            capture_slots,
            chunk: self.chunk,
        }
    }

    fn note_slot(&mut self, slot: usize) {
        self.max_locals = self.max_locals.max(slot + 1);
    }

    fn constant(&mut self, value: Value, span: &Span) -> Result<u16, Trace> {
        let index = self.chunk.index_constant(value);
        if index > OPERAND_MAX {
            return Err(Trace::error(
                ErrorKind::ValueError,
                "constant pool exhausted",
                span.clone(),
            ));
        }
        Ok(index as u16)
    }

    fn walk(&mut self, node: &Spanned<Node>, tail: bool) -> Result<(), Trace> {
        let span = &node.span;
        match &node.item {
            Node::Constant(value) | Node::Quote(value) => {
                self.emit_constant(value, span)
            },
            Node::LocalRef(slot) => {
                self.chunk.emit(Opcode::LocalLoad, *slot as u16, span);
                Ok(())
            },
            Node::VarRef { ns, name } => {
                let index = self.symbol_constant(ns.as_deref(), name, span)?;
                self.chunk.emit(Opcode::VarLoad, index, span);
                Ok(())
            },
            Node::If { test, then, els } => self.if_form(test, then, els.as_deref(), tail, span),
            Node::Do(stmts) => self.do_form(stmts, tail, span),
            Node::Let { bindings, body } => {
                self.bind_all(bindings)?;
                self.walk(body, false)?;
                if !bindings.is_empty() {
                    self.chunk
                        .emit(Opcode::PopUnder, bindings.len() as u16, span);
                }
                Ok(())
            },
            Node::LetFn { bindings, body } => self.letfn_form(bindings, body, span),
            Node::Loop { bindings, body } => {
                self.bind_all(bindings)?;
                self.loop_starts.push(self.chunk.code.len());
                self.walk(body, false)?;
                self.loop_starts.pop();
                if !bindings.is_empty() {
                    self.chunk
                        .emit(Opcode::PopUnder, bindings.len() as u16, span);
                }
                Ok(())
            },
            Node::Recur { kind, base, args } => self.recur_form(*kind, *base, args, span),
            Node::Fn(def) => {
                let index = self.fn_template(def, span)?;
                self.chunk.emit(Opcode::Closure, index, span);
                Ok(())
            },
            Node::LazySeq(def) => {
                let index = self.fn_template(def, span)?;
                self.chunk.emit(Opcode::Closure, index, span);
                self.chunk.emit(Opcode::LazySeq, 0, span);
                Ok(())
            },
            Node::Call { callee, args } => self.call_form(callee, args, tail, span),
            Node::Def {
                name,
                init,
                macro_flag,
                dynamic,
                private,
            } => {
                let mut operand =
                    self.constant(Value::from_str(name), span)?;
                match init {
                    Some(init) => self.walk(init, false)?,
                    None => operand |= OPERAND_FLAG,
                }
                let op = if *macro_flag {
                    Opcode::DefMacro
                } else if *dynamic {
                    Opcode::DefDynamic
                } else if *private {
                    Opcode::DefPrivate
                } else {
                    Opcode::Def
                };
                self.chunk.emit(op, operand, span);
                Ok(())
            },
            Node::SetBang { ns, name, expr } => {
                self.walk(expr, false)?;
                let index = self.symbol_constant(ns.as_deref(), name, span)?;
                self.chunk.emit(Opcode::SetBang, index, span);
                Ok(())
            },
            Node::Throw(expr) => {
                self.walk(expr, false)?;
                self.chunk.emit(Opcode::Throw, 0, span);
                Ok(())
            },
            Node::Try {
                body,
                catch,
                finally,
            } => self.try_form(body, catch.as_ref(), finally.as_deref(), span),
            Node::DefProtocol { name, sigs } => {
                let descriptor = Value::vector(
                    std::iter::once(Value::from_str(name))
                        .chain(sigs.iter().map(|(method, arity)| {
                            Value::vector(vec![
                                Value::from_str(method),
                                Value::Int(*arity as i64),
                            ])
                        }))
                        .collect(),
                );
                let index = self.constant(descriptor, span)?;
                self.chunk.emit(Opcode::DefProtocol, index, span);
                Ok(())
            },
            Node::ExtendType {
                type_key,
                protocol,
                methods,
            } => {
                self.walk(protocol, false)?;
                for (method, body) in methods {
                    self.walk(body, false)?;
                    let index = self.constant(
                        Value::vector(vec![
                            Value::from_str(type_key),
                            Value::from_str(method),
                        ]),
                        span,
                    )?;
                    self.chunk.emit(Opcode::ExtendTypeMethod, index, span);
                }
                self.chunk.emit(Opcode::Pop, 0, span);
                self.chunk.emit(Opcode::Nil, 0, span);
                Ok(())
            },
            Node::DefMulti {
                name,
                dispatch,
                hierarchy,
            } => {
                self.walk(dispatch, false)?;
                let mut operand = self.constant(Value::from_str(name), span)?;
                if let Some(hierarchy) = hierarchy {
                    self.walk(hierarchy, false)?;
                    operand |= OPERAND_FLAG;
                }
                self.chunk.emit(Opcode::DefMulti, operand, span);
                Ok(())
            },
            Node::DefMethod {
                name,
                dispatch_value,
                method,
            } => {
                self.walk(dispatch_value, false)?;
                self.walk(method, false)?;
                let index = self.constant(Value::from_str(name), span)?;
                self.chunk.emit(Opcode::DefMethod, index, span);
                Ok(())
            },
        }
    }

    fn emit_constant(&mut self, value: &Value, span: &Span) -> Result<(), Trace> {
        match value {
            Value::Nil => {
                self.chunk.emit(Opcode::Nil, 0, span);
            },
            Value::Bool(true) => {
                self.chunk.emit(Opcode::True, 0, span);
            },
            Value::Bool(false) => {
                self.chunk.emit(Opcode::False, 0, span);
            },
            other => {
                let index = self.constant(other.clone(), span)?;
                self.chunk.emit(Opcode::Const, index, span);
            },
        }
        Ok(())
    }

    fn symbol_constant(
        &mut self,
        ns: Option<&str>,
        name: &str,
        span: &Span,
    ) -> Result<u16, Trace> {
        let symbol = match ns {
            Some(ns) => Symbol::qualified(ns, name),
            None => Symbol::simple(name),
        };
        self.constant(Value::Symbol(Rc::new(symbol)), span)
    }

    fn bind_all(&mut self, bindings: &[Binding]) -> Result<(), Trace> {
        for binding in bindings {
            self.walk(&binding.init, false)?;
            self.note_slot(binding.slot);
        }
        Ok(())
    }

    fn do_form(
        &mut self,
        stmts: &[Spanned<Node>],
        tail: bool,
        span: &Span,
    ) -> Result<(), Trace> {
        if stmts.is_empty() {
            self.chunk.emit(Opcode::Nil, 0, span);
            return Ok(());
        }
        for stmt in &stmts[..stmts.len() - 1] {
            self.walk(stmt, false)?;
            self.chunk.emit(Opcode::Pop, 0, span);
        }
        self.walk(&stmts[stmts.len() - 1], tail)
    }

    fn if_form(
        &mut self,
        test: &Spanned<Node>,
        then: &Spanned<Node>,
        els: Option<&Spanned<Node>>,
        tail: bool,
        span: &Span,
    ) -> Result<(), Trace> {
        let else_jump = match self.fused_branch(test, span)? {
            Some(companion) => companion,
            None => {
                self.walk(test, false)?;
                self.chunk.emit(Opcode::JumpIfFalse, 0, span)
            },
        };

        self.walk(then, tail)?;
        let end_jump = self.chunk.emit(Opcode::Jump, 0, span);
        self.chunk.patch_jump(else_jump);

        match els {
            Some(els) => self.walk(els, tail)?,
            None => {
                self.chunk.emit(Opcode::Nil, 0, span);
            },
        }
        self.chunk.patch_jump(end_jump);
        Ok(())
    }

    /// Fuses a comparison test directly into a compare-and-branch
    /// superinstruction when the comparison's operands are locals or
    /// a local and a small constant. Returns the companion jump's
    /// index for patching, or `None` when the shape doesn't fuse.
    fn fused_branch(
        &mut self,
        test: &Spanned<Node>,
        span: &Span,
    ) -> Result<Option<usize>, Trace> {
        let Node::Call { callee, args } = &test.item else {
            return Ok(None);
        };
        let Some(name) = core_callee_name(callee) else {
            return Ok(None);
        };
        if args.len() != 2 {
            return Ok(None);
        }

        // branch fires when the test is false
        let (op, lhs, rhs) = match name {
            "=" => (0, &args[0], &args[1]),
            "<" => (1, &args[0], &args[1]),
            "<=" => (2, &args[0], &args[1]),
            // a > b is b < a, a >= b is b <= a
            ">" => (1, &args[1], &args[0]),
            ">=" => (2, &args[1], &args[0]),
            _ => return Ok(None),
        };

        let fused = match (&lhs.item, &rhs.item) {
            (Node::LocalRef(a), Node::LocalRef(b)) => {
                pack_pair(*a, *b).map(|packed| {
                    let opcode = match op {
                        0 => Opcode::BranchNeLocals,
                        1 => Opcode::BranchGeLocals,
                        _ => Opcode::BranchGtLocals,
                    };
                    (opcode, packed)
                })
            },
            (Node::LocalRef(slot), Node::Constant(value)) => {
                let index = self.chunk.index_constant(value.clone());
                pack_pair(*slot, index).map(|packed| {
                    let opcode = match op {
                        0 => Opcode::BranchNeLocalConst,
                        1 => Opcode::BranchGeLocalConst,
                        _ => Opcode::BranchGtLocalConst,
                    };
                    (opcode, packed)
                })
            },
            _ => None,
        };

        match fused {
            Some((opcode, packed)) => {
                self.chunk.emit(opcode, packed, span);
                // companion jump carries the branch offset
                Ok(Some(self.chunk.emit(Opcode::Jump, 0, span)))
            },
            None => Ok(None),
        }
    }

    fn letfn_form(
        &mut self,
        bindings: &[Binding],
        body: &Spanned<Node>,
        span: &Span,
    ) -> Result<(), Trace> {
        let Some(base) = bindings.first().map(|b| b.slot) else {
            return self.walk(body, false);
        };

        for binding in bindings {
            self.walk(&binding.init, false)?;
            self.note_slot(binding.slot);
        }
        let packed = pack_pair(bindings.len(), base).ok_or_else(|| {
            Trace::error(
                ErrorKind::ValueError,
                "letfn binding block too large to patch",
                span.clone(),
            )
        })?;
        self.chunk.emit(Opcode::LetFnPatch, packed, span);

        self.walk(body, false)?;
        self.chunk
            .emit(Opcode::PopUnder, bindings.len() as u16, span);
        Ok(())
    }

    fn recur_form(
        &mut self,
        kind: RecurKind,
        base: usize,
        args: &[Spanned<Node>],
        span: &Span,
    ) -> Result<(), Trace> {
        for arg in args {
            self.walk(arg, false)?;
        }

        let target = match kind {
            RecurKind::Loop => {
                *self.loop_starts.last().ok_or_else(|| {
                    Trace::error(
                        ErrorKind::ValueError,
                        "recur outside any loop",
                        span.clone(),
                    )
                })?
            },
            RecurKind::Fn => 0,
        };

        match pack_pair(base, args.len()) {
            Some(packed) => {
                self.chunk.emit(Opcode::RecurLoop, packed, span);
            },
            None => {
                return Err(Trace::error(
                    ErrorKind::ValueError,
                    "recur rebinds too many slots to encode",
                    span.clone(),
                ));
            },
        }
        let distance = self.chunk.back_distance(target);
        self.chunk.emit(Opcode::JumpBack, distance, span);
        Ok(())
    }

    fn try_form(
        &mut self,
        body: &Spanned<Node>,
        catch: Option<&crate::compiler::node::CatchClause>,
        finally: Option<&Spanned<Node>>,
        span: &Span,
    ) -> Result<(), Trace> {
        let try_begin = self.chunk.emit(Opcode::TryBegin, 0, span);
        self.walk(body, false)?;
        self.chunk.emit(Opcode::PopHandler, 0, span);
        let to_finally = self.chunk.emit(Opcode::Jump, 0, span);

        // catch target: the thrown value is on top of the stack
        self.chunk.patch_jump(try_begin);
        self.chunk.emit(Opcode::CatchBegin, 0, span);
        match catch {
            Some(clause) => {
                self.note_slot(clause.slot);
                self.walk(&clause.body, false)?;
                // drop the bound exception under the result
                self.chunk.emit(Opcode::PopUnder, 1, span);
            },
            None => {
                // try/finally without a catch: run finally, rethrow
                if let Some(finally) = finally {
                    self.walk(finally, false)?;
                    self.chunk.emit(Opcode::Pop, 0, span);
                }
                self.chunk.emit(Opcode::Throw, 0, span);
            },
        }

        self.chunk.patch_jump(to_finally);
        if let Some(finally) = finally {
            self.walk(finally, false)?;
            self.chunk.emit(Opcode::Pop, 0, span);
        }
        self.chunk.emit(Opcode::TryEnd, 0, span);
        Ok(())
    }

    fn fn_template(&mut self, def: &FnDef, span: &Span) -> Result<u16, Trace> {
        let mut protos = Vec::with_capacity(def.arities.len());
        for arity in &def.arities {
            self.enter_fn();
            let result = self.walk(&arity.body, true);
            let nested = self.exit_fn();
            result?;

            let mut nested = nested;
            nested.chunk.emit(Opcode::Ret, 0, &arity.body.span);
            protos.push(Rc::new(nested.finish(
                def.name.clone(),
                arity.params,
                arity.variadic,
                arity.capture_slots.clone(),
                arity.has_self_ref,
            )));
        }

        let template = Value::Fn(Rc::new(Closure::wrap(
            def.name.clone(),
            FnRepr::Code(protos),
            vec![],
            Rc::from(""),
        )));
        self.constant(template, span)
    }

    fn call_form(
        &mut self,
        callee: &Spanned<Node>,
        args: &[Spanned<Node>],
        tail: bool,
        span: &Span,
    ) -> Result<(), Trace> {
        if self.fused_arith(callee, args, span)? {
            return Ok(());
        }
        if self.collection_new(callee, args, span)? {
            return Ok(());
        }

        self.walk(callee, false)?;
        for arg in args {
            self.walk(arg, false)?;
        }
        let op = if tail { Opcode::TailCall } else { Opcode::Call };
        self.chunk.emit(op, args.len() as u16, span);
        Ok(())
    }

    /// Emits known two-operand arithmetic/comparison calls as direct
    /// opcodes, fusing the operand loads when they are locals or a
    /// local and a constant. Collection literals built through
    /// `list`/`vector`/`hash-map`/`hash-set` vars stay ordinary
    /// calls; only the arithmetic family is direct-linked.
    fn fused_arith(
        &mut self,
        callee: &Spanned<Node>,
        args: &[Spanned<Node>],
        span: &Span,
    ) -> Result<bool, Trace> {
        let Some(name) = core_callee_name(callee) else {
            return Ok(false);
        };
        if args.len() != 2 {
            return Ok(false);
        }
        let Some(plain) = arith_opcode(name) else {
            return Ok(false);
        };

        let fused = match (&args[0].item, &args[1].item) {
            (Node::LocalRef(a), Node::LocalRef(b)) => local_local_opcode(plain)
                .and_then(|op| pack_pair(*a, *b).map(|packed| (op, packed))),
            (Node::LocalRef(slot), Node::Constant(value)) => {
                match local_const_opcode(plain) {
                    Some(op) => {
                        let index = self.chunk.index_constant(value.clone());
                        pack_pair(*slot, index).map(|packed| (op, packed))
                    },
                    None => None,
                }
            },
            _ => None,
        };

        if let Some((op, packed)) = fused {
            self.chunk.emit(op, packed, span);
            return Ok(true);
        }

        self.walk(&args[0], false)?;
        self.walk(&args[1], false)?;
        self.chunk.emit(plain, 0, span);
        Ok(true)
    }
}

impl Compiler {
    /// Calls to the core collection constructors build their result
    /// on the stack directly instead of going through a var.
    fn collection_new(
        &mut self,
        callee: &Spanned<Node>,
        args: &[Spanned<Node>],
        span: &Span,
    ) -> Result<bool, Trace> {
        let Some(name) = core_callee_name(callee) else {
            return Ok(false);
        };
        let op = match name {
            "list" => Opcode::ListNew,
            "vector" => Opcode::VecNew,
            "hash-set" => Opcode::SetNew,
            // an odd argument count is a runtime error; leave it to
            // the builtin to raise
            "hash-map" if args.len() % 2 == 0 => Opcode::MapNew,
            _ => return Ok(false),
        };

        for arg in args {
            self.walk(arg, false)?;
        }
        let operand = if op == Opcode::MapNew {
            (args.len() / 2) as u16
        } else {
            args.len() as u16
        };
        self.chunk.emit(op, operand, span);
        Ok(true)
    }
}

/// The name of a directly-linked core callee: an unqualified var
/// reference, or one explicitly qualified to the core namespace.
/// Shadowing a core arithmetic name with a local var defeats the
/// direct link, same trade Clojure's compiler makes.
fn core_callee_name(callee: &Spanned<Node>) -> Option<&str> {
    match &callee.item {
        Node::VarRef { ns: None, name } => Some(name),
        Node::VarRef { ns: Some(ns), name } if &**ns == CORE_NS => Some(name),
        _ => None,
    }
}

fn arith_opcode(name: &str) -> Option<Opcode> {
    Some(match name {
        "+" => Opcode::Add,
        "-" => Opcode::Sub,
        "*" => Opcode::Mul,
        "/" => Opcode::Div,
        "mod" => Opcode::Mod,
        "rem" => Opcode::Rem,
        "=" => Opcode::Eq,
        "not=" => Opcode::Neq,
        "<" => Opcode::Lt,
        "<=" => Opcode::Le,
        ">" => Opcode::Gt,
        ">=" => Opcode::Ge,
        "+'" => Opcode::AddP,
        "-'" => Opcode::SubP,
        "*'" => Opcode::MulP,
        _ => return None,
    })
}

fn local_local_opcode(plain: Opcode) -> Option<Opcode> {
    Some(match plain {
        Opcode::Add => Opcode::AddLocals,
        Opcode::Sub => Opcode::SubLocals,
        Opcode::Eq => Opcode::EqLocals,
        Opcode::Lt => Opcode::LtLocals,
        Opcode::Le => Opcode::LeLocals,
        _ => return None,
    })
}

fn local_const_opcode(plain: Opcode) -> Option<Opcode> {
    Some(match plain {
        Opcode::Add => Opcode::AddLocalConst,
        Opcode::Sub => Opcode::SubLocalConst,
        Opcode::Eq => Opcode::EqLocalConst,
        Opcode::Lt => Opcode::LtLocalConst,
        Opcode::Le => Opcode::LeLocalConst,
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::node::build::*;
    use crate::compiler::node::RecurKind;

    #[test]
    fn constants_fold_to_dedicated_ops() {
        let proto = compile(&constant(Value::Nil)).unwrap();
        assert_eq!(proto.chunk.code[0].op, Opcode::Nil);
        assert!(proto.chunk.constants.is_empty());
    }

    #[test]
    fn if_lowers_to_jumps() {
        let proto = compile(&if_node(
            constant(Value::Bool(true)),
            int(1),
            Some(int(2)),
        ))
        .unwrap();

        let ops: Vec<Opcode> = proto.chunk.code.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::True,
                Opcode::JumpIfFalse,
                Opcode::Const,
                Opcode::Jump,
                Opcode::Const,
            ]
        );
    }

    #[test]
    fn local_comparison_fuses_into_branch() {
        // (if (< a b) 1 2) with a, b in slots 0 and 1
        let tree = let_node(
            vec![binding(0, "a", int(1)), binding(1, "b", int(2))],
            if_node(
                call(var_ref("<"), vec![local(0), local(1)]),
                int(1),
                Some(int(2)),
            ),
        );
        let proto = compile(&tree).unwrap();
        let ops: Vec<Opcode> = proto.chunk.code.iter().map(|i| i.op).collect();
        assert!(ops.contains(&Opcode::BranchGeLocals));
        assert!(!ops.contains(&Opcode::Lt));
    }

    #[test]
    fn arith_on_locals_fuses() {
        let tree = let_node(
            vec![binding(0, "a", int(1)), binding(1, "b", int(2))],
            call(var_ref("+"), vec![local(0), local(1)]),
        );
        let proto = compile(&tree).unwrap();
        let ops: Vec<Opcode> = proto.chunk.code.iter().map(|i| i.op).collect();
        assert!(ops.contains(&Opcode::AddLocals));

        let tree = call(var_ref("+"), vec![int(1), int(2)]);
        let proto = compile(&tree).unwrap();
        let ops: Vec<Opcode> = proto.chunk.code.iter().map(|i| i.op).collect();
        assert!(ops.contains(&Opcode::Add));
        assert!(!ops.contains(&Opcode::Call));
    }

    #[test]
    fn loops_emit_fused_recur() {
        let tree = loop_node(
            vec![binding(0, "i", int(0))],
            if_node(
                call(var_ref("<"), vec![local(0), int(10)]),
                recur(
                    RecurKind::Loop,
                    0,
                    vec![call(var_ref("+"), vec![local(0), int(1)])],
                ),
                Some(local(0)),
            ),
        );
        let proto = compile(&tree).unwrap();
        let ops: Vec<Opcode> = proto.chunk.code.iter().map(|i| i.op).collect();
        assert!(ops.contains(&Opcode::RecurLoop));
        assert!(ops.contains(&Opcode::JumpBack));
    }

    #[test]
    fn fn_bodies_nest_and_return() {
        let tree = fn_node(
            None,
            vec![arity(1, 0, local(0))],
        );
        let proto = compile(&tree).unwrap();
        assert_eq!(proto.chunk.code[0].op, Opcode::Closure);

        let Value::Fn(template) = &proto.chunk.constants[0] else {
            panic!("fn template missing from constant pool");
        };
        let FnRepr::Code(protos) = &template.repr else {
            panic!("template should be compiled");
        };
        assert_eq!(protos[0].arity, 1);
        assert_eq!(protos[0].chunk.code.last().unwrap().op, Opcode::Ret);
    }

    #[test]
    fn tail_calls_lower_to_tail_call() {
        let tree = fn_node(
            Some("f"),
            vec![Rc::new(crate::compiler::node::WalkArity {
                params: 1,
                variadic: false,
                capture_slots: vec![],
                has_self_ref: true,
                local_count: 2,
                body: call(local(0), vec![local(1)]),
            })],
        );
        let proto = compile(&tree).unwrap();
        let Value::Fn(template) = &proto.chunk.constants[0] else {
            panic!("fn template missing");
        };
        let FnRepr::Code(protos) = &template.repr else {
            panic!("template should be compiled");
        };
        let ops: Vec<Opcode> = protos[0].chunk.code.iter().map(|i| i.op).collect();
        assert!(ops.contains(&Opcode::TailCall));
    }
}
