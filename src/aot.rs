//! Serialization for the AOT cache: compiled chunks round-trip
//! through a `CLJC` module (a string table, a proto table, and the
//! top-level chunk), and an environment snapshot restores namespaces
//! and vars over a freshly booted registry.
//!
//! Runtime values aren't directly serializable (they hold `Rc`s,
//! interned keywords, live cells), so everything goes through owned
//! duals: `SerialValue` for data, `SerialProto` for code. Values
//! that are runtime state rather than data (open atoms, channels of
//! any kind, closures over live captures, foreign handles) are
//! rejected or skipped, depending on the surface.

use std::fmt;
use std::rc::Rc;

use num_bigint::{BigInt, Sign};
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

use crate::common::chunk::Chunk;
use crate::common::closure::{Closure, FnRepr};
use crate::common::opcode::{Instruction, Opcode};
use crate::common::proto::FnProto;
use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::core;
use crate::data::num::BigDec;
use crate::data::symbol::{intern_keyword, Symbol};
use crate::data::value::{Pattern, Value};
use crate::env::Env;

/// The module magic tag.
pub const MAGIC: [u8; 4] = *b"CLJC";

/// Error during serialization/deserialization.
#[derive(Debug)]
pub enum SerializeError {
    /// The value holds runtime state, not data.
    NotSerializable(&'static str),
    /// The byte stream is not a module.
    BadMagic,
    /// A reference inside the module points outside its tables.
    CorruptModule(String),
    /// Bincode encoding/decoding error.
    Bincode(Box<bincode::Error>),
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::NotSerializable(kind) => {
                write!(f, "{} values cannot be serialized", kind)
            },
            SerializeError::BadMagic => write!(f, "not a CLJC module"),
            SerializeError::CorruptModule(detail) => {
                write!(f, "corrupt module: {}", detail)
            },
            SerializeError::Bincode(e) => write!(f, "bincode error: {}", e),
        }
    }
}

impl std::error::Error for SerializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializeError::Bincode(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<bincode::Error> for SerializeError {
    fn from(e: bincode::Error) -> Self {
        SerializeError::Bincode(Box::new(e))
    }
}

impl From<SerializeError> for Trace {
    fn from(e: SerializeError) -> Trace {
        Trace::error(ErrorKind::Io, &format!("{}", e), Span::empty())
    }
}

/// Serializable dual of `Value`, restricted to data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SerialValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Symbol { ns: Option<String>, name: String },
    Keyword { ns: Option<String>, name: String },
    List(Vec<SerialValue>),
    Vector(Vec<SerialValue>),
    Map(Vec<(SerialValue, SerialValue)>),
    Set(Vec<SerialValue>),
    BigInt { negative: bool, bytes: Vec<u8> },
    Ratio {
        negative: bool,
        numer: Vec<u8>,
        denom: Vec<u8>,
    },
    BigDec {
        negative: bool,
        unscaled: Vec<u8>,
        scale: i64,
    },
    Regex(String),
    /// A compiled fn template: a name-table index and the indices of
    /// its arity protos in the module's proto table.
    Template {
        name: Option<u32>,
        protos: Vec<u32>,
    },
}

/// Serializable dual of `FnProto`. Names index the string table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialProto {
    pub name: Option<u32>,
    pub arity: u32,
    pub variadic: bool,
    pub local_count: u32,
    pub has_self_ref: bool,
    pub capture_slots: Vec<u32>,
    pub code: Vec<(u8, u16)>,
    pub constants: Vec<SerialValue>,
    pub lines: Vec<u32>,
    pub columns: Vec<u32>,
}

/// A serialized compilation unit.
#[derive(Debug, Serialize, Deserialize)]
pub struct Module {
    pub magic: [u8; 4],
    pub strings: Vec<String>,
    pub protos: Vec<SerialProto>,
    /// Index of the top-level proto.
    pub top: u32,
}

struct ModuleBuilder {
    strings: Vec<String>,
    protos: Vec<SerialProto>,
}

impl ModuleBuilder {
    fn intern(&mut self, s: &str) -> u32 {
        match self.strings.iter().position(|existing| existing == s) {
            Some(index) => index as u32,
            None => {
                self.strings.push(s.to_string());
                (self.strings.len() - 1) as u32
            },
        }
    }

    /// Encodes a proto, its constants, and (recursively) every
    /// nested template. Children land in the table before their
    /// parent, so decoding can run front to back.
    fn add_proto(&mut self, proto: &FnProto) -> Result<u32, SerializeError> {
        let mut constants = Vec::with_capacity(proto.chunk.constants.len());
        for constant in &proto.chunk.constants {
            constants.push(self.encode_value(constant)?);
        }

        let name = proto.name.as_deref().map(|n| self.intern(n));
        self.protos.push(SerialProto {
            name,
            arity: proto.arity as u32,
            variadic: proto.variadic,
            local_count: proto.local_count as u32,
            has_self_ref: proto.has_self_ref,
            capture_slots: proto.capture_slots.iter().map(|s| *s as u32).collect(),
            code: proto
                .chunk
                .code
                .iter()
                .map(|inst| (inst.op as u8, inst.operand))
                .collect(),
            constants,
            lines: proto.chunk.lines.clone(),
            columns: proto.chunk.columns.clone(),
        });
        Ok((self.protos.len() - 1) as u32)
    }

    fn encode_value(&mut self, value: &Value) -> Result<SerialValue, SerializeError> {
        Ok(match value {
            Value::Nil => SerialValue::Nil,
            Value::Bool(b) => SerialValue::Bool(*b),
            Value::Int(n) => SerialValue::Int(*n),
            Value::Float(f) => SerialValue::Float(*f),
            Value::Char(c) => SerialValue::Char(*c),
            Value::Str(s) => SerialValue::Str(s.to_string()),
            Value::Symbol(s) => SerialValue::Symbol {
                ns: s.ns.as_deref().map(str::to_string),
                name: s.name.to_string(),
            },
            Value::Keyword(k) => SerialValue::Keyword {
                ns: k.ns.as_deref().map(str::to_string),
                name: k.name.to_string(),
            },
            Value::List(l) => SerialValue::List(
                l.items()
                    .iter()
                    .map(|v| self.encode_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Vector(v) => SerialValue::Vector(
                v.to_vec()
                    .iter()
                    .map(|v| self.encode_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::ArrayMap(_) | Value::HashMap(_) => {
                let pairs = match value {
                    Value::ArrayMap(m) => m.entries().to_vec(),
                    Value::HashMap(m) => m.iter().collect(),
                    _ => unreachable!(),
                };
                SerialValue::Map(
                    pairs
                        .iter()
                        .map(|(k, v)| {
                            Ok((self.encode_value(k)?, self.encode_value(v)?))
                        })
                        .collect::<Result<_, SerializeError>>()?,
                )
            },
            Value::Set(s) => SerialValue::Set(
                s.iter()
                    .map(|v| self.encode_value(&v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::BigInt(n) => {
                let (sign, bytes) = n.to_bytes_le();
                SerialValue::BigInt {
                    negative: sign == Sign::Minus,
                    bytes,
                }
            },
            Value::Ratio(r) => {
                let (numer_sign, numer) = r.numer().to_bytes_le();
                let (_, denom) = r.denom().to_bytes_le();
                SerialValue::Ratio {
                    negative: numer_sign == Sign::Minus,
                    numer,
                    denom,
                }
            },
            Value::BigDec(d) => {
                let (sign, unscaled) = d.unscaled.to_bytes_le();
                SerialValue::BigDec {
                    negative: sign == Sign::Minus,
                    unscaled,
                    scale: d.scale,
                }
            },
            Value::Regex(p) => SerialValue::Regex(p.source.to_string()),
            Value::Fn(closure) => {
                let FnRepr::Code(protos) = &closure.repr else {
                    return Err(SerializeError::NotSerializable("tree-walk fn"));
                };
                if !closure.captured.borrow().is_empty() {
                    return Err(SerializeError::NotSerializable(
                        "closure with live captures",
                    ));
                }
                let name = closure.name.as_deref().map(|n| self.intern(n));
                let mut indices = Vec::with_capacity(protos.len());
                for proto in protos {
                    indices.push(self.add_proto(proto)?);
                }
                SerialValue::Template {
                    name,
                    protos: indices,
                }
            },
            Value::Builtin(_) => {
                return Err(SerializeError::NotSerializable("builtin"))
            },
            Value::Atom(_) | Value::Volatile(_) => {
                return Err(SerializeError::NotSerializable("reference cell"))
            },
            Value::LazySeq(_)
            | Value::Cons(_)
            | Value::ChunkedCons(_)
            | Value::ArrayChunk(_)
            | Value::ChunkBuffer(_) => {
                return Err(SerializeError::NotSerializable("sequence"))
            },
            Value::TransientVector(_)
            | Value::TransientMap(_)
            | Value::TransientSet(_) => {
                return Err(SerializeError::NotSerializable("transient"))
            },
            Value::Protocol(_)
            | Value::ProtocolFn(_)
            | Value::MultiFn(_)
            | Value::Var(_) => {
                return Err(SerializeError::NotSerializable("registry value"))
            },
            Value::Delay(_) | Value::Reduced(_) => {
                return Err(SerializeError::NotSerializable("control value"))
            },
            Value::ForeignModule(_) | Value::ForeignFn(_) => {
                return Err(SerializeError::NotSerializable("foreign handle"))
            },
        })
    }
}

/// Serializes a compiled top-level proto into module bytes.
pub fn encode_module(proto: &FnProto) -> Result<Vec<u8>, SerializeError> {
    let mut builder = ModuleBuilder {
        strings: vec![],
        protos: vec![],
    };
    let top = builder.add_proto(proto)?;
    let module = Module {
        magic: MAGIC,
        strings: builder.strings,
        protos: builder.protos,
        top,
    };
    Ok(bincode::serialize(&module)?)
}

/// Deserializes module bytes back into a runnable proto, validating
/// the magic, every opcode byte, and every cross-table reference.
pub fn decode_module(bytes: &[u8]) -> Result<Rc<FnProto>, SerializeError> {
    let module: Module = bincode::deserialize(bytes)?;
    if module.magic != MAGIC {
        return Err(SerializeError::BadMagic);
    }

    let mut decoded: Vec<Rc<FnProto>> = Vec::with_capacity(module.protos.len());
    for (index, proto) in module.protos.iter().enumerate() {
        decoded.push(decode_proto(&module, proto, index, &decoded)?);
    }

    decoded
        .get(module.top as usize)
        .map(Rc::clone)
        .ok_or_else(|| {
            SerializeError::CorruptModule("top proto out of range".to_string())
        })
}

fn string_at(module: &Module, index: u32) -> Result<Rc<str>, SerializeError> {
    module
        .strings
        .get(index as usize)
        .map(|s| Rc::from(s.as_str()))
        .ok_or_else(|| {
            SerializeError::CorruptModule(format!(
                "string {} out of range",
                index
            ))
        })
}

fn decode_proto(
    module: &Module,
    proto: &SerialProto,
    index: usize,
    earlier: &[Rc<FnProto>],
) -> Result<Rc<FnProto>, SerializeError> {
    let mut constants = Vec::with_capacity(proto.constants.len());
    for constant in &proto.constants {
        constants.push(decode_value(module, constant, index, earlier)?);
    }

    let mut code = Vec::with_capacity(proto.code.len());
    for (byte, operand) in &proto.code {
        let op = Opcode::from_byte(*byte).ok_or_else(|| {
            SerializeError::CorruptModule(format!("bad opcode {:#x}", byte))
        })?;
        if constant_indexed(op) {
            let target = (operand & 0x7fff) as usize;
            if target >= constants.len() {
                return Err(SerializeError::CorruptModule(format!(
                    "{:?} references constant {} of {}",
                    op,
                    target,
                    constants.len()
                )));
            }
        }
        code.push(Instruction::new(op, *operand));
    }

    let name = match proto.name {
        Some(index) => Some(string_at(module, index)?),
        None => None,
    };

    Ok(Rc::new(FnProto {
        name,
        arity: proto.arity as usize,
        variadic: proto.variadic,
        local_count: proto.local_count as usize,
        has_self_ref: proto.has_self_ref,
        capture_slots: proto.capture_slots.iter().map(|s| *s as usize).collect(),
        chunk: Chunk {
            code,
            constants,
            lines: proto.lines.clone(),
            columns: proto.columns.clone(),
        },
    }))
}

fn constant_indexed(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Const
            | Opcode::Closure
            | Opcode::VarLoad
            | Opcode::Def
            | Opcode::DefMacro
            | Opcode::DefDynamic
            | Opcode::DefPrivate
            | Opcode::SetBang
            | Opcode::DefMulti
            | Opcode::DefMethod
            | Opcode::DefProtocol
            | Opcode::ExtendTypeMethod
    )
}

fn decode_value(
    module: &Module,
    value: &SerialValue,
    proto_index: usize,
    earlier: &[Rc<FnProto>],
) -> Result<Value, SerializeError> {
    Ok(match value {
        SerialValue::Nil => Value::Nil,
        SerialValue::Bool(b) => Value::Bool(*b),
        SerialValue::Int(n) => Value::Int(*n),
        SerialValue::Float(f) => Value::Float(*f),
        SerialValue::Char(c) => Value::Char(*c),
        SerialValue::Str(s) => Value::from_str(s),
        SerialValue::Symbol { ns, name } => Value::Symbol(Rc::new(match ns {
            Some(ns) => Symbol::qualified(ns, name),
            None => Symbol::simple(name),
        })),
        SerialValue::Keyword { ns, name } => {
            Value::Keyword(intern_keyword(ns.as_deref(), name))
        },
        SerialValue::List(items) => Value::list(
            items
                .iter()
                .map(|v| decode_value(module, v, proto_index, earlier))
                .collect::<Result<_, _>>()?,
        ),
        SerialValue::Vector(items) => Value::vector(
            items
                .iter()
                .map(|v| decode_value(module, v, proto_index, earlier))
                .collect::<Result<_, _>>()?,
        ),
        SerialValue::Map(pairs) => Value::map_from_pairs(
            pairs
                .iter()
                .map(|(k, v)| {
                    Ok((
                        decode_value(module, k, proto_index, earlier)?,
                        decode_value(module, v, proto_index, earlier)?,
                    ))
                })
                .collect::<Result<_, SerializeError>>()?,
        ),
        SerialValue::Set(items) => Value::set_from_items(
            items
                .iter()
                .map(|v| decode_value(module, v, proto_index, earlier))
                .collect::<Result<_, _>>()?,
        ),
        SerialValue::BigInt { negative, bytes } => {
            Value::BigInt(Rc::new(bigint_from(*negative, bytes)))
        },
        SerialValue::Ratio {
            negative,
            numer,
            denom,
        } => Value::Ratio(Rc::new(BigRational::new(
            bigint_from(*negative, numer),
            bigint_from(false, denom),
        ))),
        SerialValue::BigDec {
            negative,
            unscaled,
            scale,
        } => Value::BigDec(Rc::new(BigDec::new(
            bigint_from(*negative, unscaled),
            *scale,
        ))),
        SerialValue::Regex(source) => {
            let pattern = Pattern::compile(source).map_err(|_| {
                SerializeError::CorruptModule(format!(
                    "invalid pattern {:?}",
                    source
                ))
            })?;
            Value::Regex(Rc::new(pattern))
        },
        SerialValue::Template { name, protos } => {
            let mut arity_protos = Vec::with_capacity(protos.len());
            for index in protos {
                let proto =
                    earlier.get(*index as usize).map(Rc::clone).ok_or_else(
                        || {
                            SerializeError::CorruptModule(format!(
                                "proto {} references proto {} which is not \
                                 yet decoded",
                                proto_index, index
                            ))
                        },
                    )?;
                arity_protos.push(proto);
            }
            let name = match name {
                Some(index) => Some(string_at(module, *index)?),
                None => None,
            };
            Value::Fn(Rc::new(Closure::wrap(
                name,
                FnRepr::Code(arity_protos),
                vec![],
                Rc::from(""),
            )))
        },
    })
}

fn bigint_from(negative: bool, bytes: &[u8]) -> BigInt {
    let sign = if bytes.iter().all(|b| *b == 0) {
        Sign::NoSign
    } else if negative {
        Sign::Minus
    } else {
        Sign::Plus
    };
    BigInt::from_bytes_le(sign, bytes)
}

/// A snapshot of one var: flags plus the root when it is plain data.
/// Builtin and registry roots restore through the boot registry
/// instead, so they are recorded without a value.
#[derive(Debug, Serialize, Deserialize)]
pub struct VarSnapshot {
    pub name: String,
    pub macro_flag: bool,
    pub dynamic: bool,
    pub private: bool,
    pub root: Option<SerialValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub vars: Vec<VarSnapshot>,
    /// `(local-name, source-namespace, source-var)` triples.
    pub refers: Vec<(String, String, String)>,
    pub aliases: Vec<(String, String)>,
}

/// A serialized environment: what the bootstrap cache stores.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub magic: [u8; 4],
    pub namespaces: Vec<NamespaceSnapshot>,
    pub current: String,
}

/// Captures the restorable portion of an environment. Roots that
/// hold runtime state (builtins, protocols, cells) are recorded
/// flag-only; the registry rebuilds them at boot.
pub fn snapshot_env(env: &Rc<Env>) -> Result<Vec<u8>, SerializeError> {
    let mut namespaces = vec![];
    for name in env.namespace_names() {
        let ns = env.find_namespace(&name).expect("listed namespace exists");

        let mut vars = vec![];
        for var in ns.interned_vars() {
            let mut builder = ModuleBuilder {
                strings: vec![],
                protos: vec![],
            };
            let root = if var.is_bound() {
                // templates would need a proto table; the snapshot
                // carries plain data only
                match builder.encode_value(&var.deref()) {
                    Ok(value) if builder.protos.is_empty() => Some(value),
                    _ => None,
                }
            } else {
                None
            };
            vars.push(VarSnapshot {
                name: var.name.to_string(),
                macro_flag: var.macro_flag.get(),
                dynamic: var.dynamic.get(),
                private: var.private.get(),
                root,
            });
        }

        namespaces.push(NamespaceSnapshot {
            name: name.to_string(),
            vars,
            refers: ns
                .referred()
                .iter()
                .map(|(local, var)| {
                    (
                        local.to_string(),
                        var.ns_name.to_string(),
                        var.name.to_string(),
                    )
                })
                .collect(),
            aliases: ns
                .alias_names()
                .iter()
                .map(|(alias, target)| (alias.to_string(), target.to_string()))
                .collect(),
        });
    }

    Ok(bincode::serialize(&EnvSnapshot {
        magic: MAGIC,
        namespaces,
        current: env.current_ns().name.to_string(),
    })?)
}

/// Restores a snapshot into a freshly booted environment: recreates
/// namespaces, vars, refers, and aliases, then reconnects the fixed
/// printer control vars and `*ns*`.
pub fn restore_env(env: &Rc<Env>, bytes: &[u8]) -> Result<(), SerializeError> {
    let snapshot: EnvSnapshot = bincode::deserialize(bytes)?;
    if snapshot.magic != MAGIC {
        return Err(SerializeError::BadMagic);
    }

    let empty_module = Module {
        magic: MAGIC,
        strings: vec![],
        protos: vec![],
        top: 0,
    };

    for ns_snapshot in &snapshot.namespaces {
        let ns = env.find_or_create_namespace(&ns_snapshot.name);
        for var_snapshot in &ns_snapshot.vars {
            let var = ns.intern(&var_snapshot.name);
            var.macro_flag.set(var_snapshot.macro_flag);
            var.dynamic.set(var_snapshot.dynamic);
            var.private.set(var_snapshot.private);
            if let Some(root) = &var_snapshot.root {
                var.bind_root(decode_value(&empty_module, root, 0, &[])?);
            }
        }
    }

    // second pass: refers and aliases, once every var exists
    for ns_snapshot in &snapshot.namespaces {
        let ns = env.find_or_create_namespace(&ns_snapshot.name);
        for (local, source_ns, source_var) in &ns_snapshot.refers {
            if let Some(var) = env
                .find_namespace(source_ns)
                .map(|source| source.intern(source_var))
            {
                ns.refer(local, var);
            }
        }
        for (alias, target) in &ns_snapshot.aliases {
            let target = env.find_or_create_namespace(target);
            ns.set_alias(alias, target);
        }
    }

    // reconnect the fixed control vars over the restored roots
    let core_ns = env.find_or_create_namespace(crate::env::CORE_NS);
    for name in core::PRINTER_VARS {
        core_ns.intern(name).dynamic.set(true);
    }
    core_ns.intern("*ns*").dynamic.set(true);

    if let Some(current) = env.find_namespace(&snapshot.current) {
        env.set_current_ns(current);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::gen::compile;
    use crate::compiler::node::build::*;
    use crate::data::value::Value;

    #[test]
    fn module_round_trip() {
        let tree = do_node(vec![
            def("f", fn_node(None, vec![arity(1, 0, local(0))])),
            call(var_ref("f"), vec![int(41)]),
        ]);
        let proto = compile(&tree).unwrap();

        let bytes = encode_module(&proto).unwrap();
        let decoded = decode_module(&bytes).unwrap();

        assert_eq!(decoded.chunk.code, proto.chunk.code);
        assert_eq!(decoded.chunk.constants.len(), proto.chunk.constants.len());

        // ...and the decoded module runs with the same effects
        let env = crate::boot();
        let result = crate::vm::run(&env, &decoded).unwrap();
        assert_eq!(result, Value::Int(41));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let proto = compile(&int(1)).unwrap();
        let mut bytes = encode_module(&proto).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            decode_module(&bytes),
            Err(SerializeError::BadMagic) | Err(SerializeError::Bincode(_))
        ));
    }

    #[test]
    fn env_snapshot_round_trip() {
        let env = crate::boot();
        let ns = env.find_or_create_namespace("app");
        let var = ns.intern("answer");
        var.bind_root(Value::Int(42));
        ns.intern("flag").dynamic.set(true);

        let bytes = snapshot_env(&env).unwrap();

        let restored = crate::boot();
        restore_env(&restored, &bytes).unwrap();
        let ns = restored.find_namespace("app").unwrap();
        assert_eq!(
            ns.resolve("answer").unwrap().deref(),
            Value::Int(42)
        );
        assert!(ns.resolve("flag").unwrap().dynamic.get());
        // builtins still come from the registry
        assert!(restored
            .find_namespace(crate::env::CORE_NS)
            .unwrap()
            .resolve("+")
            .is_some());
    }
}
