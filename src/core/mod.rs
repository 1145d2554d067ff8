//! The builtin registry: native routines interned into the core
//! namespace at boot, plus the fixed control vars the bootstrap
//! cache reconnects.

pub mod coll;
pub mod control;
pub mod math;
pub mod refs;

use std::rc::Rc;

use crate::data::value::{Builtin, NativeFn, Value};
use crate::env::{Env, CORE_NS};

/// The printer control vars the bootstrap cache re-wires on restore.
/// Printing itself is a collaborator; the core only owns the vars.
pub const PRINTER_VARS: [&str; 5] = [
    "*print-length*",
    "*print-level*",
    "*print-readably*",
    "*print-meta*",
    "*print-dup*",
];

const BUILTINS: &[(&str, NativeFn)] = &[
    // arithmetic & comparison
    ("+", math::add),
    ("-", math::sub),
    ("*", math::mul),
    ("/", math::div),
    ("+'", math::add_promoting),
    ("-'", math::sub_promoting),
    ("*'", math::mul_promoting),
    ("mod", math::mod_builtin),
    ("rem", math::rem_builtin),
    ("inc", math::inc),
    ("dec", math::dec),
    ("=", math::eq),
    ("not=", math::neq),
    ("<", math::lt),
    ("<=", math::le),
    (">", math::gt),
    (">=", math::ge),
    ("zero?", math::zero_pred),
    ("number?", math::number_pred),
    // collections
    ("list", coll::list),
    ("vector", coll::vector),
    ("vec", coll::vec),
    ("hash-map", coll::hash_map),
    ("hash-set", coll::hash_set),
    ("conj", coll::conj),
    ("assoc", coll::assoc),
    ("dissoc", coll::dissoc),
    ("disj", coll::disj),
    ("get", coll::get),
    ("nth", coll::nth),
    ("count", coll::count),
    ("contains?", coll::contains_pred),
    ("first", coll::first),
    ("next", coll::next),
    ("rest", coll::rest),
    ("cons", coll::cons),
    ("seq", coll::seq_builtin),
    ("empty?", coll::empty_pred),
    ("range", coll::range),
    ("repeat", coll::repeat),
    ("transient", coll::transient),
    ("conj!", coll::conj_bang),
    ("assoc!", coll::assoc_bang),
    ("dissoc!", coll::dissoc_bang),
    ("persistent!", coll::persistent_bang),
    ("meta", coll::meta),
    ("with-meta", coll::with_meta),
    ("str", coll::str_builtin),
    ("keyword", coll::keyword_builtin),
    ("symbol", coll::symbol_builtin),
    ("name", coll::name_builtin),
    ("namespace", coll::namespace_builtin),
    ("type-key", coll::type_key),
    // reference cells
    ("atom", refs::atom),
    ("deref", refs::deref),
    ("reset!", refs::reset_bang),
    ("swap!", refs::swap_bang),
    ("compare-and-set!", refs::compare_and_set_bang),
    ("set-validator!", refs::set_validator_bang),
    ("volatile!", refs::volatile_bang),
    ("vreset!", refs::vreset_bang),
    ("vswap!", refs::vswap_bang),
    ("delay*", refs::delay_star),
    ("force", refs::force),
    ("realized?", refs::realized_pred),
    // control
    ("apply", control::apply),
    ("identity", control::identity),
    ("not", control::not),
    ("reduce", control::reduce),
    ("reduced", control::reduced),
    ("reduced?", control::reduced_pred),
    ("ex-info", control::ex_info),
    ("ex-data", control::ex_data),
    ("ex-message", control::ex_message),
    ("ex-data-or-map", control::ex_data_or_map),
    ("isa?", control::isa_pred),
];

/// Interns every builtin into the core namespace and refers the lot
/// into `ns`. Also interns the printer control vars and `*ns*`.
pub fn install(env: &Rc<Env>) {
    let core = env.find_or_create_namespace(CORE_NS);

    for &(name, f) in BUILTINS {
        let var = core.intern(name);
        var.bind_root(Value::Builtin(Rc::new(Builtin { name, f })));
    }

    for name in PRINTER_VARS {
        let var = core.intern(name);
        var.dynamic.set(true);
        var.bind_root(match name {
            "*print-readably*" => Value::Bool(true),
            "*print-length*" | "*print-level*" => Value::Nil,
            _ => Value::Bool(false),
        });
    }
    let ns_var = core.intern("*ns*");
    ns_var.dynamic.set(true);
    ns_var.bind_root(Value::from_str(&env.current_ns().name));

    refer_core(env, "user");
    tracing::trace!(builtins = BUILTINS.len(), "core installed");
}

/// Makes every core var visible unqualified from `ns`.
pub fn refer_core(env: &Rc<Env>, ns: &str) {
    let core = env.find_or_create_namespace(CORE_NS);
    let target = env.find_or_create_namespace(ns);
    for var in core.interned_vars() {
        let name = var.name.clone();
        target.refer(&name, var);
    }
    target.set_alias("core", core);
}
