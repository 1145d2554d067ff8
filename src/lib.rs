//! # Corvine
//! This crate contains the core runtime of the Corvine programming
//! language: the value model, the two evaluators, and the glue that
//! makes them interchangeable.
//!
//! ## Overview of the execution pipeline
//! The reader and analyzer are collaborators that live outside this
//! crate; what arrives here is an already-analyzed [`Node`] tree with
//! locals resolved to slot indices. From there, two backends produce
//! the same answers:
//!
//! - the **tree walker** (`eval`) interprets nodes directly, and is
//!   the correctness oracle;
//! - the **compiler + VM** (`compiler::gen`, `vm`) lower nodes to
//!   fixed-size instructions and run them on a stack machine.
//!
//! Every call (evaluator to evaluator, builtin to user fn, macro
//! expansion) funnels through one entry point,
//! [`dispatch::call_value`], so closures from either backend, as well
//! as keywords, maps, vectors, sets, vars, protocol fns, and
//! multimethods, can all sit in callee position anywhere.
//!
//! ## Running a program
//! ```
//! use corvine::compiler::node::build;
//! use corvine::compiler::gen::compile;
//!
//! let env = corvine::boot();
//! let program = build::call(
//!     build::var_ref("+"),
//!     vec![build::int(1), build::int(2)],
//! );
//!
//! // the reference evaluator...
//! let walked = corvine::eval::run(&env, &program).unwrap();
//! // ...and the VM agree
//! let compiled = compile(&program).unwrap();
//! let ran = corvine::vm::run(&env, &compiled).unwrap();
//! assert!(walked.equiv(&ran));
//! ```
//!
//! ## Errors
//! Both evaluators raise `Err(Trace)`: an error kind from the closed
//! taxonomy, a message, and the spans and call frames collected while
//! unwinding. User `throw`s carry their value inside the trace, so
//! crossing evaluator boundaries preserves the thrown value's
//! identity.

pub mod aot;
pub mod common;
pub mod compiler;
pub mod core;
pub mod data;
pub mod dispatch;
pub mod env;
pub mod eval;
pub mod gc;
pub mod vm;

use std::rc::Rc;

pub use common::span::{Span, Spanned};
pub use common::trace::{ErrorKind, Trace};
pub use compiler::node::Node;
pub use data::value::Value;
pub use env::Env;

/// Creates an environment with the builtin registry installed and
/// the core namespace referred into `user`. The starting point for
/// embedders and for every test in this crate.
pub fn boot() -> Rc<Env> {
    let env = Env::bare();
    core::install(&env);
    env
}

/// Tears down the per-thread evaluator state. Embedders call this
/// when shutting a thread down; leaving it out only leaks the slots
/// until the thread exits.
pub fn shutdown_thread() {
    env::reset_thread_state();
}
