//! The bytecode half of the core: the analyzed `Node` tree that both
//! evaluators consume, and the generator that lowers it to chunks.

pub mod gen;
pub mod node;
