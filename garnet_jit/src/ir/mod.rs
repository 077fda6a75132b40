//! Method-level intermediate representation.
//!
//! The IR is a list of tree-rooted statements over a CFG of basic blocks:
//!
//! - `node`: the owning arena of tagged-variant nodes
//! - `opcodes`: node kinds and payloads
//! - `stmt`: statements (execution order)
//! - `cfg`: basic blocks, edges, frequencies
//! - `symbols`: parameters, locals, compiler temporaries
//! - `method`: the per-method container tying it all together
//! - `builder`: construction convenience for the translator and tests

pub mod builder;
pub mod cfg;
pub mod method;
pub mod node;
pub mod opcodes;
pub mod stmt;
pub mod symbols;
pub mod types;

pub use builder::{field, unresolved_field, IrBuilder};
pub use cfg::{Block, BlockId, BlockKind, Cfg};
pub use method::MethodIr;
pub use node::{Node, NodeArena, NodeId};
pub use opcodes::{CallKind, CallTarget, FieldRef, OpCode};
pub use stmt::{Stmt, StmtId};
pub use symbols::{Symbol, SymbolId, SymbolKind, SymbolTable};
pub use types::{ClassId, MethodId, StaticId, ValueType};
