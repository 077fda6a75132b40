//! Statements: tree-rooted units of execution order.
//!
//! A statement anchors one node tree in a basic block at a bytecode index.
//! Nodes below the root may be shared with other statements (commoned
//! values); the statement list is what gives the IR its execution order.

use super::cfg::BlockId;
use super::node::NodeId;

/// Stable index of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtId(pub u32);

impl StmtId {
    /// Raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for StmtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// One statement.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// Root node of the statement tree.
    pub root: NodeId,
    /// Owning block.
    pub block: BlockId,
    /// Bytecode index this statement was translated from.
    pub bci: u32,
}
