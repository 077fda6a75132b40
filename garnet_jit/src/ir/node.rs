//! IR nodes and the owning arena.
//!
//! Nodes live in a per-method arena and are addressed by stable `NodeId`
//! indices. A node referenced from more than one statement tree (a value
//! commoned by the translator) is simply an index that appears under
//! several parents; nothing is reference-counted. Duplication is an
//! explicit deep copy into fresh slots.

use smallvec::SmallVec;

use super::opcodes::OpCode;
use super::types::ValueType;

// =============================================================================
// Node Id
// =============================================================================

/// Stable index of a node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a node id from a raw index.
    #[inline]
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// =============================================================================
// Node
// =============================================================================

/// One IR node: opcode, operands, result type.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Kind and immediate payload.
    pub op: OpCode,
    /// Operand node ids, in opcode-defined order.
    pub operands: SmallVec<[NodeId; 2]>,
    /// Result type (`Void` for statement-only nodes).
    pub ty: ValueType,
}

impl Node {
    /// Create a node.
    #[must_use]
    pub fn new(op: OpCode, operands: impl Into<SmallVec<[NodeId; 2]>>, ty: ValueType) -> Self {
        Self {
            op,
            operands: operands.into(),
            ty,
        }
    }

    /// Operand at position `i`, if present.
    #[inline]
    #[must_use]
    pub fn operand(&self, i: usize) -> Option<NodeId> {
        self.operands.get(i).copied()
    }
}

// =============================================================================
// Node Arena
// =============================================================================

/// Owning arena of IR nodes for one method.
#[derive(Debug, Default, Clone)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots (including recreated ones).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a new node.
    pub fn add(
        &mut self,
        op: OpCode,
        operands: impl Into<SmallVec<[NodeId; 2]>>,
        ty: ValueType,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(op, operands, ty));
        id
    }

    /// Borrow a node.
    #[inline]
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Borrow a node mutably.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Borrow a node if the id is in range.
    #[inline]
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Rebuild the node at `id` in place with a new kind/operands/type.
    ///
    /// Every parent referencing `id` sees the new node; this is how a
    /// statement is retargeted without touching its parents.
    pub fn recreate(
        &mut self,
        id: NodeId,
        op: OpCode,
        operands: impl Into<SmallVec<[NodeId; 2]>>,
        ty: ValueType,
    ) {
        self.nodes[id.index()] = Node::new(op, operands, ty);
    }

    /// Deep-copy the subtree rooted at `id` into fresh slots.
    ///
    /// Shared sub-nodes are copied once per occurrence in the subtree;
    /// the copy shares nothing with the original.
    pub fn duplicate_subtree(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id.index()].clone();
        let operands: SmallVec<[NodeId; 2]> = node
            .operands
            .iter()
            .map(|&op| self.duplicate_subtree(op))
            .collect();
        self.add(node.op, operands, node.ty)
    }

    /// Iterate `(id, node)` over every slot.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Visit the subtree rooted at `root` in post-order (operands first).
    ///
    /// A node commoned under several parents within the subtree is visited
    /// once per distinct id.
    pub fn for_each_postorder(&self, root: NodeId, f: &mut impl FnMut(NodeId, &Node)) {
        let mut visited: SmallVec<[NodeId; 8]> = SmallVec::new();
        self.postorder_inner(root, &mut visited, f);
    }

    fn postorder_inner(
        &self,
        id: NodeId,
        visited: &mut SmallVec<[NodeId; 8]>,
        f: &mut impl FnMut(NodeId, &Node),
    ) {
        if visited.contains(&id) {
            return;
        }
        visited.push(id);
        let node = &self.nodes[id.index()];
        for i in 0..node.operands.len() {
            let operand = self.nodes[id.index()].operands[i];
            self.postorder_inner(operand, visited, f);
        }
        f(id, &self.nodes[id.index()]);
    }

    /// Collect the subtree rooted at `root` in post-order.
    #[must_use]
    pub fn postorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.for_each_postorder(root, &mut |id, _| out.push(id));
        out
    }
}
