//! The per-method IR container.
//!
//! `MethodIr` ties together the node arena, the statement list, the CFG and
//! the symbol table for one compiled method. Optimization passes receive it
//! mutably and rewrite in place.

use smallvec::SmallVec;

use super::cfg::{BlockId, BlockKind, Cfg};
use super::node::{NodeArena, NodeId};
use super::opcodes::OpCode;
use super::stmt::{Stmt, StmtId};
use super::symbols::SymbolTable;
use super::types::{MethodId, ValueType};

/// IR of one method under compilation.
#[derive(Debug, Clone)]
pub struct MethodIr {
    /// Identity of the compiled method.
    pub method: MethodId,
    /// Qualified name (for suppression filters and tracing).
    pub name: String,
    /// Node arena.
    pub arena: NodeArena,
    /// Statement slots. Detached statements keep their slot; membership is
    /// what the block lists say.
    pub stmts: Vec<Stmt>,
    /// Control-flow graph.
    pub cfg: Cfg,
    /// Method-local symbols.
    pub symbols: SymbolTable,
    /// Number of incoming parameters.
    pub num_params: u32,
    /// Size of the originating bytecode, in bytes.
    pub bytecode_size: u32,
}

impl MethodIr {
    /// Create an empty method body with an entry block.
    #[must_use]
    pub fn new(method: MethodId, name: impl Into<String>, num_params: u32) -> Self {
        Self {
            method,
            name: name.into(),
            arena: NodeArena::new(),
            stmts: Vec::new(),
            cfg: Cfg::new(),
            symbols: SymbolTable::new(),
            num_params,
            bytecode_size: 0,
        }
    }

    /// Borrow a statement.
    #[inline]
    #[must_use]
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    /// Append a statement to the end of a block.
    pub fn append_stmt(&mut self, block: BlockId, root: NodeId, bci: u32) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt { root, block, bci });
        self.cfg.block_mut(block).stmts.push(id);
        id
    }

    /// Insert a new statement immediately before `anchor` in its block.
    pub fn insert_before(&mut self, anchor: StmtId, root: NodeId) -> StmtId {
        self.insert_relative(anchor, root, 0)
    }

    /// Insert a new statement immediately after `anchor` in its block.
    pub fn insert_after(&mut self, anchor: StmtId, root: NodeId) -> StmtId {
        self.insert_relative(anchor, root, 1)
    }

    fn insert_relative(&mut self, anchor: StmtId, root: NodeId, delta: usize) -> StmtId {
        let (block, bci) = {
            let a = self.stmt(anchor);
            (a.block, a.bci)
        };
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt { root, block, bci });
        let list = &mut self.cfg.block_mut(block).stmts;
        let pos = list
            .iter()
            .position(|&s| s == anchor)
            .map_or(list.len(), |p| p + delta);
        list.insert(pos, id);
        id
    }

    /// Insert a new statement at the very start of the entry block.
    pub fn prepend_entry(&mut self, root: NodeId) -> StmtId {
        let entry = self.cfg.entry();
        self.prepend_block(entry, root)
    }

    /// Insert a new statement at the very start of a block.
    pub fn prepend_block(&mut self, block: BlockId, root: NodeId) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt {
            root,
            block,
            bci: 0,
        });
        self.cfg.block_mut(block).stmts.insert(0, id);
        id
    }

    /// Detach a statement from its block (the slot remains allocated).
    pub fn detach(&mut self, id: StmtId) {
        let block = self.stmt(id).block;
        self.cfg.block_mut(block).stmts.retain(|&s| s != id);
    }

    /// Whether a statement is still attached to its block.
    #[must_use]
    pub fn is_attached(&self, id: StmtId) -> bool {
        let block = self.stmt(id).block;
        self.cfg.block(block).stmts.contains(&id)
    }

    /// All attached statement ids, blocks in id order.
    #[must_use]
    pub fn stmt_ids_in_block_order(&self) -> Vec<StmtId> {
        let mut out = Vec::with_capacity(self.stmts.len());
        for block in self.cfg.iter() {
            out.extend_from_slice(&block.stmts);
        }
        out
    }

    /// Split a block in two immediately before `at`.
    ///
    /// The anchor statement and everything after it move to a new block
    /// that inherits the original block's successors; the original block's
    /// only successor becomes the new block. Returns the new block.
    pub fn split_block_before(&mut self, at: StmtId) -> BlockId {
        let block = self.stmt(at).block;
        let (kind, frequency) = {
            let b = self.cfg.block(block);
            (b.kind, b.frequency)
        };
        let after = self.cfg.add_block(kind, frequency);

        // Move the statement tail.
        let pos = self
            .cfg
            .block(block)
            .stmts
            .iter()
            .position(|&s| s == at)
            .unwrap_or(0);
        let tail: Vec<StmtId> = self.cfg.block_mut(block).stmts.split_off(pos);
        for &sid in &tail {
            self.stmts[sid.index()].block = after;
        }
        self.cfg.block_mut(after).stmts = tail;

        // Transfer successors.
        let succs: Vec<BlockId> = self.cfg.block(block).succs.to_vec();
        for s in succs {
            self.cfg.remove_edge(block, s);
            self.cfg.add_edge(after, s);
        }
        self.cfg.add_edge(block, after);
        after
    }

    /// Split the edge `from -> to`, returning the new intermediate block.
    ///
    /// Explicit jumps in `from` that target `to` are retargeted at the new
    /// block; the new block ends with a `Goto` to `to`.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> BlockId {
        let frequency = self
            .cfg
            .block(from)
            .frequency
            .min(self.cfg.block(to).frequency);
        let mid = self.cfg.add_block(BlockKind::Normal, frequency);
        self.cfg.remove_edge(from, to);
        self.cfg.add_edge(from, mid);
        self.cfg.add_edge(mid, to);

        // Retarget explicit jumps in `from`.
        let stmt_ids: Vec<StmtId> = self.cfg.block(from).stmts.clone();
        for sid in stmt_ids {
            let root = self.stmt(sid).root;
            let node = self.arena.node(root).clone();
            match node.op {
                OpCode::Goto(t) if t == to => {
                    self.arena
                        .recreate(root, OpCode::Goto(mid), node.operands, ValueType::Void);
                }
                OpCode::Branch(t) if t == to => {
                    self.arena
                        .recreate(root, OpCode::Branch(mid), node.operands, ValueType::Void);
                }
                _ => {}
            }
        }

        let goto = self
            .arena
            .add(OpCode::Goto(to), SmallVec::new(), ValueType::Void);
        self.append_stmt(mid, goto, 0);
        mid
    }
}
