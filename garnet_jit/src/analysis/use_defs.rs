//! Use-def chains for method-local symbols.
//!
//! Built from a forward reaching-definitions dataflow over definition
//! sites (`store_local` statement roots), then a per-block sweep that
//! resolves each `load_local` node against the definitions reaching it.

use bitvec::prelude::*;
use rustc_hash::FxHashMap;

use super::bits::{subtract_in_place, union_in_place};
use super::dominators::reverse_postorder;
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::OpCode;
use crate::ir::symbols::SymbolId;

/// Use-def information for one method body.
#[derive(Debug)]
pub struct UseDefs {
    /// Definition sites (`store_local` roots) in statement order.
    def_sites: Vec<NodeId>,
    /// Symbol each definition writes.
    def_symbol: Vec<SymbolId>,
    /// Reverse index: definition node -> dense index.
    def_index: FxHashMap<NodeId, usize>,
    /// Load node -> definitions reaching it.
    defs_of_use: FxHashMap<NodeId, Vec<NodeId>>,
    /// Definition node -> loads it reaches.
    uses_of_def: FxHashMap<NodeId, Vec<NodeId>>,
}

impl UseDefs {
    /// Compute use-def chains for all attached statements.
    #[must_use]
    pub fn compute(ir: &MethodIr) -> Self {
        let mut ud = Self {
            def_sites: Vec::new(),
            def_symbol: Vec::new(),
            def_index: FxHashMap::default(),
            defs_of_use: FxHashMap::default(),
            uses_of_def: FxHashMap::default(),
        };
        ud.collect_defs(ir);
        ud.resolve(ir);
        ud
    }

    /// Whether a node is a definition site.
    #[inline]
    #[must_use]
    pub fn is_def(&self, node: NodeId) -> bool {
        self.def_index.contains_key(&node)
    }

    /// Definitions reaching a `load_local` node.
    #[must_use]
    pub fn defs_of_use(&self, node: NodeId) -> &[NodeId] {
        self.defs_of_use.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Loads reached by a definition.
    #[must_use]
    pub fn uses_of_def(&self, node: NodeId) -> &[NodeId] {
        self.uses_of_def.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Number of definition sites.
    #[must_use]
    pub fn def_count(&self) -> usize {
        self.def_sites.len()
    }

    /// Definition sites writing a given symbol.
    pub fn defs_of_symbol(&self, sym: SymbolId) -> impl Iterator<Item = NodeId> + '_ {
        self.def_sites
            .iter()
            .zip(self.def_symbol.iter())
            .filter(move |(_, s)| **s == sym)
            .map(|(d, _)| *d)
    }

    fn collect_defs(&mut self, ir: &MethodIr) {
        for sid in ir.stmt_ids_in_block_order() {
            let root = ir.stmt(sid).root;
            if let OpCode::StoreLocal(sym) = ir.arena.node(root).op {
                self.def_index.insert(root, self.def_sites.len());
                self.def_sites.push(root);
                self.def_symbol.push(sym);
            }
        }
    }

    fn resolve(&mut self, ir: &MethodIr) {
        let nd = self.def_sites.len();
        let nb = ir.cfg.len();
        let rpo = reverse_postorder(&ir.cfg);

        // Per-block gen/kill.
        let mut gen: Vec<BitVec> = vec![bitvec![0; nd]; nb];
        let mut kill: Vec<BitVec> = vec![bitvec![0; nd]; nb];
        for block in ir.cfg.iter() {
            for &sid in &block.stmts {
                let root = ir.stmt(sid).root;
                if let Some(&di) = self.def_index.get(&root) {
                    let sym = self.def_symbol[di];
                    // This definition kills every other def of the symbol.
                    for (other, &other_sym) in self.def_symbol.iter().enumerate() {
                        if other_sym == sym && other != di {
                            kill[block.id.index()].set(other, true);
                            gen[block.id.index()].set(other, false);
                        }
                    }
                    gen[block.id.index()].set(di, true);
                    kill[block.id.index()].set(di, false);
                }
            }
        }

        // Forward may-reach fixpoint.
        let mut reach_in: Vec<BitVec> = vec![bitvec![0; nd]; nb];
        let mut reach_out: Vec<BitVec> = vec![bitvec![0; nd]; nb];
        let mut changed = true;
        while changed {
            changed = false;
            for &b in &rpo {
                let bi = b.index();
                let mut new_in = bitvec![0; nd];
                for &p in ir.cfg.block(b).preds.iter() {
                    union_in_place(&mut new_in, &reach_out[p.index()]);
                }
                let mut new_out = new_in.clone();
                subtract_in_place(&mut new_out, &kill[bi]);
                union_in_place(&mut new_out, &gen[bi]);
                if new_in != reach_in[bi] || new_out != reach_out[bi] {
                    reach_in[bi] = new_in;
                    reach_out[bi] = new_out;
                    changed = true;
                }
            }
        }

        // Per-block sweep resolving loads against the live definition set.
        for block in ir.cfg.iter() {
            let mut live = reach_in[block.id.index()].clone();
            for &sid in &block.stmts {
                let root = ir.stmt(sid).root;
                // Loads inside the tree see the state before the root's
                // own store takes effect.
                for id in ir.arena.postorder(root) {
                    if let OpCode::LoadLocal(sym) = ir.arena.node(id).op {
                        let mut reaching = Vec::new();
                        for di in live.iter_ones() {
                            if self.def_symbol[di] == sym {
                                reaching.push(self.def_sites[di]);
                            }
                        }
                        for &def in &reaching {
                            let uses = self.uses_of_def.entry(def).or_default();
                            if !uses.contains(&id) {
                                uses.push(id);
                            }
                        }
                        let entry = self.defs_of_use.entry(id).or_default();
                        for def in reaching {
                            if !entry.contains(&def) {
                                entry.push(def);
                            }
                        }
                    }
                }
                if let Some(&di) = self.def_index.get(&root) {
                    let sym = self.def_symbol[di];
                    for (other, &other_sym) in self.def_symbol.iter().enumerate() {
                        if other_sym == sym {
                            live.set(other, false);
                        }
                    }
                    live.set(di, true);
                }
            }
        }
    }
}
