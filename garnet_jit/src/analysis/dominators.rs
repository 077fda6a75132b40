//! Dominator and postdominator computation, block orderings, and the
//! structural soundness test used by the flow-sensitive passes.
//!
//! Dominance is computed with the classic set-intersection fixpoint over
//! reverse postorder; per-method CFGs are small enough that bit-set
//! iteration converges in two or three sweeps.

use bitvec::prelude::*;

use super::bits::intersect_in_place;
use crate::ir::cfg::{BlockId, Cfg};

// =============================================================================
// Orderings
// =============================================================================

/// Blocks reachable from the entry, in reverse postorder.
#[must_use]
pub fn reverse_postorder(cfg: &Cfg) -> Vec<BlockId> {
    let mut order = postorder(cfg);
    order.reverse();
    order
}

/// Blocks reachable from the entry, in postorder.
#[must_use]
pub fn postorder(cfg: &Cfg) -> Vec<BlockId> {
    let mut visited = bitvec![0; cfg.len()];
    let mut out = Vec::with_capacity(cfg.len());
    // Iterative DFS; each stack frame carries (block, next-successor-index).
    let mut stack: Vec<(BlockId, usize)> = vec![(cfg.entry(), 0)];
    visited.set(cfg.entry().index(), true);

    while let Some(frame) = stack.last_mut() {
        let block = frame.0;
        let idx = frame.1;
        let succs = &cfg.block(block).succs;
        if idx < succs.len() {
            frame.1 += 1;
            let succ = succs[idx];
            if !visited[succ.index()] {
                visited.set(succ.index(), true);
                stack.push((succ, 0));
            }
        } else {
            out.push(block);
            stack.pop();
        }
    }
    out
}

// =============================================================================
// Dominators
// =============================================================================

/// Dominator sets for every block of a CFG.
#[derive(Debug)]
pub struct Dominators {
    /// `sets[b]` holds the blocks dominating `b` (including `b` itself).
    sets: Vec<BitVec>,
    rpo: Vec<BlockId>,
}

impl Dominators {
    /// Compute dominators.
    #[must_use]
    pub fn compute(cfg: &Cfg) -> Self {
        Self::compute_directed(cfg, false)
    }

    /// Compute postdominators (dominance on the reversed CFG; every block
    /// without successors acts as an exit).
    #[must_use]
    pub fn compute_post(cfg: &Cfg) -> Self {
        Self::compute_directed(cfg, true)
    }

    fn compute_directed(cfg: &Cfg, reversed: bool) -> Self {
        let n = cfg.len();
        let mut sets: Vec<BitVec> = vec![bitvec![1; n]; n];
        let rpo = reverse_postorder(cfg);

        let roots: Vec<BlockId> = if reversed {
            cfg.iter()
                .filter(|b| b.succs.is_empty())
                .map(|b| b.id)
                .collect()
        } else {
            vec![cfg.entry()]
        };
        for &root in &roots {
            let mut only_self = bitvec![0; n];
            only_self.set(root.index(), true);
            sets[root.index()] = only_self;
        }

        // The iteration order matters only for convergence speed: RPO
        // forward, or its reverse for the postdominator direction.
        let order: Vec<BlockId> = if reversed {
            rpo.iter().rev().copied().collect()
        } else {
            rpo.clone()
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &order {
                if roots.contains(&b) {
                    continue;
                }
                let inputs: Vec<BlockId> = if reversed {
                    cfg.block(b).succs.to_vec()
                } else {
                    cfg.block(b).preds.to_vec()
                };
                let mut new_set = if inputs.is_empty() {
                    bitvec![0; n]
                } else {
                    bitvec![1; n]
                };
                for &p in &inputs {
                    intersect_in_place(&mut new_set, &sets[p.index()]);
                }
                new_set.set(b.index(), true);
                if new_set != sets[b.index()] {
                    sets[b.index()] = new_set;
                    changed = true;
                }
            }
        }

        Self { sets, rpo }
    }

    /// Whether `a` dominates `b` (reflexive).
    #[inline]
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.sets[b.index()][a.index()]
    }

    /// Reverse postorder computed alongside the sets.
    #[must_use]
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }
}

// =============================================================================
// Loops
// =============================================================================

/// Blocks that belong to some natural loop.
///
/// For every back edge `u -> h` (where `h` dominates `u`), the loop body is
/// `h` plus every block that reaches `u` without passing through `h`.
#[must_use]
pub fn blocks_in_loops(cfg: &Cfg, doms: &Dominators) -> BitVec {
    let mut in_loop = bitvec![0; cfg.len()];
    for block in cfg.iter() {
        for &succ in &block.succs {
            if !doms.dominates(succ, block.id) {
                continue;
            }
            let header = succ;
            in_loop.set(header.index(), true);
            let mut visited = bitvec![0; cfg.len()];
            visited.set(header.index(), true);
            let mut worklist = vec![block.id];
            while let Some(b) = worklist.pop() {
                if visited[b.index()] {
                    continue;
                }
                visited.set(b.index(), true);
                in_loop.set(b.index(), true);
                for &p in &cfg.block(b).preds {
                    worklist.push(p);
                }
            }
        }
    }
    in_loop
}

// =============================================================================
// Structural soundness
// =============================================================================

/// Check that the CFG has no improper (irreducible) region.
///
/// A CFG is reducible when deleting every back edge (an edge whose target
/// dominates its source) leaves an acyclic graph. Flow-sensitive passes
/// that reason about "all paths between A and B" abort on improper CFGs.
#[must_use]
pub fn is_reducible(cfg: &Cfg, doms: &Dominators) -> bool {
    // Kahn-style cycle check over the forward edges only.
    let n = cfg.len();
    let mut indegree = vec![0usize; n];
    for block in cfg.iter() {
        for &succ in &block.succs {
            if !doms.dominates(succ, block.id) {
                indegree[succ.index()] += 1;
            }
        }
    }

    let mut queue: Vec<BlockId> = (0..n as u32)
        .map(BlockId)
        .filter(|b| indegree[b.index()] == 0)
        .collect();
    let mut seen = 0usize;
    while let Some(b) = queue.pop() {
        seen += 1;
        for &succ in &cfg.block(b).succs {
            if doms.dominates(succ, b) {
                continue;
            }
            indegree[succ.index()] -= 1;
            if indegree[succ.index()] == 0 {
                queue.push(succ);
            }
        }
    }
    seen == n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::BlockKind;

    fn diamond() -> (Cfg, BlockId, BlockId, BlockId, BlockId) {
        let mut cfg = Cfg::new();
        let entry = cfg.entry();
        let then = cfg.add_block(BlockKind::Normal, 100);
        let els = cfg.add_block(BlockKind::Normal, 100);
        let merge = cfg.add_block(BlockKind::Normal, 100);
        cfg.add_edge(entry, then);
        cfg.add_edge(entry, els);
        cfg.add_edge(then, merge);
        cfg.add_edge(els, merge);
        (cfg, entry, then, els, merge)
    }

    #[test]
    fn test_postorder_diamond() {
        let (cfg, entry, ..) = diamond();
        let po = postorder(&cfg);
        assert_eq!(po.len(), 4);
        // Entry is last in postorder.
        assert_eq!(*po.last().unwrap(), entry);

        let rpo = reverse_postorder(&cfg);
        assert_eq!(rpo[0], entry);
    }

    #[test]
    fn test_dominators_diamond() {
        let (cfg, entry, then, els, merge) = diamond();
        let doms = Dominators::compute(&cfg);

        assert!(doms.dominates(entry, merge));
        assert!(doms.dominates(entry, then));
        assert!(doms.dominates(merge, merge));
        assert!(!doms.dominates(then, merge));
        assert!(!doms.dominates(els, merge));
    }

    #[test]
    fn test_postdominators_diamond() {
        let (cfg, entry, then, els, merge) = diamond();
        let pdoms = Dominators::compute_post(&cfg);

        assert!(pdoms.dominates(merge, entry));
        assert!(pdoms.dominates(merge, then));
        assert!(pdoms.dominates(merge, els));
        assert!(!pdoms.dominates(then, entry));
    }

    #[test]
    fn test_reducible_loop() {
        // entry -> header <-> body, header -> exit
        let mut cfg = Cfg::new();
        let entry = cfg.entry();
        let header = cfg.add_block(BlockKind::Normal, 100);
        let body = cfg.add_block(BlockKind::Normal, 100);
        let exit = cfg.add_block(BlockKind::Normal, 100);
        cfg.add_edge(entry, header);
        cfg.add_edge(header, body);
        cfg.add_edge(body, header);
        cfg.add_edge(header, exit);

        let doms = Dominators::compute(&cfg);
        assert!(doms.dominates(header, body));
        assert!(is_reducible(&cfg, &doms));
    }

    #[test]
    fn test_blocks_in_loops() {
        let mut cfg = Cfg::new();
        let entry = cfg.entry();
        let header = cfg.add_block(BlockKind::Normal, 100);
        let body = cfg.add_block(BlockKind::Normal, 100);
        let exit = cfg.add_block(BlockKind::Normal, 100);
        cfg.add_edge(entry, header);
        cfg.add_edge(header, body);
        cfg.add_edge(body, header);
        cfg.add_edge(header, exit);

        let doms = Dominators::compute(&cfg);
        let in_loop = blocks_in_loops(&cfg, &doms);
        assert!(!in_loop[entry.index()]);
        assert!(in_loop[header.index()]);
        assert!(in_loop[body.index()]);
        assert!(!in_loop[exit.index()]);
    }

    #[test]
    fn test_irreducible_region_detected() {
        // Two-entry loop: entry branches to a and b; a <-> b.
        let mut cfg = Cfg::new();
        let entry = cfg.entry();
        let a = cfg.add_block(BlockKind::Normal, 100);
        let b = cfg.add_block(BlockKind::Normal, 100);
        cfg.add_edge(entry, a);
        cfg.add_edge(entry, b);
        cfg.add_edge(a, b);
        cfg.add_edge(b, a);

        let doms = Dominators::compute(&cfg);
        assert!(!is_reducible(&cfg, &doms));
    }
}
