//! Must-reach candidate bits.
//!
//! A forward, intersection-style dataflow over the CFG: candidate `c`'s
//! bit is set at its allocation point and cleared wherever `c`'s value can
//! reach an external sink. A bit that survives into a block on *every*
//! path means the allocation is still unpublished there, so a barrier for
//! it can be covered by a later one.

use bitvec::prelude::*;

use crate::analysis::bits::{intersect_in_place, subtract_in_place, union_in_place};
use crate::analysis::dominators::reverse_postorder;
use crate::ir::cfg::BlockId;
use crate::ir::method::MethodIr;

use super::FlushSeed;

/// Per-block candidate-bit sets.
#[derive(Debug)]
pub struct CandidateBits {
    /// Bits holding on every path into the block.
    pub live_in: Vec<BitVec>,
    /// Bits holding at block exit.
    pub live_out: Vec<BitVec>,
}

impl CandidateBits {
    /// Compute the must-reach sets for every block.
    #[must_use]
    pub fn compute(ir: &MethodIr, seed: &FlushSeed) -> Self {
        let nb = ir.cfg.len();
        let nc = seed.entries.len();
        let rpo = reverse_postorder(&ir.cfg);

        // Gen at the allocation's block; kill wherever an escape statement
        // of the candidate sits.
        let mut gen: Vec<BitVec> = vec![bitvec![0; nc]; nb];
        let mut kill: Vec<BitVec> = vec![bitvec![0; nc]; nb];
        for (idx, entry) in seed.entries.iter().enumerate() {
            gen[entry.alloc_block.index()].set(idx, true);
            for &sid in &entry.escape_stmts {
                let b = ir.stmt(sid).block;
                kill[b.index()].set(idx, true);
                // An escape in the allocation's own block wins.
                if b == entry.alloc_block {
                    gen[b.index()].set(idx, false);
                }
            }
        }

        let mut live_in: Vec<BitVec> = vec![bitvec![0; nc]; nb];
        let mut live_out: Vec<BitVec> = vec![bitvec![0; nc]; nb];

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &rpo {
                let bi = b.index();
                let preds = ir.cfg.block(b).preds.clone();
                let new_in = if preds.is_empty() {
                    bitvec![0; nc]
                } else {
                    // Must-intersect: the bit survives only on all paths.
                    let mut acc = bitvec![1; nc];
                    for &p in &preds {
                        intersect_in_place(&mut acc, &live_out[p.index()]);
                    }
                    acc
                };
                let mut new_out = new_in.clone();
                subtract_in_place(&mut new_out, &kill[bi]);
                union_in_place(&mut new_out, &gen[bi]);
                if new_in != live_in[bi] || new_out != live_out[bi] {
                    live_in[bi] = new_in;
                    live_out[bi] = new_out;
                    changed = true;
                }
            }
        }

        Self { live_in, live_out }
    }
}

/// All blocks on some path `from -> to`, provided the region has no leak
/// edge: every block in the region (other than `to`) only branches within
/// the region. Returns `None` when a leak exists or `to` is unreachable.
#[must_use]
pub fn region_between(ir: &MethodIr, from: BlockId, to: BlockId) -> Option<Vec<BlockId>> {
    let nb = ir.cfg.len();

    // Forward reachability from `from`, stopping at `to`.
    let mut fwd = bitvec![0; nb];
    fwd.set(from.index(), true);
    let mut work = vec![from];
    while let Some(b) = work.pop() {
        if b == to {
            continue;
        }
        for &s in &ir.cfg.block(b).succs {
            if !fwd[s.index()] {
                fwd.set(s.index(), true);
                work.push(s);
            }
        }
    }
    if !fwd[to.index()] {
        return None;
    }

    // Backward reachability from `to`.
    let mut bwd = bitvec![0; nb];
    bwd.set(to.index(), true);
    let mut work = vec![to];
    while let Some(b) = work.pop() {
        for &p in &ir.cfg.block(b).preds {
            if !bwd[p.index()] {
                bwd.set(p.index(), true);
                work.push(p);
            }
        }
    }

    let region: Vec<BlockId> = (0..nb as u32)
        .map(BlockId)
        .filter(|b| fwd[b.index()] && bwd[b.index()])
        .collect();

    // Leak check: no block in the region (except `to`) may branch out.
    for &b in &region {
        if b == to {
            continue;
        }
        for &s in &ir.cfg.block(b).succs {
            if !(fwd[s.index()] && bwd[s.index()]) {
                return None;
            }
        }
    }

    Some(region)
}
