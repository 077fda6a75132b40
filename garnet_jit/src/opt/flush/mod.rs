//! Flow-sensitive flush/monitor elimination.
//!
//! Runs after escape fixup, over the same candidate set. Publication
//! barriers (`allocfence`) guarding a still-unpublished allocation are
//! removed when a later barrier covers them on every path, or moved to a
//! single provably-sufficient later point; local-object monitors marked by
//! fixup are deleted.
//!
//! Same-block redundancy goes first (a cheap linear sweep); the global
//! pass needs the must-reach bits and a reducible CFG, so an improper
//! region aborts only the global pass. Unbalanced monitor structure
//! disables monitor removal but not flush elimination.

pub mod dataflow;
pub mod monitors;

use smallvec::SmallVec;

use garnet_core::{GarnetError, GarnetResult};

use crate::analysis::dominators::{is_reducible, Dominators};
use crate::ir::cfg::BlockId;
use crate::ir::method::MethodIr;
use crate::ir::stmt::StmtId;
use crate::opt::escape::{CandidateId, CandidateSet};
use crate::opt::OptContext;

pub use dataflow::{region_between, CandidateBits};
pub use monitors::{monitors_balanced, MonitorStats};

// =============================================================================
// Seed
// =============================================================================

/// Barrier-relevant facts for one tracked candidate.
#[derive(Debug, Clone)]
pub struct FlushCandidate {
    /// Candidate index (discovery order).
    pub id: CandidateId,
    /// The allocation statement.
    pub alloc_stmt: StmtId,
    /// The allocation's block.
    pub alloc_block: BlockId,
    /// Barriers guarding this candidate.
    pub fence_stmts: Vec<StmtId>,
    /// Statements where the candidate reaches an external sink.
    pub escape_stmts: Vec<StmtId>,
    /// Monitors guarding this candidate.
    pub lock_stmts: Vec<StmtId>,
}

/// Input of the elimination pass, derived from the escape candidate set.
#[derive(Debug, Clone, Default)]
pub struct FlushSeed {
    /// Tracked candidates, in discovery order.
    pub entries: Vec<FlushCandidate>,
    /// Monitor statements fixup marked as local-object monitors.
    pub local_monitors: Vec<StmtId>,
}

impl FlushSeed {
    /// Build the seed from the analyzed candidate set.
    #[must_use]
    pub fn from_candidates(
        ir: &MethodIr,
        cands: &CandidateSet,
        local_monitors: Vec<StmtId>,
    ) -> Self {
        let entries = cands
            .iter()
            .filter(|c| !c.profile_only)
            .map(|c| FlushCandidate {
                id: c.id,
                alloc_stmt: c.stmt,
                alloc_block: ir.stmt(c.stmt).block,
                fence_stmts: c.fence_stmts.clone(),
                escape_stmts: c.escape_stmts.clone(),
                lock_stmts: c.lock_stmts.clone(),
            })
            .collect();
        Self {
            entries,
            local_monitors,
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Counters from one elimination run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushStats {
    /// Barriers removed by the same-block sweep.
    pub local_fences_removed: u32,
    /// Barriers removed by the global pass.
    pub global_fences_removed: u32,
    /// Barriers relocated to a later covering point.
    pub fences_moved: u32,
    /// Monitor statements removed.
    pub monitors_removed: u32,
    /// The global pass aborted on an improper region.
    pub aborted_improper: bool,
    /// Monitor removal was disabled.
    pub monitor_removal_disabled: bool,
}

// =============================================================================
// Pass
// =============================================================================

/// The flush/monitor elimination pass.
#[derive(Debug, Default)]
pub struct FlushMonitorElimination {
    stats: FlushStats,
}

impl FlushMonitorElimination {
    /// Create the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters from the last run.
    #[must_use]
    pub fn stats(&self) -> &FlushStats {
        &self.stats
    }

    /// Run elimination. Returns whether the IR changed.
    pub fn run(
        &mut self,
        ir: &mut MethodIr,
        ctx: &OptContext<'_>,
        seed: &FlushSeed,
    ) -> GarnetResult<bool> {
        self.stats = FlushStats::default();
        if seed.entries.is_empty() && seed.local_monitors.is_empty() {
            return Ok(false);
        }
        ctx.interrupt.check()?;

        self.local_sweep(ir, seed);

        match self.global_pass(ir, seed) {
            Ok(()) => {}
            Err(GarnetError::ImproperRegion) => {
                self.stats.aborted_improper = true;
                tracing::debug!(method = %ir.name, "global flush pass aborted: improper region");
            }
            Err(other) => return Err(other),
        }

        let monitor_stats = monitors::remove_local_monitors(ir, &seed.local_monitors);
        self.stats.monitors_removed = monitor_stats.removed;
        self.stats.monitor_removal_disabled = monitor_stats.disabled;

        if ctx.options.trace_flush {
            tracing::info!(method = %ir.name, stats = ?self.stats, "flush elimination trace");
        }

        let changed = self.stats.local_fences_removed > 0
            || self.stats.global_fences_removed > 0
            || self.stats.fences_moved > 0
            || self.stats.monitors_removed > 0;
        Ok(changed)
    }

    /// Remove barriers made redundant by a later barrier in the same
    /// block with no intervening escape.
    fn local_sweep(&mut self, ir: &mut MethodIr, seed: &FlushSeed) {
        for entry in &seed.entries {
            if entry.fence_stmts.len() < 2 {
                continue;
            }
            for block in ir.cfg.block_ids().collect::<Vec<_>>() {
                let stmts: Vec<StmtId> = ir.cfg.block(block).stmts.clone();
                let mut pending: Option<StmtId> = None;
                for sid in stmts {
                    if entry.escape_stmts.contains(&sid) {
                        pending = None;
                    } else if entry.fence_stmts.contains(&sid) {
                        if let Some(prev) = pending {
                            ir.detach(prev);
                            self.stats.local_fences_removed += 1;
                            tracing::trace!(
                                candidate = %entry.id,
                                fence = %prev,
                                "same-block redundant barrier removed"
                            );
                        }
                        pending = Some(sid);
                    }
                }
            }
        }
    }

    /// Cross-block redundancy and relocation.
    fn global_pass(&mut self, ir: &mut MethodIr, seed: &FlushSeed) -> GarnetResult<()> {
        let doms = Dominators::compute(&ir.cfg);
        if !is_reducible(&ir.cfg, &doms) {
            return Err(GarnetError::ImproperRegion);
        }
        let pdoms = Dominators::compute_post(&ir.cfg);
        let bits = CandidateBits::compute(ir, seed);

        for (idx, entry) in seed.entries.iter().enumerate() {
            self.cover_redundant_fences(ir, entry, idx, &bits, &pdoms);
        }
        for (idx, entry) in seed.entries.iter().enumerate() {
            self.merge_fences(ir, entry, idx, &bits, &pdoms);
        }
        Ok(())
    }

    /// Delete a barrier covered by a later barrier of the same candidate:
    /// the candidate bit must still hold entering the later block, the
    /// later block must postdominate the earlier one, and the region
    /// between them must be leak-free and escape-free.
    fn cover_redundant_fences(
        &mut self,
        ir: &mut MethodIr,
        entry: &FlushCandidate,
        idx: usize,
        bits: &CandidateBits,
        pdoms: &Dominators,
    ) {
        let fences: Vec<StmtId> = entry
            .fence_stmts
            .iter()
            .copied()
            .filter(|&s| ir.is_attached(s))
            .collect();

        for &fence in &fences {
            let b1 = ir.stmt(fence).block;
            for &later in &fences {
                if later == fence || !ir.is_attached(later) || !ir.is_attached(fence) {
                    continue;
                }
                let b2 = ir.stmt(later).block;
                if b2 == b1 {
                    continue;
                }
                if !bits.live_in[b2.index()][idx] {
                    continue;
                }
                if !pdoms.dominates(b2, b1) {
                    continue;
                }
                let Some(region) = region_between(ir, b1, b2) else {
                    continue;
                };
                if self.region_escapes(ir, entry, &region, b2) {
                    continue;
                }
                ir.detach(fence);
                self.stats.global_fences_removed += 1;
                tracing::trace!(
                    candidate = %entry.id,
                    fence = %fence,
                    covered_by = %later,
                    "cross-block redundant barrier removed"
                );
                break;
            }
        }
    }

    /// Merge the remaining barriers of one candidate into a single
    /// later point that postdominates them all, splitting entry edges
    /// into the target when it can also be reached another way.
    fn merge_fences(
        &mut self,
        ir: &mut MethodIr,
        entry: &FlushCandidate,
        idx: usize,
        bits: &CandidateBits,
        pdoms: &Dominators,
    ) {
        let fences: Vec<StmtId> = entry
            .fence_stmts
            .iter()
            .copied()
            .filter(|&s| ir.is_attached(s))
            .collect();
        if fences.len() < 2 {
            return;
        }
        let fence_blocks: Vec<BlockId> = fences.iter().map(|&s| ir.stmt(s).block).collect();
        if fence_blocks.iter().all(|&b| b == fence_blocks[0]) {
            return;
        }

        // A later point covering all of them.
        let target = ir
            .cfg
            .block_ids()
            .find(|&x| {
                !fence_blocks.contains(&x)
                    && bits.live_in[x.index()][idx]
                    && fence_blocks.iter().all(|&fb| pdoms.dominates(x, fb))
                    && fence_blocks.iter().all(|&fb| {
                        region_between(ir, fb, x)
                            .map(|region| !self.region_escapes(ir, entry, &region, x))
                            .unwrap_or(false)
                    })
            });
        let Some(target) = target else {
            return;
        };

        // The union of the fence regions must own every entry into the
        // target; foreign edges get split so the moved barrier does not
        // execute on paths that never allocated.
        let mut covered: Vec<BlockId> = Vec::new();
        for &fb in &fence_blocks {
            if let Some(region) = region_between(ir, fb, target) {
                for b in region {
                    if b != target && !covered.contains(&b) {
                        covered.push(b);
                    }
                }
            }
        }
        let preds: Vec<BlockId> = ir.cfg.block(target).preds.to_vec();
        let all_covered = preds.iter().all(|p| covered.contains(p));

        // Reuse one fence's operand tree for the relocated barrier.
        let template_root = ir.stmt(fences[0]).root;
        let new_root = ir.arena.duplicate_subtree(template_root);

        if all_covered {
            ir.prepend_block(target, new_root);
        } else {
            // Split each covered entry edge and fence there.
            let covered_preds: Vec<BlockId> = preds
                .iter()
                .copied()
                .filter(|p| covered.contains(p))
                .collect();
            if covered_preds.is_empty() {
                return;
            }
            for (i, p) in covered_preds.iter().enumerate() {
                let mid = ir.split_edge(*p, target);
                let root = if i == 0 {
                    new_root
                } else {
                    ir.arena.duplicate_subtree(template_root)
                };
                ir.prepend_block(mid, root);
            }
        }

        for &fence in &fences {
            ir.detach(fence);
        }
        self.stats.fences_moved += 1;
        tracing::debug!(
            candidate = %entry.id,
            target = %target,
            merged = fences.len(),
            "barriers merged at a later covering point"
        );
    }

    /// Whether any region block (other than the endpoint) contains an
    /// escape of the candidate.
    fn region_escapes(
        &self,
        ir: &MethodIr,
        entry: &FlushCandidate,
        region: &[BlockId],
        endpoint: BlockId,
    ) -> bool {
        let mut blocks: SmallVec<[BlockId; 8]> = SmallVec::new();
        for &b in region {
            if b != endpoint {
                blocks.push(b);
            }
        }
        entry
            .escape_stmts
            .iter()
            .any(|&sid| blocks.contains(&ir.stmt(sid).block))
    }
}
