//! Escape Analysis and Allocation Promotion
//!
//! Decides, for each heap-allocation site, whether the allocated value's
//! lifetime is provably confined to the compiling method (or a small
//! bounded interprocedural neighborhood), and rewrites promotable sites to
//! stack or scalar storage:
//!
//! - **Discovery** (`discovery`): eligible allocation sites, including
//!   speculative identity-cache dememoization
//! - **Propagation** (`propagation` + `sniff`): forward classification of
//!   every alias use, with bounded interprocedural peeking
//! - **Filtering** (`filtering`): inlining obligations, size budgets,
//!   suppression, special cases
//! - **Fixup** (`fixup` + `heapify`): the IR rewrite, plus compensating
//!   heap copies on cold paths
//! - The flush/monitor elimination of [`crate::opt::flush`] runs last over
//!   the same candidate set.
//!
//! # Passes
//!
//! The analysis repeats (bounded by `max_passes`) when a pass queued call
//! sites for inlining: the materialized callee bodies let the next pass
//! prove what the sniffer could only suspect. Every budget exhaustion is a
//! deterministic conservative fallback, never an error; on any uncertainty
//! the allocation simply stays on the heap.

pub mod candidates;
pub mod dememo;
pub mod discovery;
pub mod filtering;
pub mod fixup;
pub mod heapify;
pub mod propagation;
pub mod sniff;

use garnet_core::GarnetResult;

use crate::analysis::use_defs::UseDefs;
use crate::analysis::value_numbering::ValueNumbering;
use crate::ir::method::MethodIr;
use crate::meta::{Inliner, NullInliner};
use crate::opt::flush::{FlushMonitorElimination, FlushSeed};
use crate::opt::{OptContext, OptimizationPass};

// Re-exports
pub use candidates::{
    Candidate, CandidateId, CandidateKind, CandidateSet, ColdEscape, DememoState, Disposition,
    FieldInfo, InlineObligation,
};
pub use filtering::{FilterOutcome, FilterStats, InlineRequest};
pub use sniff::{SniffContext, SniffOutcome, SniffVerdict, Sniffer};

// =============================================================================
// Configuration
// =============================================================================

/// Budgets and thresholds for one escape analysis run.
#[derive(Debug, Clone)]
pub struct EscapeConfig {
    /// Maximum analysis passes (re-runs after inlining).
    pub max_passes: u32,
    /// Largest single contiguous promotion, in bytes.
    pub per_object_budget: u32,
    /// Total promoted bytes across all candidates.
    pub aggregate_budget: u32,
    /// Maximum interprocedural peek depth.
    pub max_sniff_depth: u32,
    /// Largest callee (bytecode bytes) the sniffer will peek.
    pub max_peek_bytecode_size: u32,
    /// Cumulative callee bytes peekable per pass.
    pub total_peek_budget: u32,
    /// Cumulative callee bytes the filter may queue for inlining.
    pub max_inlined_bytes: u32,
    /// A block is cold when its frequency falls below the method maximum
    /// divided by this ratio.
    pub cold_ratio: u32,
    /// Array header bytes on the target.
    pub array_header_size: u32,
    /// Reject wide-element arrays when the target cannot align their
    /// slots on the stack.
    pub require_aligned_wide_elements: bool,
}

impl Default for EscapeConfig {
    fn default() -> Self {
        Self {
            max_passes: 3,
            per_object_budget: 256,
            aggregate_budget: 1024,
            max_sniff_depth: 4,
            max_peek_bytecode_size: 400,
            total_peek_budget: 4000,
            max_inlined_bytes: 2000,
            cold_ratio: 100,
            array_header_size: 16,
            require_aligned_wide_elements: false,
        }
    }
}

impl EscapeConfig {
    /// A configuration with widened budgets.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_passes: 4,
            per_object_budget: 1024,
            aggregate_budget: 8192,
            max_sniff_depth: 8,
            max_peek_bytecode_size: 1600,
            total_peek_budget: 16_000,
            max_inlined_bytes: 8000,
            ..Default::default()
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters accumulated across all passes of one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapeStats {
    /// Analysis passes executed.
    pub passes_run: u32,
    /// Candidates discovered in the final pass.
    pub candidates_found: u32,
    /// Candidates promoted to a stack aggregate.
    pub promoted_contiguous: u32,
    /// Candidates promoted to scalar temporaries.
    pub promoted_non_contiguous: u32,
    /// Candidates left on the heap.
    pub rejected: u32,
    /// Candidates deferred to a later pass pending inlining.
    pub deferred: u32,
    /// Identity-cache rewrites reversed.
    pub rememoized: u32,
    /// Inline requests handed to the inlining engine.
    pub inline_requests: u32,
    /// Cold blocks that received heapification compensation.
    pub heapified_sites: u32,
    /// Monitors marked local-object and removed.
    pub monitors_removed: u32,
    /// Identity tests folded to constants.
    pub tests_folded: u32,
    /// Publication barriers removed or merged away.
    pub fences_eliminated: u32,
}

// =============================================================================
// The pass
// =============================================================================

/// The escape-analysis optimization pass.
pub struct EscapeAnalysis {
    config: EscapeConfig,
    inliner: Box<dyn Inliner>,
    stats: EscapeStats,
}

impl EscapeAnalysis {
    /// Create the pass with default budgets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EscapeConfig::default())
    }

    /// Create the pass with explicit budgets.
    #[must_use]
    pub fn with_config(config: EscapeConfig) -> Self {
        Self {
            config,
            inliner: Box::new(NullInliner),
            stats: EscapeStats::default(),
        }
    }

    /// Use a specific inlining engine for queued call sites.
    #[must_use]
    pub fn with_inliner(mut self, inliner: Box<dyn Inliner>) -> Self {
        self.inliner = inliner;
        self
    }

    /// Counters from the last run.
    #[must_use]
    pub fn stats(&self) -> &EscapeStats {
        &self.stats
    }

    fn run_analysis(&mut self, ir: &mut MethodIr, ctx: &OptContext<'_>) -> GarnetResult<bool> {
        self.stats = EscapeStats::default();
        if ir.stmts.is_empty() {
            // Nothing to analyze; treat like missing prerequisites.
            return Ok(false);
        }

        let mut changed = false;
        let mut pass = 0u32;

        loop {
            ctx.interrupt.check()?;
            pass += 1;
            self.stats.passes_run = pass;
            let last_pass = pass >= self.config.max_passes;

            tracing::debug!(method = %ir.name, pass, last_pass, "escape analysis pass");

            let mut cands = discovery::discover(ir, ctx, &self.config);
            self.stats.candidates_found = cands.len() as u32;
            if cands.is_empty() {
                break;
            }

            // The oracles this pass runs on.
            let vn = ValueNumbering::compute(ir);
            let ud = UseDefs::compute(ir);

            let mut sniffer = Sniffer::new(ctx, &self.config, ir.method);
            propagation::propagate(ir, ctx, &self.config, &vn, &mut cands, &mut sniffer)?;

            let outcome = filtering::filter(ir, ctx, &self.config, &mut cands, last_pass);
            self.stats.deferred += outcome.stats.deferred;
            self.stats.rememoized += outcome.stats.rememoized;

            if !outcome.inline_requests.is_empty() && !last_pass {
                // Hand the worklist to the inlining engine; a successful
                // materialization makes another pass worthwhile.
                self.stats.inline_requests += outcome.inline_requests.len() as u32;
                let mut any = false;
                for request in &outcome.inline_requests {
                    if self.inliner.inline(ir, ctx.provider, request.stmt)? {
                        any = true;
                        changed = true;
                    }
                }
                if any {
                    continue;
                }
            }

            // Final shape of this pass's candidate set.
            for cand in cands.iter() {
                match cand.disposition() {
                    Disposition::Rejected => self.stats.rejected += 1,
                    Disposition::LocalContiguous => self.stats.promoted_contiguous += 1,
                    Disposition::LocalNonContiguous => self.stats.promoted_non_contiguous += 1,
                }
            }

            let fix = fixup::fixup(ir, ctx, &vn, &mut cands);
            let heap = heapify::heapify(ir, &vn, &ud, &mut cands);
            self.stats.heapified_sites += heap.sites;
            self.stats.tests_folded += fix.tests_folded;
            changed |= fix.rewritten > 0 || fix.tests_folded > 0 || heap.sites > 0;

            // Flush/monitor elimination: independent final sub-pass over
            // the same candidate set.
            let seed = FlushSeed::from_candidates(ir, &cands, fix.local_monitors);
            let mut flush = FlushMonitorElimination::new();
            changed |= flush.run(ir, ctx, &seed)?;
            let fstats = flush.stats();
            self.stats.monitors_removed += fstats.monitors_removed;
            self.stats.fences_eliminated += fstats.local_fences_removed
                + fstats.global_fences_removed
                + fstats.fences_moved;

            break;
        }

        if ctx.options.trace_escape {
            tracing::info!(method = %ir.name, stats = ?self.stats, "escape analysis trace");
        } else {
            tracing::debug!(
                method = %ir.name,
                passes = self.stats.passes_run,
                contiguous = self.stats.promoted_contiguous,
                non_contiguous = self.stats.promoted_non_contiguous,
                rejected = self.stats.rejected,
                "escape analysis finished"
            );
        }
        Ok(changed)
    }
}

impl Default for EscapeAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for EscapeAnalysis {
    fn name(&self) -> &'static str {
        "escape"
    }

    fn run(&mut self, ir: &mut MethodIr, ctx: &OptContext<'_>) -> GarnetResult<bool> {
        self.run_analysis(ir, ctx)
    }
}
