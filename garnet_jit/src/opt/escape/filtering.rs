//! Candidate refinement and filtering.
//!
//! Runs once propagation settles for the current pass: resolves
//! dememoization, converts interprocedural obligations into an inlining
//! worklist, applies the suppression filter, the immutable-class special
//! case, and the per-object/aggregate size budgets.

use garnet_core::CompilerOptions;

use crate::ir::method::MethodIr;
use crate::ir::stmt::StmtId;
use crate::opt::OptContext;

use super::candidates::{CandidateId, CandidateSet};
use super::dememo;
use super::EscapeConfig;

// =============================================================================
// Inline worklist
// =============================================================================

/// One entry of the worklist handed to the inlining engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineRequest {
    /// The call statement to materialize.
    pub stmt: StmtId,
    /// Accumulated callee byte-size cost.
    pub cost: u32,
    /// The call's lock guards a method-local value; the inliner may elide
    /// it inside the materialized body.
    pub desynchronize: bool,
}

/// Counters produced by one filtering run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Candidates deferred to the next pass pending inlining.
    pub deferred: u32,
    /// Speculative cache rewrites reversed.
    pub rememoized: u32,
    /// Candidates dropped by the suppression filter.
    pub suppressed: u32,
    /// Candidates demoted by size budgets.
    pub size_demoted: u32,
    /// Candidates dropped by the referenced-object compensation rule.
    pub referenced_dropped: u32,
}

/// Outcome of filtering: the inlining worklist plus counters.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Call sites the external inliner should materialize.
    pub inline_requests: Vec<InlineRequest>,
    /// Counters.
    pub stats: FilterStats,
}

// =============================================================================
// Filtering
// =============================================================================

/// Refine all candidates after propagation; `last_pass` disables deferral.
pub fn filter(
    ir: &mut MethodIr,
    ctx: &OptContext<'_>,
    config: &EscapeConfig,
    cands: &mut CandidateSet,
    last_pass: bool,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    apply_suppression(ir, ctx.options, cands, &mut outcome);
    resolve_dememoization(ir, cands, last_pass, &mut outcome);
    collect_inline_obligations(ir, cands, config, last_pass, &mut outcome);
    apply_referenced_rule(ctx, cands, &mut outcome);
    apply_monitor_rule(cands);
    apply_size_budgets(config, cands, &mut outcome);

    outcome
}

/// A monitor on a candidate that still escapes on a cold path can be
/// neither elided nor redirected; keep the heap object.
fn apply_monitor_rule(cands: &mut CandidateSet) {
    for cand in cands.iter_mut() {
        if cand.is_local && !cand.lock_stmts.is_empty() && cand.escapes_in_cold_blocks {
            cand.reject();
        }
    }
}

/// Force-suppress candidates whose source position matches the filter.
fn apply_suppression(
    ir: &MethodIr,
    options: &CompilerOptions,
    cands: &mut CandidateSet,
    outcome: &mut FilterOutcome,
) {
    let name = ir.name.clone();
    for cand in cands.iter_mut() {
        if !cand.is_local {
            continue;
        }
        let bci = ir.stmts[cand.stmt.index()].bci;
        if options.is_suppressed(&name, bci) {
            cand.reject();
            outcome.stats.suppressed += 1;
            tracing::debug!(candidate = %cand.id, bci, "candidate suppressed by filter");
        }
    }
}

/// Finalize or reverse speculative identity-cache rewrites.
///
/// A rewrite is kept only when the fresh allocation is observably
/// equivalent to the cached instance: the candidate survived propagation,
/// its identity is never observed, and nothing beyond the synthesized
/// constructor needs materializing. The constructor is then queued for
/// inlining and the candidate re-proven next pass as a plain allocation;
/// everything else is reversed now, while reversing is still possible.
fn resolve_dememoization(
    ir: &mut MethodIr,
    cands: &mut CandidateSet,
    last_pass: bool,
    outcome: &mut FilterOutcome,
) {
    for cand in cands.iter_mut() {
        let Some(state) = cand.dememo.clone() else {
            continue;
        };
        let only_ctor = cand
            .calls_to_inline
            .iter()
            .all(|o| o.stmt == state.ctor_stmt);
        let compatible =
            cand.is_local && !cand.object_referenced && only_ctor && !last_pass;
        if compatible {
            cand.calls_to_inline.clear();
            outcome.inline_requests.push(InlineRequest {
                stmt: state.ctor_stmt,
                cost: 0,
                desynchronize: false,
            });
            cand.deferred = true;
            cand.reject();
            outcome.stats.deferred += 1;
            tracing::debug!(candidate = %cand.id, "dememoization finalized, constructor queued");
        } else {
            dememo::rememoize(ir, &state);
            cand.dememo = None;
            cand.reject();
            outcome.stats.rememoized += 1;
        }
    }
}

/// Queue surviving candidates' call obligations, within the inlined-bytes
/// budget; candidates with queued obligations are deferred for this pass.
fn collect_inline_obligations(
    ir: &mut MethodIr,
    cands: &mut CandidateSet,
    config: &EscapeConfig,
    last_pass: bool,
    outcome: &mut FilterOutcome,
) {
    let mut spent: u32 = 0;
    for cand in cands.iter_mut() {
        if !cand.is_local || cand.calls_to_inline.is_empty() {
            continue;
        }
        let cost: u32 = cand.calls_to_inline.iter().map(|o| o.cost).sum();
        if last_pass {
            // No pass budget left to re-prove the candidate after inlining.
            cand.reject();
            continue;
        }
        if spent + cost > config.max_inlined_bytes {
            // No byte budget left to materialize the calls; the candidate
            // cannot be proven this compilation.
            cand.reject();
            continue;
        }
        spent += cost;
        let sync: Vec<StmtId> = cand.sync_call_stmts.clone();
        for obligation in &cand.calls_to_inline {
            let desynchronize = sync.contains(&obligation.stmt);
            if desynchronize {
                mark_call_desynchronized(ir, obligation.stmt);
            }
            outcome.inline_requests.push(InlineRequest {
                stmt: obligation.stmt,
                cost: obligation.cost,
                desynchronize,
            });
        }
        cand.deferred = true;
        cand.reject();
        outcome.stats.deferred += 1;
        tracing::debug!(
            candidate = %cand.id,
            calls = cand.calls_to_inline.len(),
            cost,
            "candidate deferred pending inlining"
        );
    }
}

/// Flag a synchronized call whose lock guards a method-local value: the
/// inliner may prove and remove the lock inside the materialized body.
fn mark_call_desynchronized(ir: &mut MethodIr, stmt: StmtId) {
    let root = ir.stmt(stmt).root;
    for id in ir.arena.postorder(root) {
        let node = ir.arena.node(id).clone();
        if let crate::ir::opcodes::OpCode::Call(mut target) = node.op {
            if target.synchronized && !target.desynchronized {
                target.desynchronized = true;
                ir.arena.recreate(
                    id,
                    crate::ir::opcodes::OpCode::Call(target),
                    node.operands,
                    node.ty,
                );
            }
            return;
        }
    }
}

/// Referenced objects that escape in cold blocks are only worth
/// compensating when the class is designated immutable.
fn apply_referenced_rule(
    ctx: &OptContext<'_>,
    cands: &mut CandidateSet,
    outcome: &mut FilterOutcome,
) {
    for cand in cands.iter_mut() {
        if !cand.is_local || !cand.object_referenced || !cand.escapes_in_cold_blocks {
            continue;
        }
        let immutable = cand
            .class
            .and_then(|c| ctx.meta.class_shape(c))
            .is_some_and(|s| s.is_immutable);
        if !immutable {
            cand.reject();
            outcome.stats.referenced_dropped += 1;
        }
    }
}

/// Enforce per-object and aggregate size budgets; demote the largest
/// offenders until within budget.
fn apply_size_budgets(
    config: &EscapeConfig,
    cands: &mut CandidateSet,
    outcome: &mut FilterOutcome,
) {
    for cand in cands.iter_mut() {
        if cand.is_local && cand.must_be_contiguous() && cand.size > config.per_object_budget {
            cand.reject();
            outcome.stats.size_demoted += 1;
        }
    }

    loop {
        let total: u32 = cands
            .iter()
            .filter(|c| c.is_local && !c.profile_only)
            .map(|c| c.budget_bytes())
            .sum();
        if total <= config.aggregate_budget {
            break;
        }
        let worst: Option<CandidateId> = cands
            .iter()
            .filter(|c| c.is_local && !c.profile_only)
            .max_by_key(|c| c.budget_bytes())
            .map(|c| c.id);
        match worst {
            Some(id) => {
                cands.get_mut(id).reject();
                outcome.stats.size_demoted += 1;
                tracing::debug!(candidate = %id, "demoted to satisfy aggregate size budget");
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::candidates::{Candidate, CandidateKind};
    use super::super::EscapeConfig;
    use super::*;
    use crate::ir::cfg::BlockId;
    use crate::ir::node::NodeId;
    use crate::ir::types::{ClassId, MethodId, ValueType};
    use crate::meta::{ClassShape, MapIrProvider, VmRegistry};
    use garnet_core::{CompilerOptions, InterruptFlag, SourceFilter};

    struct Fixture {
        meta: VmRegistry,
        provider: MapIrProvider,
        options: CompilerOptions,
        interrupt: InterruptFlag,
    }

    impl Fixture {
        fn new() -> Self {
            let mut meta = VmRegistry::new();
            meta.register_class(ClassId(1), ClassShape::object("Point", 24));
            meta.register_class(ClassId(2), ClassShape::object("Str", 24).immutable());
            Self {
                meta,
                provider: MapIrProvider::new(),
                options: CompilerOptions::default(),
                interrupt: InterruptFlag::new(),
            }
        }

        fn ctx(&self) -> OptContext<'_> {
            OptContext {
                meta: &self.meta,
                provider: &self.provider,
                options: &self.options,
                interrupt: &self.interrupt,
            }
        }
    }

    fn ir_with_stmt() -> MethodIr {
        let mut b = crate::ir::builder::IrBuilder::new(MethodId(0), "T.m", 0);
        b.set_bci(12);
        b.ret();
        b.finish()
    }

    fn candidate(set: &mut CandidateSet, size: u32) -> CandidateId {
        let id = set.next_id();
        let mut c = Candidate::new(
            id,
            NodeId(id.0),
            crate::ir::stmt::StmtId(0),
            BlockId(0),
            CandidateKind::Object,
            size,
            16,
        );
        c.class = Some(ClassId(1));
        set.push(c)
    }

    #[test]
    fn test_suppression_filter() {
        let mut f = Fixture::new();
        f.options.suppress = Some(SourceFilter::new("T.m@12"));
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();
        let id = candidate(&mut cands, 24);

        let outcome = filter(
            &mut ir,
            &f.ctx(),
            &EscapeConfig::default(),
            &mut cands,
            false,
        );
        assert_eq!(outcome.stats.suppressed, 1);
        assert!(!cands.get(id).is_local);
    }

    #[test]
    fn test_per_object_budget() {
        let f = Fixture::new();
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();
        let id = candidate(&mut cands, 4096);
        cands.get_mut(id).set_contiguous();

        let config = EscapeConfig {
            per_object_budget: 256,
            ..Default::default()
        };
        let outcome = filter(&mut ir, &f.ctx(), &config, &mut cands, false);
        assert_eq!(outcome.stats.size_demoted, 1);
        assert!(!cands.get(id).is_local);
    }

    #[test]
    fn test_aggregate_budget_demotes_largest_first() {
        let f = Fixture::new();
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();
        let small = candidate(&mut cands, 32);
        cands.get_mut(small).set_contiguous();
        let large = candidate(&mut cands, 200);
        cands.get_mut(large).set_contiguous();

        let config = EscapeConfig {
            per_object_budget: 256,
            aggregate_budget: 100,
            ..Default::default()
        };
        let outcome = filter(&mut ir, &f.ctx(), &config, &mut cands, false);
        assert_eq!(outcome.stats.size_demoted, 1);
        assert!(cands.get(small).is_local);
        assert!(!cands.get(large).is_local);
    }

    #[test]
    fn test_inline_obligations_defer_candidate() {
        let f = Fixture::new();
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();
        let id = candidate(&mut cands, 24);
        cands.get_mut(id).calls_to_inline.push(
            super::super::candidates::InlineObligation {
                stmt: crate::ir::stmt::StmtId(0),
                cost: 40,
            },
        );

        let outcome = filter(
            &mut ir,
            &f.ctx(),
            &EscapeConfig::default(),
            &mut cands,
            false,
        );
        assert_eq!(outcome.inline_requests.len(), 1);
        assert_eq!(outcome.inline_requests[0].cost, 40);
        assert_eq!(outcome.stats.deferred, 1);
        let c = cands.get(id);
        assert!(c.deferred);
        assert!(!c.is_local);
    }

    #[test]
    fn test_inline_obligations_blocked_on_last_pass() {
        let f = Fixture::new();
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();
        let id = candidate(&mut cands, 24);
        cands.get_mut(id).calls_to_inline.push(
            super::super::candidates::InlineObligation {
                stmt: crate::ir::stmt::StmtId(0),
                cost: 40,
            },
        );

        let outcome = filter(
            &mut ir,
            &f.ctx(),
            &EscapeConfig::default(),
            &mut cands,
            true,
        );
        assert!(outcome.inline_requests.is_empty());
        assert!(!cands.get(id).is_local);
        assert!(!cands.get(id).deferred);
    }

    #[test]
    fn test_inline_byte_budget() {
        let f = Fixture::new();
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();
        let id = candidate(&mut cands, 24);
        cands.get_mut(id).calls_to_inline.push(
            super::super::candidates::InlineObligation {
                stmt: crate::ir::stmt::StmtId(0),
                cost: 10_000,
            },
        );

        let config = EscapeConfig {
            max_inlined_bytes: 100,
            ..Default::default()
        };
        let outcome = filter(&mut ir, &f.ctx(), &config, &mut cands, false);
        assert!(outcome.inline_requests.is_empty());
        assert!(!cands.get(id).is_local);
    }

    #[test]
    fn test_synchronized_call_flagged_for_desynchronization() {
        use crate::ir::opcodes::{CallTarget, OpCode};

        let f = Fixture::new();
        let mut b = crate::ir::builder::IrBuilder::new(MethodId(0), "T.m", 1);
        let recv = b.param(0, ValueType::Address);
        let mut target = CallTarget::direct(MethodId(5));
        target.synchronized = true;
        let call = b.call(target, &[recv], ValueType::Void);
        let call_stmt = b.stmt(call);
        b.ret();
        let mut ir = b.finish();

        let mut cands = CandidateSet::new();
        let id = candidate(&mut cands, 24);
        {
            let c = cands.get_mut(id);
            c.calls_to_inline
                .push(super::super::candidates::InlineObligation {
                    stmt: call_stmt,
                    cost: 10,
                });
            c.sync_call_stmts.push(call_stmt);
        }

        let outcome = filter(
            &mut ir,
            &f.ctx(),
            &EscapeConfig::default(),
            &mut cands,
            false,
        );
        assert_eq!(outcome.inline_requests.len(), 1);
        assert!(outcome.inline_requests[0].desynchronize);

        match ir.arena.node(call).op {
            OpCode::Call(t) => assert!(t.desynchronized),
            _ => panic!("Expected call node"),
        }
    }

    #[test]
    fn test_referenced_cold_escape_requires_immutable() {
        let f = Fixture::new();
        let mut ir = ir_with_stmt();
        let mut cands = CandidateSet::new();

        let mutable = candidate(&mut cands, 24);
        {
            let c = cands.get_mut(mutable);
            c.object_referenced = true;
            c.escapes_in_cold_blocks = true;
        }

        let frozen = candidate(&mut cands, 24);
        {
            let c = cands.get_mut(frozen);
            c.class = Some(ClassId(2));
            c.object_referenced = true;
            c.escapes_in_cold_blocks = true;
        }

        let outcome = filter(
            &mut ir,
            &f.ctx(),
            &EscapeConfig::default(),
            &mut cands,
            false,
        );
        assert_eq!(outcome.stats.referenced_dropped, 1);
        assert!(!cands.get(mutable).is_local);
        assert!(cands.get(frozen).is_local);
    }
}
