//! Candidate discovery.
//!
//! Walks every statement once, applies the VM-level shape and eligibility
//! checks to each allocation node, performs identity-cache dememoization on
//! recognized factory calls, and emits one candidate per surviving site.

use bitvec::prelude::*;

use crate::analysis::dominators::{blocks_in_loops, Dominators};
use crate::ir::cfg::BlockId;
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::OpCode;
use crate::ir::stmt::StmtId;
use crate::ir::types::ValueType;
use crate::opt::OptContext;

use super::candidates::{Candidate, CandidateKind, CandidateSet};
use super::dememo;
use super::EscapeConfig;

/// Whether a block counts as cold for escape compensation.
#[must_use]
pub fn is_cold_block(ir: &MethodIr, config: &EscapeConfig, block: BlockId) -> bool {
    let b = ir.cfg.block(block);
    if b.is_catch() {
        return true;
    }
    let max = ir.cfg.max_frequency();
    max > 0 && b.frequency < max / config.cold_ratio.max(1)
}

/// Discover all candidates in a method body.
///
/// Mutates the IR only through dememoization (call → allocation +
/// constructor); everything else is additive bookkeeping.
pub fn discover(ir: &mut MethodIr, ctx: &OptContext<'_>, config: &EscapeConfig) -> CandidateSet {
    let doms = Dominators::compute(&ir.cfg);
    let in_loop = blocks_in_loops(&ir.cfg, &doms);

    let mut set = CandidateSet::new();
    let stmt_ids = ir.stmt_ids_in_block_order();
    for sid in stmt_ids {
        let root = ir.stmt(sid).root;
        for node_id in ir.arena.postorder(root) {
            let op = ir.arena.node(node_id).op;
            if op.is_call() {
                discover_cache_call(ir, ctx, config, &mut set, sid, node_id, &in_loop);
            } else if op.is_allocation() {
                discover_allocation(ir, ctx, config, &mut set, sid, node_id, &in_loop, None);
            }
        }
    }

    tracing::debug!(
        method = %ir.name,
        candidates = set.len(),
        "escape candidate discovery finished"
    );
    set
}

/// Dememoize a recognized identity-cache factory call and register the
/// resulting allocation as a candidate.
#[allow(clippy::too_many_arguments)]
fn discover_cache_call(
    ir: &mut MethodIr,
    ctx: &OptContext<'_>,
    config: &EscapeConfig,
    set: &mut CandidateSet,
    stmt: StmtId,
    node: NodeId,
    in_loop: &BitVec,
) {
    let Some(state) = dememo::try_dememoize(ir, ctx.meta, stmt, node) else {
        return;
    };
    let created =
        discover_allocation(ir, ctx, config, set, stmt, node, in_loop, Some(state.clone()));
    if !created {
        // Eligibility rejected the boxed class after all; undo.
        dememo::rememoize(ir, &state);
    }
}

/// Apply eligibility checks to one allocation node; returns whether a
/// candidate was created.
#[allow(clippy::too_many_arguments)]
fn discover_allocation(
    ir: &mut MethodIr,
    ctx: &OptContext<'_>,
    config: &EscapeConfig,
    set: &mut CandidateSet,
    stmt: StmtId,
    node: NodeId,
    in_loop: &BitVec,
    dememo_state: Option<super::candidates::DememoState>,
) -> bool {
    if set.find_by_node(node).is_some() {
        // Commoned allocation node already seen under another statement.
        return false;
    }

    let op = ir.arena.node(node).op;
    let block = ir.stmt(stmt).block;

    let mut candidate = match op {
        OpCode::NewObject(class) | OpCode::NewValue(class) => {
            let Some(shape) = ctx.meta.class_shape(class) else {
                // Unresolved class.
                return false;
            };
            if shape.is_runnable || shape.is_weak_reference {
                return false;
            }
            if shape.promotable_size <= 0 {
                // Objects have no size-profiling fallback.
                return false;
            }
            let kind = if matches!(op, OpCode::NewValue(_)) {
                CandidateKind::ValueObject
            } else {
                CandidateKind::Object
            };
            let mut c = Candidate::new(
                set.next_id(),
                node,
                stmt,
                block,
                kind,
                shape.size,
                shape.header_size,
            );
            c.class = Some(class);
            c.force_local = shape.force_local;
            c
        }
        OpCode::NewArray(elem) => {
            if config.require_aligned_wide_elements && elem.byte_size() == 8 {
                // The target cannot align wide element slots on the stack.
                return false;
            }
            match constant_length(ir, node) {
                Some(0) => return false,
                Some(n) => {
                    let size = config.array_header_size + n * elem.byte_size();
                    let mut c = Candidate::new(
                        set.next_id(),
                        node,
                        stmt,
                        block,
                        CandidateKind::PrimArray,
                        size,
                        config.array_header_size,
                    );
                    c.elem = Some(elem);
                    c.array_length = Some(n);
                    c
                }
                None => {
                    // Unknown length: keep for size profiling only.
                    let mut c = Candidate::new(
                        set.next_id(),
                        node,
                        stmt,
                        block,
                        CandidateKind::PrimArray,
                        0,
                        config.array_header_size,
                    );
                    c.elem = Some(elem);
                    c.profile_only = true;
                    c
                }
            }
        }
        OpCode::NewRefArray(class) => {
            if ctx.meta.class_shape(class).is_none() {
                return false;
            }
            match constant_length(ir, node) {
                Some(0) => return false,
                Some(n) => {
                    let size = config.array_header_size + n * ValueType::Address.byte_size();
                    let mut c = Candidate::new(
                        set.next_id(),
                        node,
                        stmt,
                        block,
                        CandidateKind::RefArray,
                        size,
                        config.array_header_size,
                    );
                    c.class = Some(class);
                    c.array_length = Some(n);
                    c
                }
                None => {
                    let mut c = Candidate::new(
                        set.next_id(),
                        node,
                        stmt,
                        block,
                        CandidateKind::RefArray,
                        0,
                        config.array_header_size,
                    );
                    c.class = Some(class);
                    c.profile_only = true;
                    c
                }
            }
        }
        _ => return false,
    };

    candidate.inside_a_loop = in_loop[block.index()];
    candidate.in_cold_block = is_cold_block(ir, config, block);
    candidate.dememo = dememo_state;
    candidate.explicitly_initialized = detect_explicit_init(ir, ctx, &candidate);

    if candidate.profile_only {
        tracing::trace!(node = %node, "allocation kept for size profiling only");
    }

    set.push(candidate);
    true
}

/// Constant array length, if the length operand is a literal.
fn constant_length(ir: &MethodIr, alloc: NodeId) -> Option<u32> {
    let len = ir.arena.node(alloc).operand(0)?;
    match ir.arena.node(len).op {
        OpCode::ConstInt(v) if (0..=i64::from(u32::MAX)).contains(&v) => Some(v as u32),
        _ => None,
    }
}

/// Detect explicit initialization of every reference slot before any other
/// use: the allocation is stored to a local and each reference-carrying
/// offset receives a constant store in the same block, before the first
/// call or block exit.
fn detect_explicit_init(ir: &MethodIr, ctx: &OptContext<'_>, candidate: &Candidate) -> bool {
    let Some(class) = candidate.class else {
        return false;
    };
    let Some(shape) = ctx.meta.class_shape(class) else {
        return false;
    };
    let mut wanted: Vec<u32> = shape.reference_slots().collect();
    if wanted.is_empty() {
        return true;
    }

    let block = ir.cfg.block(candidate.block);
    let after_alloc = block
        .stmts
        .iter()
        .skip_while(|&&s| s != candidate.stmt)
        .skip(1);

    // The local the allocation lands in, once seen.
    let mut holder = None;
    for &sid in after_alloc {
        let root = ir.stmt(sid).root;
        let node = ir.arena.node(root);
        match node.op {
            OpCode::StoreLocal(sym) if node.operand(0) == Some(candidate.node) => {
                holder = Some(sym);
            }
            OpCode::StoreField(fr) => {
                let base = node.operand(0);
                let base_is_candidate = base == Some(candidate.node)
                    || base.is_some_and(|b| {
                        matches!(ir.arena.node(b).op, OpCode::LoadLocal(s) if Some(s) == holder)
                    });
                let value_is_constant = node.operand(1).is_some_and(|v| {
                    matches!(
                        ir.arena.node(v).op,
                        OpCode::ConstInt(_) | OpCode::ConstNull
                    )
                });
                if base_is_candidate && value_is_constant {
                    wanted.retain(|&o| o != fr.offset);
                    if wanted.is_empty() {
                        return true;
                    }
                }
            }
            OpCode::Call(_) => return false,
            _ if node.op.is_terminator() => return false,
            _ => {}
        }
    }
    wanted.is_empty()
}
