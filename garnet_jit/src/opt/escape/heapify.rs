//! Heapification: compensating heap copies on cold paths.
//!
//! A promoted candidate with cold-block escape records gets, per cold
//! block: a guard temporary ("the heap copy, if any exists yet", null at
//! method entry), a comparison skipping re-allocation when a copy already
//! exists, a real heap allocation mirroring the promoted shape with every
//! tracked slot copied out of the stack backing, and a redirection of the
//! escaping reference (plus every aliasing local) at the heap copy.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::analysis::use_defs::UseDefs;
use crate::analysis::value_numbering::ValueNumbering;
use crate::ir::cfg::BlockId;
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::{FieldRef, OpCode};
use crate::ir::symbols::SymbolId;
use crate::ir::types::{ClassId, ValueType};

use super::candidates::{Candidate, CandidateKind, CandidateSet, Disposition};

/// Counters from heapification.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapifyResult {
    /// Cold blocks that received a compensation sequence.
    pub sites: u32,
    /// Field copies emitted into heap copies.
    pub fields_copied: u32,
}

/// Materialize compensation code for every promoted candidate that
/// escapes in cold blocks.
pub fn heapify(
    ir: &mut MethodIr,
    vn: &ValueNumbering,
    ud: &UseDefs,
    cands: &mut CandidateSet,
) -> HeapifyResult {
    let mut result = HeapifyResult::default();

    for cid in cands.ids().collect::<Vec<_>>() {
        {
            let cand = cands.get(cid);
            if cand.disposition() == Disposition::Rejected || cand.cold_escapes.is_empty() {
                continue;
            }
        }
        heapify_candidate(ir, vn, ud, cands.get_mut(cid), &mut result);
    }

    result
}

fn heapify_candidate(
    ir: &mut MethodIr,
    vn: &ValueNumbering,
    ud: &UseDefs,
    cand: &mut Candidate,
    result: &mut HeapifyResult,
) {
    // One guard temporary per candidate, null until the first escape.
    let guard = ir.symbols.new_temp(ValueType::Address);
    let null = ir
        .arena
        .add(OpCode::ConstNull, SmallVec::new(), ValueType::Address);
    let init = ir.arena.add(
        OpCode::StoreLocal(guard),
        SmallVec::from_slice(&[null]),
        ValueType::Void,
    );
    ir.prepend_entry(init);

    // Locals aliasing the candidate, for conservative redirection.
    let aliased_locals = aliasing_locals(ir, vn, ud, cand);

    let cold_blocks: Vec<BlockId> = {
        let mut seen = Vec::new();
        for escape in &cand.cold_escapes {
            if !seen.contains(&escape.block) {
                seen.push(escape.block);
            }
        }
        seen
    };

    for block in cold_blocks {
        let first_escape = cand
            .cold_escapes
            .iter()
            .filter(|e| e.block == block)
            .map(|e| e.stmt)
            .min_by_key(|&sid| {
                ir.cfg
                    .block(block)
                    .stmts
                    .iter()
                    .position(|&s| s == sid)
                    .unwrap_or(usize::MAX)
            });
        let Some(anchor) = first_escape else { continue };
        if !ir.is_attached(anchor) {
            continue;
        }

        // Split so the escape (and everything after) sits in its own
        // block, then place the copy sequence on a guarded detour.
        let escape_block = ir.split_block_before(anchor);
        let copy_block = build_copy_block(ir, cand, guard, &aliased_locals, result);

        // After the split the original cold block is the sole predecessor
        // of `escape_block`; it now tests the guard, and a non-null copy
        // skips the allocation.
        let cold_pre = ir.cfg.block(escape_block).preds[0];
        let loaded = ir
            .arena
            .add(OpCode::LoadLocal(guard), SmallVec::new(), ValueType::Address);
        let nil = ir
            .arena
            .add(OpCode::ConstNull, SmallVec::new(), ValueType::Address);
        let have_copy = ir.arena.add(
            OpCode::CmpNe,
            SmallVec::from_slice(&[loaded, nil]),
            ValueType::Int32,
        );
        let branch = ir.arena.add(
            OpCode::Branch(escape_block),
            SmallVec::from_slice(&[have_copy]),
            ValueType::Void,
        );
        ir.append_stmt(cold_pre, branch, 0);
        ir.cfg.add_edge(cold_pre, copy_block);
        ir.cfg.add_edge(copy_block, escape_block);
        let rejoin = ir.arena.add(
            OpCode::Goto(escape_block),
            SmallVec::new(),
            ValueType::Void,
        );
        ir.append_stmt(copy_block, rejoin, 0);

        // Redirect the escaping statement's candidate references at the
        // heap copy.
        redirect_refs(ir, vn, cand, anchor, guard);
        result.sites += 1;

        tracing::debug!(
            candidate = %cand.id,
            block = %block,
            copy_block = %copy_block,
            "heapification compensation emitted"
        );
    }
}

/// Build the block that allocates the heap copy, fills it from the
/// promoted backing, stores it to the guard and redirects aliasing locals.
fn build_copy_block(
    ir: &mut MethodIr,
    cand: &Candidate,
    guard: SymbolId,
    aliased_locals: &[SymbolId],
    result: &mut HeapifyResult,
) -> BlockId {
    let copy_block = ir.cfg.add_block(crate::ir::cfg::BlockKind::Normal, 1);

    // A real allocation mirroring the promoted shape.
    let heap = match cand.kind {
        CandidateKind::Object | CandidateKind::ValueObject => ir.arena.add(
            OpCode::NewObject(cand.class.unwrap_or(ClassId(0))),
            SmallVec::new(),
            ValueType::Address,
        ),
        CandidateKind::PrimArray => {
            let len = ir.arena.add(
                OpCode::ConstInt(i64::from(cand.array_length.unwrap_or(0))),
                SmallVec::new(),
                ValueType::Int64,
            );
            ir.arena.add(
                OpCode::NewArray(cand.elem.unwrap_or(ValueType::Int64)),
                SmallVec::from_slice(&[len]),
                ValueType::Address,
            )
        }
        CandidateKind::RefArray => {
            let len = ir.arena.add(
                OpCode::ConstInt(i64::from(cand.array_length.unwrap_or(0))),
                SmallVec::new(),
                ValueType::Int64,
            );
            ir.arena.add(
                OpCode::NewRefArray(cand.class.unwrap_or(ClassId(0))),
                SmallVec::from_slice(&[len]),
                ValueType::Address,
            )
        }
    };
    let store_guard = ir.arena.add(
        OpCode::StoreLocal(guard),
        SmallVec::from_slice(&[heap]),
        ValueType::Void,
    );
    ir.append_stmt(copy_block, store_guard, 0);

    // Copy every tracked slot from the promoted backing.
    for fi in &cand.fields {
        if !fi.has_good_refs() {
            continue;
        }
        let current: NodeId = match (cand.backing, fi.backing) {
            (Some(agg), _) => {
                // Contiguous: read the aggregate's slot.
                let base = ir
                    .arena
                    .add(OpCode::LoadLocal(agg), SmallVec::new(), ValueType::Address);
                let fr = FieldRef {
                    declaring: cand.class.unwrap_or(ClassId(0)),
                    offset: fi.offset,
                    ty: fi.ty,
                    resolved: true,
                };
                ir.arena
                    .add(OpCode::LoadField(fr), SmallVec::from_slice(&[base]), fi.ty)
            }
            (None, Some(temp)) => {
                let ty = ir.symbols.symbol(temp).ty;
                ir.arena.add(OpCode::LoadLocal(temp), SmallVec::new(), ty)
            }
            (None, None) => continue,
        };

        let dst = ir
            .arena
            .add(OpCode::LoadLocal(guard), SmallVec::new(), ValueType::Address);
        let fr = FieldRef {
            declaring: cand.class.unwrap_or(ClassId(0)),
            offset: fi.offset,
            ty: fi.ty,
            resolved: true,
        };
        let copy = ir.arena.add(
            OpCode::StoreField(fr),
            SmallVec::from_slice(&[dst, current]),
            ValueType::Void,
        );
        ir.append_stmt(copy_block, copy, 0);
        result.fields_copied += 1;
    }

    // Conservative alias redirection: every local known to hold the
    // candidate now holds the heap copy.
    for &sym in aliased_locals {
        let heap_ref = ir
            .arena
            .add(OpCode::LoadLocal(guard), SmallVec::new(), ValueType::Address);
        let redirect = ir.arena.add(
            OpCode::StoreLocal(sym),
            SmallVec::from_slice(&[heap_ref]),
            ValueType::Void,
        );
        ir.append_stmt(copy_block, redirect, 0);
    }

    copy_block
}

/// Locals whose stored value aliases the candidate.
fn aliasing_locals(
    ir: &MethodIr,
    vn: &ValueNumbering,
    ud: &UseDefs,
    cand: &Candidate,
) -> Vec<SymbolId> {
    let mut out: Vec<SymbolId> = Vec::new();
    let mut seen: FxHashSet<SymbolId> = FxHashSet::default();
    for sid in ir.stmt_ids_in_block_order() {
        let root = ir.stmt(sid).root;
        if !ud.is_def(root) {
            continue;
        }
        let node = ir.arena.node(root);
        let OpCode::StoreLocal(sym) = node.op else {
            continue;
        };
        let stored_aliases = node
            .operand(0)
            .and_then(|v| vn.value_number(v))
            .is_some_and(|v| cand.is_alias(v));
        if stored_aliases && seen.insert(sym) {
            out.push(sym);
        }
    }
    out
}

/// Rewrite candidate references inside the escaping statement to read the
/// guard temporary instead.
fn redirect_refs(
    ir: &mut MethodIr,
    vn: &ValueNumbering,
    cand: &Candidate,
    stmt: crate::ir::stmt::StmtId,
    guard: SymbolId,
) {
    let root = ir.stmt(stmt).root;
    for id in ir.arena.postorder(root) {
        let node = ir.arena.node(id).clone();
        for (ix, &operand) in node.operands.iter().enumerate() {
            let aliases = vn
                .value_number(operand)
                .is_some_and(|v| cand.is_alias(v));
            if aliases {
                let heap_ref =
                    ir.arena
                        .add(OpCode::LoadLocal(guard), SmallVec::new(), ValueType::Address);
                let mut operands = ir.arena.node(id).operands.clone();
                operands[ix] = heap_ref;
                let ty = ir.arena.node(id).ty;
                let op = ir.arena.node(id).op;
                ir.arena.recreate(id, op, operands, ty);
            }
        }
    }
}
