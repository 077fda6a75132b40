//! Tree fixup: rewriting promoted candidates in place.
//!
//! Contiguous candidates become stack-resident aggregates; their validated
//! field accesses are redirected at the aggregate symbol. Non-contiguous
//! candidates dissolve into one scalar temporary per tracked slot, with
//! width conversions where a slot is narrower than its temporary. Identity
//! tests against dissolved candidates fold to opaque constants that a later
//! constant-propagation pass cleans up.

use smallvec::SmallVec;

use crate::analysis::value_numbering::ValueNumbering;
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::{FieldRef, OpCode};
use crate::ir::stmt::StmtId;
use crate::ir::types::{ClassId, ValueType};
use crate::meta::VmRegistry;
use crate::opt::OptContext;

use super::candidates::{Candidate, CandidateId, CandidateKind, CandidateSet, Disposition};

/// Counters and markings produced by fixup.
#[derive(Debug, Clone, Default)]
pub struct FixupResult {
    /// Monitor statements guarding promoted, never-cold-escaping
    /// candidates; a downstream redundant-monitor pass removes them.
    pub local_monitors: Vec<StmtId>,
    /// Candidates rewritten.
    pub rewritten: u32,
    /// Field/element loads redirected.
    pub loads_rewritten: u32,
    /// Field/element stores redirected.
    pub stores_rewritten: u32,
    /// Identity tests folded to constants.
    pub tests_folded: u32,
}

/// Rewrite every promoted candidate.
pub fn fixup(
    ir: &mut MethodIr,
    ctx: &OptContext<'_>,
    vn: &ValueNumbering,
    cands: &mut CandidateSet,
) -> FixupResult {
    let mut result = FixupResult::default();

    for cid in cands.ids().collect::<Vec<CandidateId>>() {
        let disposition = cands.get(cid).disposition();
        match disposition {
            Disposition::Rejected => {}
            Disposition::LocalContiguous => {
                rewrite_contiguous(ir, ctx.meta, cands.get_mut(cid), &mut result);
            }
            Disposition::LocalNonContiguous => {
                rewrite_non_contiguous(ir, ctx.meta, cands.get_mut(cid), &mut result);
            }
        }
    }

    fold_identity_tests(ir, vn, cands, &mut result);
    mark_local_monitors(cands, &mut result);

    result
}

// =============================================================================
// Contiguous rewriting
// =============================================================================

fn rewrite_contiguous(
    ir: &mut MethodIr,
    meta: &VmRegistry,
    cand: &mut Candidate,
    result: &mut FixupResult,
) {
    let class = cand.class.unwrap_or(ClassId(0));
    let agg = ir.symbols.new_aggregate(class, cand.size);
    cand.backing = Some(agg);

    // Redirect every trusted access at the aggregate.
    for fi in &cand.fields {
        for &access in &fi.good_refs {
            let node = ir.arena.node(access).clone();
            let base = ir
                .arena
                .add(OpCode::LoadLocal(agg), SmallVec::new(), ValueType::Address);
            let mut operands = node.operands.clone();
            if operands.is_empty() {
                continue;
            }
            operands[0] = base;
            ir.arena.recreate(access, node.op, operands, node.ty);
            if node.op.is_indirect_store() {
                result.stores_rewritten += 1;
            } else {
                result.loads_rewritten += 1;
            }
        }
    }

    // The allocation itself now names the aggregate.
    ir.arena.recreate(
        cand.node,
        OpCode::LoadLocal(agg),
        SmallVec::new(),
        ValueType::Address,
    );

    insert_contiguous_zero_init(ir, meta, cand, agg);
    result.rewritten += 1;
    tracing::debug!(candidate = %cand.id, sym = %agg, "promoted to stack aggregate");
}

/// Zero-initialize the aggregate: non-reference slots right after the
/// allocation, reference slots at method entry so whole-method liveness
/// sees them defined.
fn insert_contiguous_zero_init(
    ir: &mut MethodIr,
    meta: &VmRegistry,
    cand: &Candidate,
    agg: crate::ir::symbols::SymbolId,
) {
    let class = cand.class;
    let shape = class.and_then(|c| meta.class_shape(c));

    match (cand.kind, shape) {
        (CandidateKind::Object | CandidateKind::ValueObject, Some(shape)) => {
            let fields: Vec<(u32, ValueType)> =
                shape.fields.iter().map(|f| (f.offset, f.ty)).collect();
            for (offset, ty) in fields {
                let fr = FieldRef {
                    declaring: class.unwrap_or(ClassId(0)),
                    offset,
                    ty,
                    resolved: true,
                };
                if ty.is_reference() {
                    if !cand.explicitly_initialized {
                        let base = ir.arena.add(
                            OpCode::LoadLocal(agg),
                            SmallVec::new(),
                            ValueType::Address,
                        );
                        let null =
                            ir.arena
                                .add(OpCode::ConstNull, SmallVec::new(), ValueType::Address);
                        let store = ir.arena.add(
                            OpCode::StoreField(fr),
                            SmallVec::from_slice(&[base, null]),
                            ValueType::Void,
                        );
                        ir.prepend_entry(store);
                    }
                } else {
                    let base =
                        ir.arena
                            .add(OpCode::LoadLocal(agg), SmallVec::new(), ValueType::Address);
                    let zero = ir
                        .arena
                        .add(OpCode::ConstInt(0), SmallVec::new(), ValueType::Int64);
                    let store = ir.arena.add(
                        OpCode::StoreField(fr),
                        SmallVec::from_slice(&[base, zero]),
                        ValueType::Void,
                    );
                    ir.insert_after(cand.stmt, store);
                }
            }
        }
        _ => {
            // Arrays: zero every element slot.
            let (elem, len) = match cand.kind {
                CandidateKind::PrimArray => {
                    (cand.elem.unwrap_or(ValueType::Int64), cand.array_length)
                }
                CandidateKind::RefArray => (ValueType::Address, cand.array_length),
                _ => (ValueType::Int64, None),
            };
            let Some(len) = len else { return };
            for i in 0..len {
                let base = ir
                    .arena
                    .add(OpCode::LoadLocal(agg), SmallVec::new(), ValueType::Address);
                let index = ir.arena.add(
                    OpCode::ConstInt(i64::from(i)),
                    SmallVec::new(),
                    ValueType::Int64,
                );
                let value = if elem.is_reference() {
                    ir.arena
                        .add(OpCode::ConstNull, SmallVec::new(), ValueType::Address)
                } else {
                    ir.arena
                        .add(OpCode::ConstInt(0), SmallVec::new(), ValueType::Int64)
                };
                let store = ir.arena.add(
                    OpCode::StoreElement(elem),
                    SmallVec::from_slice(&[base, index, value]),
                    ValueType::Void,
                );
                if elem.is_reference() {
                    ir.prepend_entry(store);
                } else {
                    ir.insert_after(cand.stmt, store);
                }
            }
        }
    }
}

// =============================================================================
// Non-contiguous rewriting
// =============================================================================

fn rewrite_non_contiguous(
    ir: &mut MethodIr,
    meta: &VmRegistry,
    cand: &mut Candidate,
    result: &mut FixupResult,
) {
    // One scalar temporary per trusted slot, resolved on first use.
    for fi in cand.fields.iter_mut() {
        if !fi.has_good_refs() {
            continue;
        }
        let temp_ty = fi.ty.widened();
        let temp = ir.symbols.new_temp(temp_ty);
        fi.backing = Some(temp);

        let accesses: SmallVec<[NodeId; 4]> = fi.good_refs.clone();
        for access in accesses {
            let node = ir.arena.node(access).clone();
            if node.op.is_indirect_store() {
                // Last operand is the stored value.
                let value = match node.operands.last() {
                    Some(&v) => v,
                    None => continue,
                };
                let stored = if fi.ty.needs_conversion() {
                    ir.arena.add(
                        OpCode::Convert {
                            from: fi.ty,
                            to: temp_ty,
                        },
                        SmallVec::from_slice(&[value]),
                        temp_ty,
                    )
                } else {
                    value
                };
                ir.arena.recreate(
                    access,
                    OpCode::StoreLocal(temp),
                    SmallVec::from_slice(&[stored]),
                    ValueType::Void,
                );
                result.stores_rewritten += 1;
            } else {
                if fi.ty.needs_conversion() {
                    let load = ir
                        .arena
                        .add(OpCode::LoadLocal(temp), SmallVec::new(), temp_ty);
                    ir.arena.recreate(
                        access,
                        OpCode::Convert {
                            from: temp_ty,
                            to: fi.ty,
                        },
                        SmallVec::from_slice(&[load]),
                        fi.ty,
                    );
                } else {
                    ir.arena
                        .recreate(access, OpCode::LoadLocal(temp), SmallVec::new(), fi.ty);
                }
                result.loads_rewritten += 1;
            }
        }

        // The slot's temporary starts zeroed at the allocation point.
        let zero = if fi.ty.is_reference() {
            ir.arena
                .add(OpCode::ConstNull, SmallVec::new(), ValueType::Address)
        } else {
            ir.arena
                .add(OpCode::ConstInt(0), SmallVec::new(), ValueType::Int64)
        };
        let init = ir.arena.add(
            OpCode::StoreLocal(temp),
            SmallVec::from_slice(&[zero]),
            ValueType::Void,
        );
        ir.insert_after(cand.stmt, init);
    }

    // The allocation node: a minimal placeholder when identity is still
    // observed, otherwise logically absent.
    if cand.object_referenced {
        match cand.kind {
            CandidateKind::Object | CandidateKind::ValueObject => {
                let placeholder = cand
                    .class
                    .map(|c| root_supertype(meta, c))
                    .unwrap_or(ClassId(0));
                ir.arena.recreate(
                    cand.node,
                    OpCode::NewObject(placeholder),
                    SmallVec::new(),
                    ValueType::Address,
                );
            }
            CandidateKind::PrimArray => {
                let zero = ir
                    .arena
                    .add(OpCode::ConstInt(0), SmallVec::new(), ValueType::Int64);
                ir.arena.recreate(
                    cand.node,
                    OpCode::NewArray(cand.elem.unwrap_or(ValueType::Int64)),
                    SmallVec::from_slice(&[zero]),
                    ValueType::Address,
                );
            }
            CandidateKind::RefArray => {
                let zero = ir
                    .arena
                    .add(OpCode::ConstInt(0), SmallVec::new(), ValueType::Int64);
                ir.arena.recreate(
                    cand.node,
                    OpCode::NewRefArray(cand.class.unwrap_or(ClassId(0))),
                    SmallVec::from_slice(&[zero]),
                    ValueType::Address,
                );
            }
        }
    } else {
        ir.arena.recreate(
            cand.node,
            OpCode::ConstNull,
            SmallVec::new(),
            ValueType::Address,
        );
    }

    result.rewritten += 1;
    tracing::debug!(
        candidate = %cand.id,
        slots = cand.fields.iter().filter(|f| f.backing.is_some()).count(),
        referenced = cand.object_referenced,
        "promoted to scalar temporaries"
    );
}

/// Walk to the top of the superclass chain.
fn root_supertype(meta: &VmRegistry, class: ClassId) -> ClassId {
    let mut cur = class;
    while let Some(shape) = meta.class_shape(cur) {
        match shape.super_class {
            Some(sup) => cur = sup,
            None => break,
        }
    }
    cur
}

// =============================================================================
// Identity-test folding
// =============================================================================

/// Fold identity tests against dissolved (non-contiguous, unreferenced)
/// candidates into opaque constants.
fn fold_identity_tests(
    ir: &mut MethodIr,
    vn: &ValueNumbering,
    cands: &CandidateSet,
    result: &mut FixupResult,
) {
    let dissolved: Vec<&Candidate> = cands
        .iter()
        .filter(|c| {
            c.disposition() == Disposition::LocalNonContiguous && !c.object_referenced
        })
        .collect();
    if dissolved.is_empty() {
        return;
    }

    let is_dissolved = |node: NodeId| {
        vn.value_number(node)
            .is_some_and(|v| dissolved.iter().any(|c| c.is_alias(v)))
    };

    for sid in ir.stmt_ids_in_block_order() {
        let root = ir.stmt(sid).root;
        for id in ir.arena.postorder(root) {
            let node = ir.arena.node(id).clone();
            let folded: Option<i64> = match node.op {
                OpCode::CmpEq | OpCode::CmpNe => {
                    let a = node.operand(0);
                    let b = node.operand(1);
                    let a_cand = a.is_some_and(&is_dissolved);
                    let b_cand = b.is_some_and(&is_dissolved);
                    if !a_cand && !b_cand {
                        None
                    } else {
                        let same_origin = a_cand
                            && b_cand
                            && a.and_then(|n| vn.value_number(n))
                                == b.and_then(|n| vn.value_number(n));
                        let other_is_null = |n: Option<NodeId>| {
                            n.is_some_and(|x| {
                                matches!(ir.arena.node(x).op, OpCode::ConstNull)
                            })
                        };
                        let against_null = other_is_null(a) || other_is_null(b);
                        if same_origin {
                            // Same-origin references always compare equal.
                            Some(i64::from(matches!(node.op, OpCode::CmpEq)))
                        } else if against_null {
                            // A fresh allocation is never null.
                            Some(i64::from(matches!(node.op, OpCode::CmpNe)))
                        } else {
                            None
                        }
                    }
                }
                _ => None,
            };

            if let Some(value) = folded {
                ir.arena.recreate(
                    id,
                    OpCode::ConstInt(value),
                    SmallVec::new(),
                    ValueType::Int32,
                );
                result.tests_folded += 1;
            }
        }
    }
}

// =============================================================================
// Monitor marking
// =============================================================================

/// Mark monitors on candidates that never cold-escape as local-object
/// monitors; the flush/monitor pass removes them.
fn mark_local_monitors(cands: &CandidateSet, result: &mut FixupResult) {
    for cand in cands.iter() {
        if cand.disposition() == Disposition::Rejected || cand.escapes_in_cold_blocks {
            continue;
        }
        for &sid in &cand.lock_stmts {
            if !result.local_monitors.contains(&sid) {
                result.local_monitors.push(sid);
            }
        }
    }
}
