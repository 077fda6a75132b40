//! Escape propagation.
//!
//! A forward walk over every statement classifying each use of each
//! candidate's aliases. Runs in two sub-passes, everything except calls
//! first and calls second, so interprocedural peeking is only paid for
//! candidates that survived the cheap checks.
//!
//! Classification outcomes, from weakest to strongest:
//! - field tracking (benign, recorded for rewriting)
//! - object-referenced (identity needed, still promotable)
//! - restrict-to-contiguous (monotonic)
//! - cold-block escape (compensated by heapification)
//! - direct escape (candidate dropped)

use smallvec::SmallVec;

use garnet_core::GarnetResult;

use crate::analysis::value_numbering::ValueNumbering;
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::{CallTarget, FieldRef, OpCode};
use crate::ir::stmt::StmtId;
use crate::ir::types::ValueType;
use crate::opt::OptContext;

use super::candidates::{CandidateId, CandidateSet, ColdEscape};
use super::discovery::is_cold_block;
use super::sniff::Sniffer;
use super::EscapeConfig;

/// Run both propagation sub-passes over the method.
pub fn propagate(
    ir: &MethodIr,
    ctx: &OptContext<'_>,
    config: &EscapeConfig,
    vn: &ValueNumbering,
    cands: &mut CandidateSet,
    sniffer: &mut Sniffer<'_>,
) -> GarnetResult<()> {
    seed_alias_sets(vn, cands);
    grow_alias_sets(vn, cands);

    let mut prop = Propagator {
        ir,
        ctx,
        config,
        vn,
        cands,
        sniffer,
    };

    ctx.interrupt.check()?;
    prop.walk(false);
    grow_alias_sets(vn, prop.cands);

    ctx.interrupt.check()?;
    prop.walk(true);
    grow_alias_sets(vn, prop.cands);

    Ok(())
}

/// Seed every candidate's alias set with its allocation node's number.
fn seed_alias_sets(vn: &ValueNumbering, cands: &mut CandidateSet) {
    for cand in cands.iter_mut() {
        if let Some(v) = vn.value_number(cand.node) {
            cand.alias.insert(v);
        }
    }
}

/// Grow alias sets across join numbers until stable.
pub fn grow_alias_sets(vn: &ValueNumbering, cands: &mut CandidateSet) {
    for cand in cands.iter_mut() {
        let mut changed = true;
        while changed {
            changed = false;
            for (merge, inputs) in vn.merge_numbers() {
                if cand.alias.contains(&merge) {
                    continue;
                }
                if inputs.iter().any(|i| cand.alias.contains(i)) {
                    cand.alias.insert(merge);
                    changed = true;
                }
            }
        }
    }
}

// =============================================================================
// Propagator
// =============================================================================

struct Propagator<'a, 'b> {
    ir: &'a MethodIr,
    ctx: &'a OptContext<'a>,
    config: &'a EscapeConfig,
    vn: &'a ValueNumbering,
    cands: &'a mut CandidateSet,
    sniffer: &'a mut Sniffer<'b>,
}

impl Propagator<'_, '_> {
    /// One forward sub-pass; `calls` selects the call pass.
    fn walk(&mut self, calls: bool) {
        for sid in self.ir.stmt_ids_in_block_order() {
            let root = self.ir.stmt(sid).root;
            for id in self.ir.arena.postorder(root) {
                let is_call = self.ir.arena.node(id).op.is_call();
                if is_call == calls {
                    if calls {
                        self.classify_call(sid, id);
                    } else {
                        self.classify_node(sid, id);
                    }
                }
            }
        }
    }

    /// Candidate owning the value a node produces, if any.
    fn candidate_of(&self, node: NodeId) -> Option<CandidateId> {
        let v = self.vn.value_number(node)?;
        let cid = self.cands.find_by_alias(v)?;
        // Profile-only candidates take no part in propagation.
        if self.cands.get(cid).profile_only {
            return None;
        }
        Some(cid)
    }

    /// Whether operand `ix` of `node` belongs to candidate `cid`.
    fn operand_is(&self, node: NodeId, ix: usize, cid: CandidateId) -> bool {
        self.ir
            .arena
            .node(node)
            .operand(ix)
            .and_then(|o| self.candidate_of(o))
            == Some(cid)
    }

    /// Classify one non-call node against every candidate it touches.
    fn classify_node(&mut self, sid: StmtId, id: NodeId) {
        let node = self.ir.arena.node(id).clone();
        for ix in 0..node.operands.len() {
            let Some(cid) = node.operand(ix).and_then(|o| self.candidate_of(o)) else {
                continue;
            };
            self.classify_use(sid, id, &node.op, ix, cid);
        }
    }

    fn classify_use(&mut self, sid: StmtId, id: NodeId, op: &OpCode, ix: usize, cid: CandidateId) {
        match *op {
            // --- direct escapes -------------------------------------------
            OpCode::ReturnValue | OpCode::Throw => {
                self.escape_at(cid, sid, id, false);
            }
            OpCode::StoreStatic(_) => {
                self.escape_at(cid, sid, id, true);
            }
            OpCode::RawStore(_) => {
                self.escape_at(cid, sid, id, true);
            }
            OpCode::StoreField(fr) => {
                if ix == 0 {
                    self.track_field(cid, id, fr);
                } else if self.operand_is(id, 0, cid) {
                    // Stored into itself: identity survives in a field.
                    self.cands.get_mut(cid).object_referenced = true;
                } else {
                    self.escape_at(cid, sid, id, true);
                }
            }
            OpCode::StoreElement(elem) => {
                if ix == 0 {
                    self.track_element(cid, id, elem);
                } else if ix == 2 {
                    if self.operand_is(id, 0, cid) {
                        self.cands.get_mut(cid).object_referenced = true;
                    } else {
                        self.escape_at(cid, sid, id, true);
                    }
                }
            }
            OpCode::ArrayCopy => {
                // [src, src_off, dst, dst_off, len]; shape known only when
                // both offsets are literal zero and the length is literal.
                let zero_off = self.const_value(id, 1) == Some(0)
                    && self.const_value(id, 3) == Some(0)
                    && self.const_value(id, 4).is_some();
                if zero_off {
                    self.cands.get_mut(cid).set_contiguous();
                } else {
                    self.escape_at(cid, sid, id, true);
                }
            }

            // --- restrict to contiguous -----------------------------------
            OpCode::AddressOf | OpCode::RawLoad(_) => {
                self.cands.get_mut(cid).set_contiguous();
            }

            // --- field tracking -------------------------------------------
            OpCode::LoadField(fr) => {
                self.track_field(cid, id, fr);
            }
            OpCode::LoadElement(elem) => {
                if ix == 0 {
                    self.track_element(cid, id, elem);
                }
            }

            // --- identity observations ------------------------------------
            OpCode::CmpEq | OpCode::CmpNe => {
                let other_ix = if ix == 0 { 1 } else { 0 };
                let other = self.ir.arena.node(id).operand(other_ix);
                let comparable = other.is_some_and(|o| {
                    matches!(self.ir.arena.node(o).op, OpCode::ConstNull)
                        || self.candidate_of(o) == Some(cid)
                });
                if !comparable {
                    self.cands.get_mut(cid).object_referenced = true;
                }
            }
            OpCode::InstanceOf(tested) => {
                let outcome = self
                    .cands
                    .get(cid)
                    .class
                    .and_then(|c| self.ctx.meta.is_subtype_of(c, tested));
                if outcome.is_none() {
                    self.cands.get_mut(cid).object_referenced = true;
                }
            }
            OpCode::CheckCast(tested) => {
                let outcome = self
                    .cands
                    .get(cid)
                    .class
                    .and_then(|c| self.ctx.meta.is_subtype_of(c, tested));
                match outcome {
                    Some(true) => {
                        // The cast passes the reference through: its value
                        // joins the alias set.
                        if let Some(v) = self.vn.value_number(id) {
                            self.cands.get_mut(cid).alias.insert(v);
                        }
                    }
                    Some(false) => {}
                    None => {
                        self.cands.get_mut(cid).object_referenced = true;
                    }
                }
            }

            // --- synchronization ------------------------------------------
            OpCode::MonitorEnter | OpCode::MonitorExit => {
                let cand = self.cands.get_mut(cid);
                if !cand.lock_stmts.contains(&sid) {
                    cand.lock_stmts.push(sid);
                }
            }

            // --- barriers -------------------------------------------------
            OpCode::AllocationFence => {
                let cand = self.cands.get_mut(cid);
                if !cand.fence_stmts.contains(&sid) {
                    cand.fence_stmts.push(sid);
                }
            }

            // --- benign ---------------------------------------------------
            OpCode::ArrayLength | OpCode::StoreLocal(_) => {}

            // Calls are handled by the call sub-pass.
            OpCode::Call(_) => {}

            // --- anything else is an unknown use --------------------------
            _ => {
                self.escape_at(cid, sid, id, false);
            }
        }
    }

    /// Classify one call node: gather candidate argument positions and
    /// sniff into the callee.
    fn classify_call(&mut self, sid: StmtId, id: NodeId) {
        let node = self.ir.arena.node(id).clone();
        let OpCode::Call(target) = node.op else {
            return;
        };

        // Candidate -> argument positions.
        let mut per_cand: SmallVec<[(CandidateId, SmallVec<[u32; 4]>); 2]> = SmallVec::new();
        for ix in 0..node.operands.len() {
            let Some(cid) = node.operand(ix).and_then(|o| self.candidate_of(o)) else {
                continue;
            };
            match per_cand.iter_mut().find(|(c, _)| *c == cid) {
                Some((_, positions)) => positions.push(ix as u32),
                None => {
                    let mut positions = SmallVec::new();
                    positions.push(ix as u32);
                    per_cand.push((cid, positions));
                }
            }
        }

        for (cid, positions) in per_cand {
            self.sniff_for(sid, id, target, cid, &positions);
        }
    }

    fn sniff_for(
        &mut self,
        sid: StmtId,
        id: NodeId,
        target: CallTarget,
        cid: CandidateId,
        positions: &[u32],
    ) {
        let outcome = self.sniffer.sniff_call(id, target, positions);

        {
            let cand = self.cands.get_mut(cid);
            cand.peeked_bytes += outcome.peeked_bytes;
            cand.max_sniff_depth = cand.max_sniff_depth.max(outcome.depth);
            if outcome.verdict.referenced {
                cand.object_referenced = true;
            }
            if outcome.verdict.contiguous {
                cand.set_contiguous();
            }
            if target.synchronized && positions.contains(&0) {
                cand.sync_call_stmts.push(sid);
            }
        }

        if outcome.verdict.escaped {
            // The callee consumes the object whole; a cold-path
            // compensation must hand it a coherent copy.
            self.escape_at(cid, sid, id, true);
        } else if outcome.inlinable {
            let cand = self.cands.get_mut(cid);
            if !cand.calls_to_inline.iter().any(|o| o.stmt == sid) {
                cand.calls_to_inline.push(super::candidates::InlineObligation {
                    stmt: sid,
                    cost: outcome.peeked_bytes,
                });
            }
            tracing::trace!(
                candidate = %cand.id,
                callee = %target.method,
                "call sniffed clean, queued for inlining"
            );
        }
    }

    /// Handle a direct escape: compensate in cold blocks, reject
    /// otherwise. `needs_object` marks escapes that hand the value out
    /// whole (stores, call arguments), which pins a heapifiable shape.
    fn escape_at(&mut self, cid: CandidateId, sid: StmtId, reference: NodeId, needs_object: bool) {
        let block = self.ir.stmt(sid).block;
        let cold = is_cold_block(self.ir, self.config, block);
        let cand = self.cands.get_mut(cid);

        if !cand.escape_stmts.contains(&sid) {
            cand.escape_stmts.push(sid);
        }

        if cand.force_local {
            tracing::trace!(candidate = %cand.id, "escape ignored: promotion forced");
            return;
        }

        if cold {
            cand.escapes_in_cold_blocks = true;
            cand.cold_escapes.push(ColdEscape {
                block,
                reference,
                stmt: sid,
            });
            if needs_object {
                // The escaping value lands somewhere whole: a single
                // coherent object must exist to heapify.
                cand.set_contiguous();
            }
            tracing::trace!(candidate = %cand.id, block = %block, "cold-block escape recorded");
        } else {
            cand.reject();
            tracing::trace!(candidate = %cand.id, node = %reference, "candidate escapes");
        }
    }

    /// Record an instance-field access against a candidate.
    fn track_field(&mut self, cid: CandidateId, node: NodeId, fr: FieldRef) {
        if !fr.resolved {
            self.cands.get_mut(cid).set_contiguous();
            return;
        }
        let offset = fr.offset;
        let size = fr.size();
        let (header_size, cand_size, class) = {
            let cand = self.cands.get(cid);
            (cand.header_size, cand.size, cand.class)
        };

        // Header-relative offsets are always trusted.
        let good = if offset < header_size {
            true
        } else {
            match class.and_then(|c| self.ctx.meta.class_shape(c)) {
                Some(shape) => {
                    shape.contains_range(offset, size)
                        && shape.field_at(offset).is_some_and(|f| f.ty == fr.ty)
                }
                None => {
                    // Metadata unavailable: skip the validity check and
                    // keep the object whole.
                    self.cands.get_mut(cid).set_contiguous();
                    return;
                }
            }
        };

        let cand = self.cands.get_mut(cid);
        if good {
            if let Some(existing) = cand.field_at(offset) {
                if existing.has_good_refs() && (existing.size != size || existing.ty != fr.ty) {
                    // Two trusted views of the same offset disagree.
                    cand.reject();
                    return;
                }
            }
            cand.remember_field(offset, size, fr.ty).good_refs.push(node);
        } else {
            cand.remember_field(offset, size, fr.ty).bad_refs.push(node);
            if offset.checked_add(size).is_some_and(|end| end <= cand_size) {
                cand.set_contiguous();
            } else {
                // The reference does not even fit the allocated extent.
                cand.reject();
            }
        }
    }

    /// Record an array-element access against a candidate.
    fn track_element(&mut self, cid: CandidateId, node: NodeId, elem: ValueType) {
        let (kind, header_size, length, cand_elem) = {
            let cand = self.cands.get(cid);
            (cand.kind, cand.header_size, cand.array_length, cand.elem)
        };
        if !kind.is_array() {
            // Element access on a non-array shape.
            self.cands.get_mut(cid).reject();
            return;
        }
        if let Some(expected) = cand_elem {
            if expected != elem {
                self.cands.get_mut(cid).set_contiguous();
                return;
            }
        }

        match self.const_value(node, 1) {
            Some(i) if i >= 0 => {
                let idx = i as u32;
                let in_bounds = length.is_some_and(|n| idx < n);
                let offset = header_size + idx * elem.byte_size();
                let cand = self.cands.get_mut(cid);
                if in_bounds {
                    cand.remember_field(offset, elem.byte_size(), elem)
                        .good_refs
                        .push(node);
                } else {
                    cand.remember_field(offset, elem.byte_size(), elem)
                        .bad_refs
                        .push(node);
                    cand.reject();
                }
            }
            _ => {
                // Dynamic index: the array must stay one block.
                self.cands.get_mut(cid).set_contiguous();
            }
        }
    }

    /// Literal value of operand `ix`, if it is an integer constant.
    fn const_value(&self, node: NodeId, ix: usize) -> Option<i64> {
        let operand = self.ir.arena.node(node).operand(ix)?;
        match self.ir.arena.node(operand).op {
            OpCode::ConstInt(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::candidates::Disposition;
    use super::super::discovery;
    use super::*;
    use crate::ir::builder::{field, unresolved_field, IrBuilder};
    use crate::ir::types::{ClassId, MethodId, StaticId};
    use crate::meta::{ClassShape, MapIrProvider, VmRegistry};
    use garnet_core::{CompilerOptions, InterruptFlag};

    struct Fixture {
        meta: VmRegistry,
        provider: MapIrProvider,
        options: CompilerOptions,
        interrupt: InterruptFlag,
        config: EscapeConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let mut meta = VmRegistry::new();
            meta.register_class(
                ClassId(1),
                ClassShape::object("Point", 24)
                    .with_field("x", 16, ValueType::Int32)
                    .with_field("y", 20, ValueType::Int32),
            );
            Self {
                meta,
                provider: MapIrProvider::new(),
                options: CompilerOptions::default(),
                interrupt: InterruptFlag::new(),
                config: EscapeConfig::default(),
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

        fn analyze(&self, ir: &mut MethodIr) -> CandidateSet {
            let ctx = self.ctx();
            let mut cands = discovery::discover(ir, &ctx, &self.config);
            let vn = ValueNumbering::compute(ir);
            let mut sniffer = Sniffer::new(&ctx, &self.config, ir.method);
            propagate(ir, &ctx, &self.config, &vn, &mut cands, &mut sniffer).unwrap();
            cands
        }
    }

    #[test]
    fn test_returned_allocation_escapes() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let p = b.local("p", ValueType::Address);
        let alloc = b.new_object(ClassId(1));
        b.store_local(p, alloc);
        let load = b.load_local(p);
        b.ret_value(load);
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands.get(CandidateId(0)).disposition(), Disposition::Rejected);
    }

    #[test]
    fn test_local_only_allocation_survives() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let p = b.local("p", ValueType::Address);
        let alloc = b.new_object(ClassId(1));
        b.store_local(p, alloc);
        let base = b.load_local(p);
        let seven = b.const_int(7);
        b.store_field(base, field(ClassId(1), 16, ValueType::Int32), seven);
        let base2 = b.load_local(p);
        let x = b.load_field(base2, field(ClassId(1), 16, ValueType::Int32));
        let t = b.local("t", ValueType::Int32);
        b.store_local(t, x);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        let c = cands.get(CandidateId(0));
        assert_eq!(c.disposition(), Disposition::LocalNonContiguous);
        let fi = c.field_at(16).unwrap();
        assert_eq!(fi.good_refs.len(), 2);
    }

    #[test]
    fn test_static_store_escapes() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        b.store_static(StaticId(0), load);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        assert_eq!(cands.get(CandidateId(0)).disposition(), Disposition::Rejected);
    }

    #[test]
    fn test_store_into_other_object_escapes() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 1);
        let other = b.param(0, ValueType::Address);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        b.store_field(other, field(ClassId(1), 16, ValueType::Address), load);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        assert_eq!(cands.get(CandidateId(0)).disposition(), Disposition::Rejected);
    }

    #[test]
    fn test_unresolved_field_restricts_contiguous() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        let x = b.load_field(load, unresolved_field(ClassId(1), 16, ValueType::Int32));
        let t = b.local("t", ValueType::Int32);
        b.store_local(t, x);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        let c = cands.get(CandidateId(0));
        assert_eq!(c.disposition(), Disposition::LocalContiguous);
    }

    #[test]
    fn test_out_of_extent_field_rejects() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        let x = b.load_field(load, field(ClassId(1), 64, ValueType::Int64));
        let t = b.local("t", ValueType::Int64);
        b.store_local(t, x);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        let c = cands.get(CandidateId(0));
        assert_eq!(c.disposition(), Disposition::Rejected);
        // The reference is remembered as untrusted.
        assert!(!c.field_at(64).unwrap().bad_refs.is_empty());
    }

    #[test]
    fn test_address_arithmetic_restricts() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        let off = b.const_int(16);
        let addr = b.address_of(load, off);
        let a = b.local("a", ValueType::Address);
        b.store_local(a, addr);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        assert_eq!(
            cands.get(CandidateId(0)).disposition(),
            Disposition::LocalContiguous
        );
    }

    #[test]
    fn test_identity_compare_marks_referenced() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 1);
        let other = b.param(0, ValueType::Address);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        let cmp = b.cmp_eq(load, other);
        let t = b.local("t", ValueType::Int32);
        b.store_local(t, cmp);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        let c = cands.get(CandidateId(0));
        assert!(c.object_referenced);
        assert_eq!(c.disposition(), Disposition::LocalNonContiguous);
    }

    #[test]
    fn test_null_compare_does_not_mark_referenced() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        let null = b.const_null();
        let cmp = b.cmp_eq(load, null);
        let t = b.local("t", ValueType::Int32);
        b.store_local(t, cmp);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        assert!(!cands.get(CandidateId(0)).object_referenced);
    }

    #[test]
    fn test_cold_block_escape_is_compensated() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let cold = b.add_catch_block();
        let entry = b.current_block();
        b.edge(entry, cold);

        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        b.ret();

        b.select(cold);
        let load = b.load_local(p);
        b.store_static(StaticId(0), load);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        let c = cands.get(CandidateId(0));
        assert!(c.is_local);
        assert!(c.escapes_in_cold_blocks);
        assert_eq!(c.cold_escapes.len(), 1);
        // The escape stores the value, so a coherent object must exist.
        assert!(c.must_be_contiguous());
        assert_eq!(c.disposition(), Disposition::LocalContiguous);
    }

    #[test]
    fn test_monitor_recorded_not_escaping() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let l1 = b.load_local(p);
        b.monitor_enter(l1);
        let l2 = b.load_local(p);
        b.monitor_exit(l2);
        b.ret();
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        let c = cands.get(CandidateId(0));
        assert!(c.is_local);
        assert_eq!(c.lock_stmts.len(), 2);
    }

    #[test]
    fn test_call_argument_escape_without_callee_ir() {
        let f = Fixture::new();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(1));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        let call = b.call(CallTarget::direct(MethodId(50)), &[load], ValueType::Void);
        b.stmt(call);
        b.ret();
        let mut ir = b.finish();

        // Method 50 has no shape and no body: sniff fails conservatively.
        let cands = f.analyze(&mut ir);
        assert_eq!(cands.get(CandidateId(0)).disposition(), Disposition::Rejected);
    }

    #[test]
    fn test_forced_local_ignores_escape() {
        let mut f = Fixture::new();
        f.meta.register_class(
            ClassId(7),
            ClassShape::object("Pinned", 24)
                .with_field("x", 16, ValueType::Int32)
                .forced_local(),
        );
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let alloc = b.new_object(ClassId(7));
        let p = b.local("p", ValueType::Address);
        b.store_local(p, alloc);
        let load = b.load_local(p);
        b.ret_value(load);
        let mut ir = b.finish();

        let cands = f.analyze(&mut ir);
        assert!(cands.get(CandidateId(0)).is_local);
    }
}
