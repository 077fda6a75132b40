//! Bounded interprocedural peeking ("sniffing").
//!
//! A candidate passed as a call argument does not escape outright: the
//! engine peeks into the callee's IR and re-runs escape classification
//! there, with the argument positions standing in for the candidate.
//! Peeking is gated by a recursion-depth limit, a per-callee bytecode-size
//! limit, and a cumulative byte budget for the whole pass; exhausting any
//! budget is a deterministic conservative fallback, never an error.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::analysis::value_numbering::{ValueNum, ValueNumbering};
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::{CallKind, CallTarget, OpCode};
use crate::ir::types::MethodId;
use crate::meta::MethodImpl;
use crate::opt::OptContext;

use super::EscapeConfig;

// =============================================================================
// Verdict
// =============================================================================

/// What a peeked callee does with the argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SniffVerdict {
    /// The argument can reach an external sink through the callee.
    pub escaped: bool,
    /// The callee observes the argument's object identity.
    pub referenced: bool,
    /// The callee needs the argument as one addressable block.
    pub contiguous: bool,
}

impl SniffVerdict {
    /// A verdict with no obligations.
    #[must_use]
    pub fn safe() -> Self {
        Self::default()
    }

    /// An escaped verdict.
    #[must_use]
    pub fn escaped() -> Self {
        Self {
            escaped: true,
            ..Self::default()
        }
    }

    /// Combine with another verdict (union of obligations).
    pub fn absorb(&mut self, other: SniffVerdict) {
        self.escaped |= other.escaped;
        self.referenced |= other.referenced;
        self.contiguous |= other.contiguous;
    }
}

/// Result of one sniff attempt at a call site.
#[derive(Debug, Clone, Copy)]
pub struct SniffOutcome {
    /// Combined verdict for the candidate arguments.
    pub verdict: SniffVerdict,
    /// Callee bytes charged against the global budget by this attempt.
    pub peeked_bytes: u32,
    /// Deepest recursion level reached.
    pub depth: u32,
    /// Whether a successful peek makes the call an inlining obligation.
    pub inlinable: bool,
}

// =============================================================================
// Context record
// =============================================================================

/// Immutable per-recursion state, rebuilt (not mutated) on descent.
#[derive(Debug, Clone)]
pub struct SniffContext {
    /// Current recursion depth (0 = the compiling method's own calls).
    pub depth: u32,
    /// Methods on the peek stack, for cycle avoidance.
    stack: Vec<MethodId>,
}

impl SniffContext {
    /// The outermost context.
    #[must_use]
    pub fn root() -> Self {
        Self {
            depth: 0,
            stack: Vec::new(),
        }
    }

    /// A context one level deeper, with `method` pushed.
    #[must_use]
    pub fn deeper(&self, method: MethodId) -> Self {
        let mut stack = self.stack.clone();
        stack.push(method);
        Self {
            depth: self.depth + 1,
            stack,
        }
    }

    /// Whether `method` is already being peeked.
    #[must_use]
    pub fn on_stack(&self, method: MethodId) -> bool {
        self.stack.contains(&method)
    }
}

// =============================================================================
// Sniffer
// =============================================================================

/// The peeking engine for one analysis pass.
pub struct Sniffer<'a> {
    ctx: &'a OptContext<'a>,
    config: &'a EscapeConfig,
    compiling: MethodId,
    total_peeked: u32,
    /// Call nodes that already used their one self-recursive sniff.
    self_sniffed: FxHashSet<NodeId>,
}

impl<'a> Sniffer<'a> {
    /// Create a sniffer for the method being compiled.
    #[must_use]
    pub fn new(ctx: &'a OptContext<'a>, config: &'a EscapeConfig, compiling: MethodId) -> Self {
        Self {
            ctx,
            config,
            compiling,
            total_peeked: 0,
            self_sniffed: FxHashSet::default(),
        }
    }

    /// Cumulative callee bytes peeked so far this pass.
    #[inline]
    #[must_use]
    pub fn total_peeked(&self) -> u32 {
        self.total_peeked
    }

    /// Sniff one call site whose arguments at `positions` carry the
    /// candidate.
    pub fn sniff_call(
        &mut self,
        call_node: NodeId,
        target: CallTarget,
        positions: &[u32],
    ) -> SniffOutcome {
        let scx = SniffContext::root();
        let before = self.total_peeked;
        let (verdict, depth, peeked) = self.sniff_target(&scx, call_node, target, positions);
        SniffOutcome {
            verdict,
            peeked_bytes: self.total_peeked - before,
            depth,
            inlinable: peeked && !verdict.escaped,
        }
    }

    /// Returns (verdict, max depth reached, whether a peek happened).
    fn sniff_target(
        &mut self,
        scx: &SniffContext,
        call_node: NodeId,
        target: CallTarget,
        positions: &[u32],
    ) -> (SniffVerdict, u32, bool) {
        // Trusted intrinsics need no peek at all.
        if self.ctx.meta.is_trusted_non_escaping(target.method) {
            return (SniffVerdict::safe(), scx.depth, false);
        }

        match target.kind {
            CallKind::Unresolved => return (SniffVerdict::escaped(), scx.depth, false),
            CallKind::Native => {
                // Natives are never peeked; the whitelist decides.
                let all_trusted = positions
                    .iter()
                    .all(|&p| self.ctx.meta.native_arg_never_escapes(target.method, p));
                let verdict = if all_trusted {
                    SniffVerdict::safe()
                } else {
                    SniffVerdict::escaped()
                };
                return (verdict, scx.depth, false);
            }
            CallKind::Virtual => {
                // Indirect targets are only sniffed at the outermost level
                // and only when no override can redirect them.
                let overridable = self
                    .ctx
                    .meta
                    .method_shape(target.method)
                    .is_none_or(|m| m.overridable);
                if scx.depth > 0 || overridable {
                    return (SniffVerdict::escaped(), scx.depth, false);
                }
            }
            CallKind::Direct => {}
        }

        let Some(shape) = self.ctx.meta.method_shape(target.method) else {
            return (SniffVerdict::escaped(), scx.depth, false);
        };
        if shape.kind == MethodImpl::Native {
            return (SniffVerdict::escaped(), scx.depth, false);
        }

        // Budgets.
        if scx.depth >= self.config.max_sniff_depth {
            return (SniffVerdict::escaped(), scx.depth, false);
        }
        if shape.bytecode_size > self.config.max_peek_bytecode_size {
            return (SniffVerdict::escaped(), scx.depth, false);
        }
        if self.total_peeked + shape.bytecode_size > self.config.total_peek_budget {
            return (SniffVerdict::escaped(), scx.depth, false);
        }

        // Recursion guards: direct self-recursion gets one peek per call
        // node; general cycles are cut outright.
        if target.method == self.compiling {
            if !self.self_sniffed.insert(call_node) {
                return (SniffVerdict::escaped(), scx.depth, false);
            }
        } else if scx.on_stack(target.method) {
            return (SniffVerdict::escaped(), scx.depth, false);
        }

        let callee = match self.ctx.provider.peek(target.method) {
            Ok(callee) => callee,
            Err(_) => {
                tracing::trace!(callee = %target.method, "peek failed, treating as escape");
                return (SniffVerdict::escaped(), scx.depth, false);
            }
        };

        self.total_peeked += shape.bytecode_size;
        let deeper = scx.deeper(target.method);
        let (verdict, depth) = self.analyze_callee(&deeper, &callee, positions);
        (verdict, depth, true)
    }

    /// Classify every use of the tainted parameters inside a callee body.
    fn analyze_callee(
        &mut self,
        scx: &SniffContext,
        callee: &MethodIr,
        positions: &[u32],
    ) -> (SniffVerdict, u32) {
        let vn = ValueNumbering::compute(callee);

        // Seed taint with the parameter value numbers, then grow across
        // join numbers whose inputs are tainted.
        let mut taint: FxHashSet<ValueNum> = FxHashSet::default();
        for sid in callee.stmt_ids_in_block_order() {
            let root = callee.stmt(sid).root;
            for id in callee.arena.postorder(root) {
                if let OpCode::Param(i) = callee.arena.node(id).op {
                    if positions.contains(&i) {
                        if let Some(pvn) = vn.value_number(id) {
                            taint.insert(pvn);
                        }
                    }
                }
            }
        }
        grow_taint(&vn, &mut taint);

        let mut verdict = SniffVerdict::safe();
        let mut max_depth = scx.depth;

        for sid in callee.stmt_ids_in_block_order() {
            if verdict.escaped {
                break;
            }
            let root = callee.stmt(sid).root;
            for id in callee.arena.postorder(root) {
                let node = callee.arena.node(id).clone();
                let tainted_operand = |ix: usize| {
                    node.operand(ix)
                        .and_then(|o| vn.value_number(o))
                        .is_some_and(|v| taint.contains(&v))
                };
                let any_tainted = (0..node.operands.len()).any(tainted_operand);
                if !any_tainted {
                    continue;
                }

                match node.op {
                    // External sinks.
                    OpCode::ReturnValue
                    | OpCode::Throw
                    | OpCode::StoreStatic(_)
                    | OpCode::RawLoad(_)
                    | OpCode::RawStore(_)
                    | OpCode::ArrayCopy => {
                        verdict.escaped = true;
                    }

                    // Storing the taint into another object escapes; writes
                    // into the tainted object itself are fine here (fields
                    // are re-discovered after inlining).
                    OpCode::StoreField(_) => {
                        if tainted_operand(1) && !tainted_operand(0) {
                            verdict.escaped = true;
                        }
                    }
                    OpCode::StoreElement(_) => {
                        if tainted_operand(2) && !tainted_operand(0) {
                            verdict.escaped = true;
                        }
                    }

                    // Benign reads.
                    OpCode::LoadField(_) | OpCode::LoadElement(_) | OpCode::ArrayLength => {}

                    // Taint flows through locals via value numbers.
                    OpCode::StoreLocal(_) => {}

                    // Identity observations.
                    OpCode::CmpEq
                    | OpCode::CmpNe
                    | OpCode::InstanceOf(_)
                    | OpCode::CheckCast(_)
                    | OpCode::MonitorEnter
                    | OpCode::MonitorExit => {
                        verdict.referenced = true;
                    }

                    // Address derivations pin the layout.
                    OpCode::AddressOf => {
                        verdict.contiguous = true;
                    }

                    // Deeper calls recurse under the same budgets.
                    OpCode::Call(inner) => {
                        let inner_positions: SmallVec<[u32; 4]> = (0..node.operands.len())
                            .filter(|&ix| tainted_operand(ix))
                            .map(|ix| ix as u32)
                            .collect();
                        let (v, d, _) =
                            self.sniff_target(scx, id, inner, &inner_positions);
                        verdict.absorb(v);
                        max_depth = max_depth.max(d);
                    }

                    // Anything else touching the taint is unknown.
                    _ => {
                        verdict.escaped = true;
                    }
                }

                if verdict.escaped {
                    break;
                }
            }
        }

        (verdict, max_depth)
    }
}

/// Add every join number any tainted number flows into.
fn grow_taint(vn: &ValueNumbering, taint: &mut FxHashSet<ValueNum>) {
    let mut changed = true;
    while changed {
        changed = false;
        for (merge, inputs) in vn.merge_numbers() {
            if taint.contains(&merge) {
                continue;
            }
            if inputs.iter().any(|i| taint.contains(i)) {
                taint.insert(merge);
                changed = true;
            }
        }
    }
}
