//! The inlining engine seam.
//!
//! Escape analysis produces a worklist of call sites that must be
//! materialized before a promoted candidate's flow is concrete. The engine
//! itself lives outside the pass; `SpliceInliner` covers the straight-line
//! callees the escape pass actually queues (small readers, constructors),
//! and anything beyond that is declined.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use garnet_core::GarnetResult;

use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::OpCode;
use crate::ir::stmt::StmtId;
use crate::ir::symbols::SymbolId;
use crate::ir::types::ValueType;

use super::provider::IrProvider;

/// Materializes a call site in place.
pub trait Inliner {
    /// Inline the call rooted in `call_stmt`. Returns whether the call was
    /// materialized.
    fn inline(
        &self,
        ir: &mut MethodIr,
        provider: &dyn IrProvider,
        call_stmt: StmtId,
    ) -> GarnetResult<bool>;
}

/// An inliner that declines every request.
#[derive(Debug, Default)]
pub struct NullInliner;

impl Inliner for NullInliner {
    fn inline(
        &self,
        _ir: &mut MethodIr,
        _provider: &dyn IrProvider,
        _call_stmt: StmtId,
    ) -> GarnetResult<bool> {
        Ok(false)
    }
}

/// Splices single-block callee bodies into the caller.
///
/// Parameters are substituted by the call's argument nodes, callee locals
/// become fresh caller temporaries, and a returned value replaces the call
/// node in place. Multi-block callees are declined.
#[derive(Debug, Default)]
pub struct SpliceInliner;

impl Inliner for SpliceInliner {
    fn inline(
        &self,
        ir: &mut MethodIr,
        provider: &dyn IrProvider,
        call_stmt: StmtId,
    ) -> GarnetResult<bool> {
        if !ir.is_attached(call_stmt) {
            return Ok(false);
        }
        let root = ir.stmt(call_stmt).root;

        // Locate the call node inside the statement tree.
        let call_node = ir
            .arena
            .postorder(root)
            .into_iter()
            .find(|&id| ir.arena.node(id).op.is_call());
        let Some(call_node) = call_node else {
            return Ok(false);
        };
        let OpCode::Call(target) = ir.arena.node(call_node).op else {
            return Ok(false);
        };
        let args: SmallVec<[NodeId; 2]> = ir.arena.node(call_node).operands.clone();

        let callee = provider.peek(target.method)?;
        if callee.cfg.len() != 1 {
            return Ok(false);
        }

        let mut splicer = Splicer {
            ir: &mut *ir,
            callee: &callee,
            args: &args,
            node_map: FxHashMap::default(),
            sym_map: FxHashMap::default(),
        };

        let mut returned: Option<NodeId> = None;
        let callee_stmts: Vec<StmtId> = callee.cfg.block(callee.cfg.entry()).stmts.clone();
        let mut mapped_roots: Vec<NodeId> = Vec::new();
        for sid in callee_stmts {
            let callee_root = callee.stmt(sid).root;
            match callee.arena.node(callee_root).op {
                OpCode::Return => {}
                OpCode::ReturnValue => {
                    let value = callee.arena.node(callee_root).operand(0);
                    if let Some(v) = value {
                        returned = Some(splicer.map_node(v));
                    }
                }
                _ => {
                    let mapped = splicer.map_node(callee_root);
                    mapped_roots.push(mapped);
                }
            }
        }
        for mapped in mapped_roots {
            ir.insert_before(call_stmt, mapped);
        }

        match returned {
            Some(v) => {
                // The call node becomes a copy of the returned value so
                // every parent sees the result directly.
                let copy = ir.arena.node(v).clone();
                ir.arena.recreate(call_node, copy.op, copy.operands, copy.ty);
            }
            None => {
                // Void call: drop the statement when the call roots it.
                if root == call_node {
                    ir.detach(call_stmt);
                } else {
                    ir.arena.recreate(
                        call_node,
                        OpCode::ConstInt(0),
                        SmallVec::new(),
                        ValueType::Int64,
                    );
                }
            }
        }

        tracing::debug!(callee = %target.method, stmt = %call_stmt, "call site inlined");
        Ok(true)
    }
}

struct Splicer<'a> {
    ir: &'a mut MethodIr,
    callee: &'a MethodIr,
    args: &'a [NodeId],
    node_map: FxHashMap<NodeId, NodeId>,
    sym_map: FxHashMap<SymbolId, SymbolId>,
}

impl Splicer<'_> {
    /// Copy a callee node into the caller, substituting parameters and
    /// renaming symbols.
    fn map_node(&mut self, callee_node: NodeId) -> NodeId {
        if let Some(&mapped) = self.node_map.get(&callee_node) {
            return mapped;
        }
        let node = self.callee.arena.node(callee_node).clone();

        let mapped = match node.op {
            OpCode::Param(i) => {
                // Parameter positions map to call arguments.
                self.args
                    .get(i as usize)
                    .copied()
                    .unwrap_or_else(|| self.ir.arena.add(node.op, SmallVec::new(), node.ty))
            }
            _ => {
                let operands: SmallVec<[NodeId; 2]> = node
                    .operands
                    .iter()
                    .map(|&o| self.map_node(o))
                    .collect();
                let op = self.rename_symbols(node.op);
                self.ir.arena.add(op, operands, node.ty)
            }
        };
        self.node_map.insert(callee_node, mapped);
        mapped
    }

    fn rename_symbols(&mut self, op: OpCode) -> OpCode {
        match op {
            OpCode::LoadLocal(sym) => OpCode::LoadLocal(self.import_symbol(sym)),
            OpCode::StoreLocal(sym) => OpCode::StoreLocal(self.import_symbol(sym)),
            other => other,
        }
    }

    fn import_symbol(&mut self, callee_sym: SymbolId) -> SymbolId {
        if let Some(&mapped) = self.sym_map.get(&callee_sym) {
            return mapped;
        }
        let ty = self.callee.symbols.symbol(callee_sym).ty;
        let fresh = self.ir.symbols.new_temp(ty);
        self.sym_map.insert(callee_sym, fresh);
        fresh
    }
}
