//! Value numbering.
//!
//! Assigns every node in the attached statement list an equivalence-class
//! number. Pure expressions hash-cons on (opcode payload, operand numbers);
//! a local-variable load takes the number of its reaching store when that
//! is unique, or a per-(block, symbol) merge number when control flow joins
//! disagree. Loads through memory, calls and allocations are opaque: one
//! number per node.
//!
//! The escape pass keys all of its alias tracking on these numbers: an
//! allocation's number, plus every merge number any of its numbers flows
//! into, forms the allocation's alias set.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::dominators::reverse_postorder;
use crate::ir::cfg::BlockId;
use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::OpCode;
use crate::ir::symbols::SymbolId;

// =============================================================================
// Value Number
// =============================================================================

/// An equivalence-class identifier for IR values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueNum(pub u32);

impl std::fmt::Display for ValueNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Hash-consing key for number assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExprKey {
    /// Pure expression: opcode payload plus operand numbers.
    Pure(OpCode, SmallVec<[ValueNum; 2]>),
    /// Load of a never-stored local.
    Uninit(SymbolId),
    /// Join of disagreeing reaching stores at a block entry.
    Merge(BlockId, SymbolId),
    /// Non-pure node: one number per node identity.
    Opaque(NodeId),
}

// =============================================================================
// Value Numbering
// =============================================================================

/// Value numbers for one method body.
#[derive(Debug)]
pub struct ValueNumbering {
    node_vn: FxHashMap<NodeId, ValueNum>,
    occurrences: FxHashMap<ValueNum, Vec<NodeId>>,
    merges: FxHashMap<ValueNum, Vec<ValueNum>>,
}

impl ValueNumbering {
    /// Compute value numbers for all attached statements.
    #[must_use]
    pub fn compute(ir: &MethodIr) -> Self {
        Computation::new(ir).run()
    }

    /// Number of a node, if it appears in an attached statement.
    #[inline]
    #[must_use]
    pub fn value_number(&self, node: NodeId) -> Option<ValueNum> {
        self.node_vn.get(&node).copied()
    }

    /// All nodes carrying a number, in statement order.
    #[must_use]
    pub fn nodes_with_value(&self, vn: ValueNum) -> &[NodeId] {
        self.occurrences.get(&vn).map_or(&[], Vec::as_slice)
    }

    /// Cyclic iteration over same-numbered occurrences.
    #[must_use]
    pub fn next_with_same_value(&self, node: NodeId) -> Option<NodeId> {
        let vn = self.value_number(node)?;
        let occ = self.occurrences.get(&vn)?;
        let pos = occ.iter().position(|&n| n == node)?;
        Some(occ[(pos + 1) % occ.len()])
    }

    /// Input numbers of a merge number (empty for non-merges).
    #[must_use]
    pub fn merged_inputs(&self, vn: ValueNum) -> &[ValueNum] {
        self.merges.get(&vn).map_or(&[], Vec::as_slice)
    }

    /// Iterate every merge number with its input numbers.
    pub fn merge_numbers(&self) -> impl Iterator<Item = (ValueNum, &[ValueNum])> {
        self.merges.iter().map(|(&vn, inputs)| (vn, inputs.as_slice()))
    }

    /// Total distinct numbers assigned.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.occurrences.len()
    }
}

// =============================================================================
// Computation
// =============================================================================

type Env = FxHashMap<SymbolId, ValueNum>;

struct Computation<'a> {
    ir: &'a MethodIr,
    keys: FxHashMap<ExprKey, ValueNum>,
    next: u32,
    node_vn: FxHashMap<NodeId, ValueNum>,
    merges: FxHashMap<ValueNum, Vec<ValueNum>>,
    entry_env: FxHashMap<BlockId, Env>,
    exit_env: FxHashMap<BlockId, Env>,
}

impl<'a> Computation<'a> {
    fn new(ir: &'a MethodIr) -> Self {
        Self {
            ir,
            keys: FxHashMap::default(),
            next: 0,
            node_vn: FxHashMap::default(),
            merges: FxHashMap::default(),
            entry_env: FxHashMap::default(),
            exit_env: FxHashMap::default(),
        }
    }

    fn run(mut self) -> ValueNumbering {
        let rpo = reverse_postorder(&self.ir.cfg);

        loop {
            let mut changed = false;
            for &block in &rpo {
                let env = self.merge_entry(block);
                if self.entry_env.get(&block) != Some(&env) {
                    changed = true;
                    self.entry_env.insert(block, env.clone());
                }
                let exit = self.walk_block(block, env);
                if self.exit_env.get(&block) != Some(&exit) {
                    changed = true;
                    self.exit_env.insert(block, exit);
                }
            }
            if !changed {
                break;
            }
        }

        // Final occurrence lists, in statement order.
        let mut occurrences: FxHashMap<ValueNum, Vec<NodeId>> = FxHashMap::default();
        for sid in self.ir.stmt_ids_in_block_order() {
            let root = self.ir.stmt(sid).root;
            self.ir.arena.for_each_postorder(root, &mut |id, _| {
                if let Some(&vn) = self.node_vn.get(&id) {
                    let occ = occurrences.entry(vn).or_default();
                    if !occ.contains(&id) {
                        occ.push(id);
                    }
                }
            });
        }

        ValueNumbering {
            node_vn: self.node_vn,
            occurrences,
            merges: self.merges,
        }
    }

    fn number_for(&mut self, key: ExprKey) -> ValueNum {
        if let Some(&vn) = self.keys.get(&key) {
            return vn;
        }
        let vn = ValueNum(self.next);
        self.next += 1;
        self.keys.insert(key, vn);
        vn
    }

    /// Merge predecessor exit environments at a block entry.
    fn merge_entry(&mut self, block: BlockId) -> Env {
        let preds: Vec<BlockId> = self.ir.cfg.block(block).preds.to_vec();
        if preds.is_empty() {
            return Env::default();
        }

        // Symbols known in at least one predecessor.
        let mut symbols: Vec<SymbolId> = Vec::new();
        for &p in &preds {
            if let Some(env) = self.exit_env.get(&p) {
                for &sym in env.keys() {
                    if !symbols.contains(&sym) {
                        symbols.push(sym);
                    }
                }
            }
        }
        symbols.sort_unstable();

        let mut env = Env::default();
        for sym in symbols {
            let mut inputs: SmallVec<[ValueNum; 4]> = SmallVec::new();
            for &p in &preds {
                let known = self.exit_env.get(&p).and_then(|e| e.get(&sym)).copied();
                let vn = match known {
                    Some(vn) => vn,
                    None => self.number_for(ExprKey::Uninit(sym)),
                };
                if !inputs.contains(&vn) {
                    inputs.push(vn);
                }
            }
            let vn = if inputs.len() == 1 {
                inputs[0]
            } else {
                let merged = self.number_for(ExprKey::Merge(block, sym));
                let list = self.merges.entry(merged).or_default();
                for &input in &inputs {
                    if input != merged && !list.contains(&input) {
                        list.push(input);
                    }
                }
                merged
            };
            env.insert(sym, vn);
        }
        env
    }

    /// Number every node of the block's statements; returns the exit env.
    fn walk_block(&mut self, block: BlockId, mut env: Env) -> Env {
        let stmts: Vec<_> = self.ir.cfg.block(block).stmts.clone();
        for sid in stmts {
            let root = self.ir.stmt(sid).root;
            for id in self.ir.arena.postorder(root) {
                let node = self.ir.arena.node(id);
                let vn = match node.op {
                    OpCode::ConstInt(_)
                    | OpCode::ConstNull
                    | OpCode::Param(_)
                    | OpCode::CmpEq
                    | OpCode::CmpNe
                    | OpCode::Convert { .. }
                    | OpCode::AddressOf
                    | OpCode::ArrayLength
                    | OpCode::InstanceOf(_) => {
                        let operand_vns: SmallVec<[ValueNum; 2]> = node
                            .operands
                            .iter()
                            .map(|&o| {
                                self.node_vn
                                    .get(&o)
                                    .copied()
                                    .unwrap_or_else(|| self.fresh_opaque(o))
                            })
                            .collect();
                        self.number_for(ExprKey::Pure(node.op, operand_vns))
                    }
                    OpCode::LoadLocal(sym) => match env.get(&sym) {
                        Some(&vn) => vn,
                        None => self.number_for(ExprKey::Uninit(sym)),
                    },
                    _ => self.number_for(ExprKey::Opaque(id)),
                };
                self.node_vn.insert(id, vn);
            }

            // Store effects apply after the whole tree evaluated.
            let root_node = self.ir.arena.node(root);
            if let OpCode::StoreLocal(sym) = root_node.op {
                if let Some(value) = root_node.operand(0) {
                    if let Some(&vn) = self.node_vn.get(&value) {
                        env.insert(sym, vn);
                    }
                }
            }
        }
        env
    }

    fn fresh_opaque(&mut self, node: NodeId) -> ValueNum {
        self.number_for(ExprKey::Opaque(node))
    }
}
