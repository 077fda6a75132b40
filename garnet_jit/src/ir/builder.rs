//! Convenience builder for method IR.
//!
//! Used by the bytecode translator, by tests phrasing IR shapes directly,
//! and by the peek provider when registering callee bodies.

use smallvec::SmallVec;

use super::cfg::{BlockId, BlockKind};
use super::method::MethodIr;
use super::node::NodeId;
use super::opcodes::{CallTarget, FieldRef, OpCode};
use super::stmt::StmtId;
use super::symbols::{SymbolId, SymbolKind};
use super::types::{ClassId, MethodId, StaticId, ValueType};

/// Make a resolved field reference.
#[must_use]
pub fn field(declaring: ClassId, offset: u32, ty: ValueType) -> FieldRef {
    FieldRef {
        declaring,
        offset,
        ty,
        resolved: true,
    }
}

/// Make an unresolved field reference.
#[must_use]
pub fn unresolved_field(declaring: ClassId, offset: u32, ty: ValueType) -> FieldRef {
    FieldRef {
        declaring,
        offset,
        ty,
        resolved: false,
    }
}

/// Incremental builder over a [`MethodIr`].
#[derive(Debug)]
pub struct IrBuilder {
    ir: MethodIr,
    cur: BlockId,
    bci: u32,
}

impl IrBuilder {
    /// Start building a method body.
    #[must_use]
    pub fn new(method: MethodId, name: impl Into<String>, num_params: u32) -> Self {
        let ir = MethodIr::new(method, name, num_params);
        let cur = ir.cfg.entry();
        Self { ir, cur, bci: 0 }
    }

    /// Record the originating bytecode size.
    pub fn set_bytecode_size(&mut self, size: u32) {
        self.ir.bytecode_size = size;
    }

    /// Set the bytecode index attached to subsequently appended statements.
    pub fn set_bci(&mut self, bci: u32) {
        self.bci = bci;
    }

    /// The block statements are currently appended to.
    #[inline]
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.cur
    }

    /// Add a normal block with a default hot frequency.
    pub fn add_block(&mut self) -> BlockId {
        self.ir.cfg.add_block(BlockKind::Normal, 10_000)
    }

    /// Add a normal block with an explicit frequency.
    pub fn add_block_with_frequency(&mut self, frequency: u32) -> BlockId {
        self.ir.cfg.add_block(BlockKind::Normal, frequency)
    }

    /// Add a catch-handler block (cold by construction).
    pub fn add_catch_block(&mut self) -> BlockId {
        self.ir.cfg.add_block(BlockKind::CatchHandler, 1)
    }

    /// Switch statement appending to `block`.
    pub fn select(&mut self, block: BlockId) {
        self.cur = block;
    }

    /// Add a CFG edge.
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        self.ir.cfg.add_edge(from, to);
    }

    /// Declare a named local.
    pub fn local(&mut self, name: impl Into<String>, ty: ValueType) -> SymbolId {
        self.ir.symbols.add(name, ty, SymbolKind::Local)
    }

    // =========================================================================
    // Value nodes
    // =========================================================================

    /// Integer constant node.
    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.ir
            .arena
            .add(OpCode::ConstInt(value), SmallVec::new(), ValueType::Int64)
    }

    /// Null constant node.
    pub fn const_null(&mut self) -> NodeId {
        self.ir
            .arena
            .add(OpCode::ConstNull, SmallVec::new(), ValueType::Address)
    }

    /// Parameter node.
    pub fn param(&mut self, index: u32, ty: ValueType) -> NodeId {
        self.ir.arena.add(OpCode::Param(index), SmallVec::new(), ty)
    }

    /// Local read node.
    pub fn load_local(&mut self, sym: SymbolId) -> NodeId {
        let ty = self.ir.symbols.symbol(sym).ty;
        self.ir.arena.add(OpCode::LoadLocal(sym), SmallVec::new(), ty)
    }

    /// Object allocation node.
    pub fn new_object(&mut self, class: ClassId) -> NodeId {
        self.ir
            .arena
            .add(OpCode::NewObject(class), SmallVec::new(), ValueType::Address)
    }

    /// Value-type allocation node.
    pub fn new_value(&mut self, class: ClassId) -> NodeId {
        self.ir
            .arena
            .add(OpCode::NewValue(class), SmallVec::new(), ValueType::Address)
    }

    /// Primitive-array allocation node.
    pub fn new_array(&mut self, elem: ValueType, length: NodeId) -> NodeId {
        self.ir.arena.add(
            OpCode::NewArray(elem),
            SmallVec::from_slice(&[length]),
            ValueType::Address,
        )
    }

    /// Reference-array allocation node.
    pub fn new_ref_array(&mut self, class: ClassId, length: NodeId) -> NodeId {
        self.ir.arena.add(
            OpCode::NewRefArray(class),
            SmallVec::from_slice(&[length]),
            ValueType::Address,
        )
    }

    /// Field read node.
    pub fn load_field(&mut self, base: NodeId, fr: FieldRef) -> NodeId {
        self.ir
            .arena
            .add(OpCode::LoadField(fr), SmallVec::from_slice(&[base]), fr.ty)
    }

    /// Static read node.
    pub fn load_static(&mut self, sid: StaticId, ty: ValueType) -> NodeId {
        self.ir
            .arena
            .add(OpCode::LoadStatic(sid), SmallVec::new(), ty)
    }

    /// Element read node.
    pub fn load_element(&mut self, base: NodeId, index: NodeId, elem: ValueType) -> NodeId {
        self.ir.arena.add(
            OpCode::LoadElement(elem),
            SmallVec::from_slice(&[base, index]),
            elem,
        )
    }

    /// Interior-address node.
    pub fn address_of(&mut self, base: NodeId, byte_offset: NodeId) -> NodeId {
        self.ir.arena.add(
            OpCode::AddressOf,
            SmallVec::from_slice(&[base, byte_offset]),
            ValueType::Address,
        )
    }

    /// Call node.
    pub fn call(&mut self, target: CallTarget, args: &[NodeId], ret: ValueType) -> NodeId {
        self.ir
            .arena
            .add(OpCode::Call(target), SmallVec::from_slice(args), ret)
    }

    /// Equality compare node.
    pub fn cmp_eq(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.ir
            .arena
            .add(OpCode::CmpEq, SmallVec::from_slice(&[a, b]), ValueType::Int32)
    }

    /// Inequality compare node.
    pub fn cmp_ne(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.ir
            .arena
            .add(OpCode::CmpNe, SmallVec::from_slice(&[a, b]), ValueType::Int32)
    }

    /// `instanceof` node.
    pub fn instance_of(&mut self, object: NodeId, class: ClassId) -> NodeId {
        self.ir.arena.add(
            OpCode::InstanceOf(class),
            SmallVec::from_slice(&[object]),
            ValueType::Int32,
        )
    }

    /// Checked-cast node.
    pub fn check_cast(&mut self, object: NodeId, class: ClassId) -> NodeId {
        self.ir.arena.add(
            OpCode::CheckCast(class),
            SmallVec::from_slice(&[object]),
            ValueType::Address,
        )
    }

    /// Array-length node.
    pub fn array_length(&mut self, base: NodeId) -> NodeId {
        self.ir.arena.add(
            OpCode::ArrayLength,
            SmallVec::from_slice(&[base]),
            ValueType::Int32,
        )
    }

    /// Width-conversion node.
    pub fn convert(&mut self, value: NodeId, from: ValueType, to: ValueType) -> NodeId {
        self.ir.arena.add(
            OpCode::Convert { from, to },
            SmallVec::from_slice(&[value]),
            to,
        )
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Append an arbitrary statement rooted at `root`.
    pub fn stmt(&mut self, root: NodeId) -> StmtId {
        self.ir.append_stmt(self.cur, root, self.bci)
    }

    /// `store_local` statement.
    pub fn store_local(&mut self, sym: SymbolId, value: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::StoreLocal(sym),
            SmallVec::from_slice(&[value]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// `store_field` statement.
    pub fn store_field(&mut self, base: NodeId, fr: FieldRef, value: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::StoreField(fr),
            SmallVec::from_slice(&[base, value]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// `store_static` statement.
    pub fn store_static(&mut self, sid: StaticId, value: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::StoreStatic(sid),
            SmallVec::from_slice(&[value]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// `store_element` statement.
    pub fn store_element(
        &mut self,
        base: NodeId,
        index: NodeId,
        value: NodeId,
        elem: ValueType,
    ) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::StoreElement(elem),
            SmallVec::from_slice(&[base, index, value]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Void-return statement.
    pub fn ret(&mut self) -> StmtId {
        let root = self
            .ir
            .arena
            .add(OpCode::Return, SmallVec::new(), ValueType::Void);
        self.stmt(root)
    }

    /// Value-return statement.
    pub fn ret_value(&mut self, value: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::ReturnValue,
            SmallVec::from_slice(&[value]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Throw statement.
    pub fn throw(&mut self, exception: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::Throw,
            SmallVec::from_slice(&[exception]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Unconditional jump statement (adds the CFG edge).
    pub fn goto(&mut self, target: BlockId) -> StmtId {
        self.ir.cfg.add_edge(self.cur, target);
        let root = self
            .ir
            .arena
            .add(OpCode::Goto(target), SmallVec::new(), ValueType::Void);
        self.stmt(root)
    }

    /// Conditional jump statement (adds the taken edge only).
    pub fn branch(&mut self, cond: NodeId, target: BlockId) -> StmtId {
        self.ir.cfg.add_edge(self.cur, target);
        let root = self.ir.arena.add(
            OpCode::Branch(target),
            SmallVec::from_slice(&[cond]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Monitor-enter statement.
    pub fn monitor_enter(&mut self, object: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::MonitorEnter,
            SmallVec::from_slice(&[object]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Monitor-exit statement.
    pub fn monitor_exit(&mut self, object: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::MonitorExit,
            SmallVec::from_slice(&[object]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Allocation-fence statement.
    pub fn allocation_fence(&mut self, object: NodeId) -> StmtId {
        let root = self.ir.arena.add(
            OpCode::AllocationFence,
            SmallVec::from_slice(&[object]),
            ValueType::Void,
        );
        self.stmt(root)
    }

    /// Finish and return the built method body.
    #[must_use]
    pub fn finish(self) -> MethodIr {
        self.ir
    }
}
