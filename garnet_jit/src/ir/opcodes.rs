//! IR opcodes.
//!
//! Every IR node carries one `OpCode`, a tagged variant with a small set
//! of payload shapes (memory access, call, allocation, control, barrier).
//! Changing a node's kind is done by rebuilding the variant value at the
//! same arena slot, never by mutating a hidden tag.

use super::types::{ClassId, MethodId, StaticId, ValueType};
use crate::ir::cfg::BlockId;
use crate::ir::symbols::SymbolId;

// =============================================================================
// Payloads
// =============================================================================

/// A (possibly unresolved) instance-field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Class declaring the field, as far as resolution got.
    pub declaring: ClassId,
    /// Byte offset from the object base (header included).
    pub offset: u32,
    /// Field value type.
    pub ty: ValueType,
    /// Whether resolution completed. Unresolved references keep the
    /// symbolic offset the verifier assigned and may not be trusted.
    pub resolved: bool,
}

impl FieldRef {
    /// Field size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u32 {
        self.ty.byte_size()
    }
}

/// How a call site dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Static or special (non-virtual) dispatch; target is exact.
    Direct,
    /// Virtual/interface dispatch; target is the declared method.
    Virtual,
    /// Native (JNI-style) call.
    Native,
    /// Target unresolved at compile time.
    Unresolved,
}

/// A call site target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTarget {
    /// The resolved (or declared) callee.
    pub method: MethodId,
    /// Dispatch kind.
    pub kind: CallKind,
    /// Whether the declared target is `synchronized`.
    pub synchronized: bool,
    /// Marked by escape analysis: the lock in the callee guards a value
    /// proven method-local, so inlining may elide it.
    pub desynchronized: bool,
}

impl CallTarget {
    /// A plain direct call.
    #[must_use]
    pub fn direct(method: MethodId) -> Self {
        Self {
            method,
            kind: CallKind::Direct,
            synchronized: false,
            desynchronized: false,
        }
    }

    /// A virtual call.
    #[must_use]
    pub fn virtual_(method: MethodId) -> Self {
        Self {
            method,
            kind: CallKind::Virtual,
            synchronized: false,
            desynchronized: false,
        }
    }
}

// =============================================================================
// OpCode
// =============================================================================

/// The kind (and immediate payload) of one IR node.
///
/// Operand counts are conventions enforced by the builder:
/// loads take `[base]` (+ `[index]` for elements), stores additionally take
/// the value last, calls take their arguments in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // --- constants and parameters ---
    /// Integer constant.
    ConstInt(i64),
    /// Null reference constant.
    ConstNull,
    /// Incoming parameter.
    Param(u32),

    // --- local variables ---
    /// Read a local/temp symbol.
    LoadLocal(SymbolId),
    /// Write a local/temp symbol. Operands: `[value]`.
    StoreLocal(SymbolId),

    // --- object memory ---
    /// Indirect field read. Operands: `[base]`.
    LoadField(FieldRef),
    /// Indirect field write. Operands: `[base, value]`.
    StoreField(FieldRef),
    /// Static read.
    LoadStatic(StaticId),
    /// Static write. Operands: `[value]`.
    StoreStatic(StaticId),
    /// Array element read. Operands: `[base, index]`.
    LoadElement(ValueType),
    /// Array element write. Operands: `[base, index, value]`.
    StoreElement(ValueType),
    /// Interior-address derivation (element/field address arithmetic).
    /// Operands: `[base, byte_offset]`.
    AddressOf,
    /// Raw (unsafe) memory read of the given width. Operands: `[addr]`.
    RawLoad(u32),
    /// Raw (unsafe) memory write. Operands: `[addr, value]`.
    RawStore(u32),

    // --- allocation ---
    /// Heap-allocate a plain object instance.
    NewObject(ClassId),
    /// Heap-allocate a value-type instance.
    NewValue(ClassId),
    /// Heap-allocate a primitive array. Operands: `[length]`.
    NewArray(ValueType),
    /// Heap-allocate a reference array. Operands: `[length]`.
    NewRefArray(ClassId),

    // --- calls ---
    /// Call. Operands: the arguments (receiver first for instance calls).
    Call(CallTarget),

    // --- control ---
    /// Return void.
    Return,
    /// Return a value. Operands: `[value]`.
    ReturnValue,
    /// Throw. Operands: `[exception]`.
    Throw,
    /// Unconditional jump.
    Goto(BlockId),
    /// Conditional jump (taken when the operand is non-zero).
    /// Operands: `[cond]`. Fall-through is the next block in layout order.
    Branch(BlockId),

    // --- compares and type tests ---
    /// Reference/integer equality. Operands: `[a, b]`.
    CmpEq,
    /// Reference/integer inequality. Operands: `[a, b]`.
    CmpNe,
    /// Dynamic type test. Operands: `[object]`.
    InstanceOf(ClassId),
    /// Checked cast (traps on failure). Operands: `[object]`.
    CheckCast(ClassId),

    // --- synchronization and ordering ---
    /// Acquire an object monitor. Operands: `[object]`.
    MonitorEnter,
    /// Release an object monitor. Operands: `[object]`.
    MonitorExit,
    /// Publication barrier after allocation+initialization.
    /// Operands: `[object]`.
    AllocationFence,

    // --- misc ---
    /// Bulk copy. Operands: `[src, src_off, dst, dst_off, len]`.
    ArrayCopy,
    /// Array length read. Operands: `[base]`.
    ArrayLength,
    /// Width conversion. Operands: `[value]`.
    Convert {
        /// Source width.
        from: ValueType,
        /// Destination width.
        to: ValueType,
    },
}

impl OpCode {
    /// Whether this node allocates on the heap.
    #[inline]
    #[must_use]
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            OpCode::NewObject(_)
                | OpCode::NewValue(_)
                | OpCode::NewArray(_)
                | OpCode::NewRefArray(_)
        )
    }

    /// The allocated class, for object-shaped allocations.
    #[inline]
    #[must_use]
    pub fn allocated_class(&self) -> Option<ClassId> {
        match self {
            OpCode::NewObject(c) | OpCode::NewValue(c) | OpCode::NewRefArray(c) => Some(*c),
            _ => None,
        }
    }

    /// Whether this node is a call.
    #[inline]
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, OpCode::Call(_))
    }

    /// Whether this node reads through a reference.
    #[inline]
    #[must_use]
    pub fn is_indirect_load(&self) -> bool {
        matches!(self, OpCode::LoadField(_) | OpCode::LoadElement(_))
    }

    /// Whether this node writes through a reference.
    #[inline]
    #[must_use]
    pub fn is_indirect_store(&self) -> bool {
        matches!(self, OpCode::StoreField(_) | OpCode::StoreElement(_))
    }

    /// Whether this node ends a block.
    #[inline]
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpCode::Return
                | OpCode::ReturnValue
                | OpCode::Throw
                | OpCode::Goto(_)
                | OpCode::Branch(_)
        )
    }

    /// Whether this node produces a value usable as an operand.
    #[inline]
    #[must_use]
    pub fn produces_value(&self) -> bool {
        !matches!(
            self,
            OpCode::StoreLocal(_)
                | OpCode::StoreField(_)
                | OpCode::StoreStatic(_)
                | OpCode::StoreElement(_)
                | OpCode::RawStore(_)
                | OpCode::Return
                | OpCode::ReturnValue
                | OpCode::Throw
                | OpCode::Goto(_)
                | OpCode::Branch(_)
                | OpCode::MonitorEnter
                | OpCode::MonitorExit
                | OpCode::AllocationFence
                | OpCode::ArrayCopy
        )
    }

    /// Short mnemonic for tracing.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpCode::ConstInt(_) => "iconst",
            OpCode::ConstNull => "aconst_null",
            OpCode::Param(_) => "param",
            OpCode::LoadLocal(_) => "load",
            OpCode::StoreLocal(_) => "store",
            OpCode::LoadField(_) => "getfield",
            OpCode::StoreField(_) => "putfield",
            OpCode::LoadStatic(_) => "getstatic",
            OpCode::StoreStatic(_) => "putstatic",
            OpCode::LoadElement(_) => "aload_elem",
            OpCode::StoreElement(_) => "astore_elem",
            OpCode::AddressOf => "addr",
            OpCode::RawLoad(_) => "rawload",
            OpCode::RawStore(_) => "rawstore",
            OpCode::NewObject(_) => "new",
            OpCode::NewValue(_) => "newvalue",
            OpCode::NewArray(_) => "newarray",
            OpCode::NewRefArray(_) => "anewarray",
            OpCode::Call(_) => "call",
            OpCode::Return => "return",
            OpCode::ReturnValue => "vreturn",
            OpCode::Throw => "athrow",
            OpCode::Goto(_) => "goto",
            OpCode::Branch(_) => "branch",
            OpCode::CmpEq => "cmpeq",
            OpCode::CmpNe => "cmpne",
            OpCode::InstanceOf(_) => "instanceof",
            OpCode::CheckCast(_) => "checkcast",
            OpCode::MonitorEnter => "monenter",
            OpCode::MonitorExit => "monexit",
            OpCode::AllocationFence => "allocfence",
            OpCode::ArrayCopy => "arraycopy",
            OpCode::ArrayLength => "arraylength",
            OpCode::Convert { .. } => "conv",
        }
    }
}
