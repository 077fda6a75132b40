//! Candidate allocations and their tracked state.
//!
//! One `Candidate` per eligible allocation site, created by discovery,
//! mutated by propagation and filtering, consumed by fixup. Candidate
//! indices are assigned in discovery order and never reused, so every
//! later dataflow pass can key bit-vectors on them.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::analysis::value_numbering::ValueNum;
use crate::ir::cfg::BlockId;
use crate::ir::node::NodeId;
use crate::ir::opcodes::{CallTarget, OpCode};
use crate::ir::stmt::StmtId;
use crate::ir::symbols::SymbolId;
use crate::ir::types::{ClassId, ValueType};

// =============================================================================
// Candidate Id
// =============================================================================

/// Dense candidate index, assigned in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateId(pub u32);

impl CandidateId {
    /// Raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cand{}", self.0)
    }
}

// =============================================================================
// Shape
// =============================================================================

/// Shape of the allocated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Plain object instance.
    Object,
    /// Value-type instance.
    ValueObject,
    /// Primitive array.
    PrimArray,
    /// Reference array.
    RefArray,
}

impl CandidateKind {
    /// Whether this is an array shape.
    #[inline]
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, CandidateKind::PrimArray | CandidateKind::RefArray)
    }
}

// =============================================================================
// Field Info
// =============================================================================

/// One tracked field/element slot of a candidate.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Byte offset from the object base.
    pub offset: u32,
    /// Slot size in bytes.
    pub size: u32,
    /// Slot value type.
    pub ty: ValueType,
    /// Vector lane index for packed sub-word slots.
    pub lane: Option<u8>,
    /// Access nodes proven to belong to the allocated type at this offset.
    pub good_refs: SmallVec<[NodeId; 4]>,
    /// Mismatched/derived-type access nodes; never trusted for rewriting.
    pub bad_refs: SmallVec<[NodeId; 2]>,
    /// Scalar temporary backing this slot (non-contiguous promotion);
    /// resolved lazily on first rewrite.
    pub backing: Option<SymbolId>,
}

impl FieldInfo {
    /// Create a slot record.
    #[must_use]
    pub fn new(offset: u32, size: u32, ty: ValueType) -> Self {
        let lane = if size < 4 {
            Some(((offset & 3) / size.max(1)) as u8)
        } else {
            None
        };
        Self {
            offset,
            size,
            ty,
            lane,
            good_refs: SmallVec::new(),
            bad_refs: SmallVec::new(),
            backing: None,
        }
    }

    /// Whether this slot has at least one trusted access.
    #[inline]
    #[must_use]
    pub fn has_good_refs(&self) -> bool {
        !self.good_refs.is_empty()
    }
}

// =============================================================================
// Cold-block escape record
// =============================================================================

/// A provably-rare escape point requiring a compensating heap copy.
#[derive(Debug, Clone)]
pub struct ColdEscape {
    /// The cold block containing the escape.
    pub block: BlockId,
    /// The escaping reference node.
    pub reference: NodeId,
    /// The escaping statement.
    pub stmt: StmtId,
}

// =============================================================================
// Inline obligation
// =============================================================================

/// A call site that must be inlined before the candidate can be finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineObligation {
    /// The call statement.
    pub stmt: StmtId,
    /// Callee bytes this obligation would add.
    pub cost: u32,
}

// =============================================================================
// Dememoization record
// =============================================================================

/// State needed to reverse a speculative identity-cache rewrite.
#[derive(Debug, Clone)]
pub struct DememoState {
    /// The node that held the factory call (recreated into the allocation).
    pub node: NodeId,
    /// Saved factory call target.
    pub saved_target: CallTarget,
    /// Saved factory arguments.
    pub saved_args: SmallVec<[NodeId; 2]>,
    /// Saved result type.
    pub saved_ty: ValueType,
    /// The synthesized constructor-call statement.
    pub ctor_stmt: StmtId,
}

// =============================================================================
// Disposition
// =============================================================================

/// Final decision for a candidate at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not promoted; the heap allocation stays.
    Rejected,
    /// Promoted; each tracked field becomes a scalar temporary.
    LocalNonContiguous,
    /// Promoted to a single stack-resident aggregate.
    LocalContiguous,
}

// =============================================================================
// Candidate
// =============================================================================

/// One allocation site under analysis.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Dense index (discovery order).
    pub id: CandidateId,
    /// The allocation node.
    pub node: NodeId,
    /// The enclosing statement.
    pub stmt: StmtId,
    /// The enclosing block.
    pub block: BlockId,
    /// Allocation shape.
    pub kind: CandidateKind,
    /// Resolved class (objects and reference arrays).
    pub class: Option<ClassId>,
    /// Element type (primitive arrays).
    pub elem: Option<ValueType>,
    /// Statically-known array length.
    pub array_length: Option<u32>,
    /// Total byte size.
    pub size: u32,
    /// Header size in bytes.
    pub header_size: u32,
    /// Value-number alias set; grows during analysis.
    pub alias: FxHashSet<ValueNum>,

    // --- disposition flags ---
    /// Still eligible for local allocation.
    pub is_local: bool,
    /// Must stay one addressable block. Monotonic within a pass.
    must_be_contiguous: bool,
    /// An object identity is observed somewhere.
    pub object_referenced: bool,
    /// All reference slots are explicitly initialized before any use.
    pub explicitly_initialized: bool,
    /// Allocation sits inside a loop.
    pub inside_a_loop: bool,
    /// Allocation sits in a cold block.
    pub in_cold_block: bool,
    /// Tracked only for allocation-size profiling; never promoted.
    pub profile_only: bool,
    /// Promotion forced by type annotation.
    pub force_local: bool,
    /// At least one cold-block escape was recorded.
    pub escapes_in_cold_blocks: bool,

    // --- interprocedural bookkeeping ---
    /// Call statements that must be inlined before final promotion.
    pub calls_to_inline: Vec<InlineObligation>,
    /// Promotion deferred to the next pass pending inlining.
    pub deferred: bool,
    /// Deepest peek performed on behalf of this candidate.
    pub max_sniff_depth: u32,
    /// Callee bytes charged against the global peek budget.
    pub peeked_bytes: u32,

    // --- dememoization bookkeeping ---
    /// Set when this candidate came from an identity-cache rewrite.
    pub dememo: Option<DememoState>,

    // --- fields and compensation ---
    /// Tracked slots, at most one per offset.
    pub fields: Vec<FieldInfo>,
    /// Cold-block escape records.
    pub cold_escapes: Vec<ColdEscape>,
    /// Monitor statements guarding this candidate.
    pub lock_stmts: Vec<StmtId>,
    /// Synchronized calls receiving this candidate; eligible for
    /// desynchronization when the candidate is promoted.
    pub sync_call_stmts: Vec<StmtId>,
    /// Publication-barrier statements guarding this candidate.
    pub fence_stmts: Vec<StmtId>,
    /// Statements where this candidate's value reaches an external sink.
    pub escape_stmts: Vec<StmtId>,

    // --- fixup output ---
    /// Stack-aggregate symbol (contiguous promotion).
    pub backing: Option<SymbolId>,
}

impl Candidate {
    /// Create a candidate in its initial state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CandidateId,
        node: NodeId,
        stmt: StmtId,
        block: BlockId,
        kind: CandidateKind,
        size: u32,
        header_size: u32,
    ) -> Self {
        Self {
            id,
            node,
            stmt,
            block,
            kind,
            class: None,
            elem: None,
            array_length: None,
            size,
            header_size,
            alias: FxHashSet::default(),
            is_local: true,
            must_be_contiguous: false,
            object_referenced: false,
            explicitly_initialized: false,
            inside_a_loop: false,
            in_cold_block: false,
            profile_only: false,
            force_local: false,
            escapes_in_cold_blocks: false,
            calls_to_inline: Vec::new(),
            deferred: false,
            max_sniff_depth: 0,
            peeked_bytes: 0,
            dememo: None,
            fields: Vec::new(),
            cold_escapes: Vec::new(),
            lock_stmts: Vec::new(),
            sync_call_stmts: Vec::new(),
            fence_stmts: Vec::new(),
            escape_stmts: Vec::new(),
            backing: None,
        }
    }

    /// Whether the candidate must stay contiguous.
    #[inline]
    #[must_use]
    pub fn must_be_contiguous(&self) -> bool {
        self.must_be_contiguous
    }

    /// Restrict the candidate to contiguous promotion. There is no way to
    /// clear this within a pass.
    pub fn set_contiguous(&mut self) {
        self.must_be_contiguous = true;
    }

    /// Drop the candidate from local allocation.
    pub fn reject(&mut self) {
        self.is_local = false;
    }

    /// Whether a value number belongs to this candidate's alias set.
    #[inline]
    #[must_use]
    pub fn is_alias(&self, vn: ValueNum) -> bool {
        self.alias.contains(&vn)
    }

    /// The slot recorded at `offset`, if any.
    #[must_use]
    pub fn field_at(&self, offset: u32) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.offset == offset)
    }

    /// Mutable access to the slot recorded at `offset`.
    pub fn field_at_mut(&mut self, offset: u32) -> Option<&mut FieldInfo> {
        self.fields.iter_mut().find(|f| f.offset == offset)
    }

    /// Record (or retrieve) the slot at `offset`. At most one `FieldInfo`
    /// exists per offset; the first recording pins size and type.
    pub fn remember_field(&mut self, offset: u32, size: u32, ty: ValueType) -> &mut FieldInfo {
        if let Some(pos) = self.fields.iter().position(|f| f.offset == offset) {
            return &mut self.fields[pos];
        }
        self.fields.push(FieldInfo::new(offset, size, ty));
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    /// Sum of tracked trusted slot sizes (the non-contiguous footprint).
    #[must_use]
    pub fn tracked_field_bytes(&self) -> u32 {
        self.fields
            .iter()
            .filter(|f| f.has_good_refs())
            .map(|f| f.size)
            .sum()
    }

    /// Bytes this candidate charges against the aggregate budget.
    #[must_use]
    pub fn budget_bytes(&self) -> u32 {
        if self.must_be_contiguous {
            self.size
        } else {
            self.tracked_field_bytes()
        }
    }

    /// Final decision for this candidate as currently flagged.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        if !self.is_local || self.profile_only {
            Disposition::Rejected
        } else if self.must_be_contiguous {
            Disposition::LocalContiguous
        } else {
            Disposition::LocalNonContiguous
        }
    }

    /// Whether the allocation opcode still matches this candidate.
    #[must_use]
    pub fn matches_node(&self, op: &OpCode) -> bool {
        op.is_allocation() && (self.class.is_none() || op.allocated_class() == self.class)
    }
}

// =============================================================================
// Candidate Set
// =============================================================================

/// All candidates of one analysis pass, in discovery order.
#[derive(Debug, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the set is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Reserve the next id (discovery order).
    #[must_use]
    pub fn next_id(&self) -> CandidateId {
        CandidateId(self.candidates.len() as u32)
    }

    /// Add a candidate created with [`CandidateSet::next_id`].
    pub fn push(&mut self, candidate: Candidate) -> CandidateId {
        debug_assert_eq!(candidate.id.index(), self.candidates.len());
        let id = candidate.id;
        self.candidates.push(candidate);
        id
    }

    /// Borrow a candidate.
    #[inline]
    #[must_use]
    pub fn get(&self, id: CandidateId) -> &Candidate {
        &self.candidates[id.index()]
    }

    /// Borrow a candidate mutably.
    #[inline]
    pub fn get_mut(&mut self, id: CandidateId) -> &mut Candidate {
        &mut self.candidates[id.index()]
    }

    /// Iterate candidates in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    /// Iterate candidates mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Candidate> {
        self.candidates.iter_mut()
    }

    /// Candidate ids in discovery order.
    pub fn ids(&self) -> impl Iterator<Item = CandidateId> {
        (0..self.candidates.len() as u32).map(CandidateId)
    }

    /// The candidate whose alias set contains `vn`, if any.
    #[must_use]
    pub fn find_by_alias(&self, vn: ValueNum) -> Option<CandidateId> {
        self.candidates
            .iter()
            .find(|c| c.is_alias(vn))
            .map(|c| c.id)
    }

    /// The candidate owning an allocation node.
    #[must_use]
    pub fn find_by_node(&self, node: NodeId) -> Option<CandidateId> {
        self.candidates
            .iter()
            .find(|c| c.node == node)
            .map(|c| c.id)
    }
}
