//! Read-only VM metadata consumed by the optimizer.
//!
//! The registry answers class-shape, method-shape and trust queries. Every
//! lookup can fail "unknown" (ahead-of-time compilation without class
//! loading); callers treat unknown conservatively. Escape-safety trust
//! (which natives cannot leak an argument, which methods are known
//! non-escaping intrinsics, which factory calls are identity-cache
//! lookups) is registry *data* populated by the embedder, never name
//! matching inside the optimizer.

pub mod inline;
pub mod provider;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::types::{ClassId, MethodId, ValueType};

pub use inline::{Inliner, NullInliner, SpliceInliner};
pub use provider::{CachedIrProvider, IrProvider, MapIrProvider};

// =============================================================================
// Class Shapes
// =============================================================================

/// One instance field of a class layout.
#[derive(Debug, Clone)]
pub struct FieldShape {
    /// Field name.
    pub name: String,
    /// Byte offset from the object base.
    pub offset: u32,
    /// Field type.
    pub ty: ValueType,
}

/// Instance layout and escape-relevant flags of a loaded class.
#[derive(Debug, Clone)]
pub struct ClassShape {
    /// Class name.
    pub name: String,
    /// Instance size in bytes, header included.
    pub size: u32,
    /// Object header size in bytes.
    pub header_size: u32,
    /// Instance fields, offset-sorted.
    pub fields: Vec<FieldShape>,
    /// Direct superclass.
    pub super_class: Option<ClassId>,
    /// Value-type (identity-free) class.
    pub is_value_type: bool,
    /// Designated immutable class (cheaper compensation when referenced).
    pub is_immutable: bool,
    /// Implements the runnable marker interface (escape always possible).
    pub is_runnable: bool,
    /// Subclass of the weak/finalizable reference base.
    pub is_weak_reference: bool,
    /// Annotation-driven forced promotion.
    pub force_local: bool,
    /// Inline-allocation size the VM reports; `<= 0` means the class
    /// cannot be promoted (hidden initialization, hashed header, ...).
    pub promotable_size: i32,
}

impl ClassShape {
    /// A plain object class with the default 16-byte header.
    #[must_use]
    pub fn object(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
            header_size: 16,
            fields: Vec::new(),
            super_class: None,
            is_value_type: false,
            is_immutable: false,
            is_runnable: false,
            is_weak_reference: false,
            force_local: false,
            promotable_size: size as i32,
        }
    }

    /// Add a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, offset: u32, ty: ValueType) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            offset,
            ty,
        });
        self
    }

    /// Set the superclass.
    #[must_use]
    pub fn with_super(mut self, super_class: ClassId) -> Self {
        self.super_class = Some(super_class);
        self
    }

    /// Mark as a value type.
    #[must_use]
    pub fn value_type(mut self) -> Self {
        self.is_value_type = true;
        self
    }

    /// Mark as immutable.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.is_immutable = true;
        self
    }

    /// Mark as runnable.
    #[must_use]
    pub fn runnable(mut self) -> Self {
        self.is_runnable = true;
        self
    }

    /// Mark as a weak-reference subclass.
    #[must_use]
    pub fn weak_reference(mut self) -> Self {
        self.is_weak_reference = true;
        self
    }

    /// Mark as force-promoted by annotation.
    #[must_use]
    pub fn forced_local(mut self) -> Self {
        self.force_local = true;
        self
    }

    /// Mark as not promotable (inline-allocation check fails).
    #[must_use]
    pub fn not_promotable(mut self) -> Self {
        self.promotable_size = 0;
        self
    }

    /// The field declared at `offset`, if any.
    #[must_use]
    pub fn field_at(&self, offset: u32) -> Option<&FieldShape> {
        self.fields.iter().find(|f| f.offset == offset)
    }

    /// Whether `[offset, offset + size)` lies inside this instance.
    #[must_use]
    pub fn contains_range(&self, offset: u32, size: u32) -> bool {
        offset.checked_add(size).is_some_and(|end| end <= self.size)
    }

    /// Whether `offset` addresses the object header.
    #[must_use]
    pub fn is_header_offset(&self, offset: u32) -> bool {
        offset < self.header_size
    }

    /// Offsets of the reference-carrying instance fields.
    pub fn reference_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.fields
            .iter()
            .filter(|f| f.ty.is_reference())
            .map(|f| f.offset)
    }
}

// =============================================================================
// Method Shapes
// =============================================================================

/// How a method executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodImpl {
    /// Ordinary bytecode method.
    Bytecode,
    /// Native (JNI-style) method.
    Native,
}

/// Escape-relevant facts about a resolved method.
#[derive(Debug, Clone)]
pub struct MethodShape {
    /// Qualified name.
    pub name: String,
    /// Declaring class, when known.
    pub class: Option<ClassId>,
    /// Implementation kind.
    pub kind: MethodImpl,
    /// Bytecode size in bytes (0 for natives).
    pub bytecode_size: u32,
    /// Whether a virtual dispatch to this target may hit an override.
    pub overridable: bool,
}

impl MethodShape {
    /// An ordinary bytecode method.
    #[must_use]
    pub fn bytecode(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            class: None,
            kind: MethodImpl::Bytecode,
            bytecode_size: size,
            overridable: false,
        }
    }

    /// A native method.
    #[must_use]
    pub fn native(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: None,
            kind: MethodImpl::Native,
            bytecode_size: 0,
            overridable: false,
        }
    }

    /// Mark the target as overridable.
    #[must_use]
    pub fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }
}

// =============================================================================
// Identity caches
// =============================================================================

/// A boxed-primitive identity-cache factory and its constructor equivalent.
///
/// Calls to `factory` return a cached instance for small values; rewriting
/// the call to `new class` + `constructor` lets escape analysis reason
/// about it as an ordinary allocation.
#[derive(Debug, Clone, Copy)]
pub struct CacheFactory {
    /// The factory method (e.g. integer boxing).
    pub factory: MethodId,
    /// The boxed class.
    pub class: ClassId,
    /// The constructor taking the same arguments as the factory.
    pub constructor: MethodId,
}

// =============================================================================
// Registry
// =============================================================================

/// The VM's class/method registry as seen by the optimizer.
#[derive(Debug, Default)]
pub struct VmRegistry {
    classes: FxHashMap<ClassId, ClassShape>,
    methods: FxHashMap<MethodId, MethodShape>,
    cache_factories: FxHashMap<MethodId, CacheFactory>,
    trusted_native_args: FxHashSet<(MethodId, u32)>,
    trusted_non_escaping: FxHashSet<MethodId>,
}

impl VmRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class shape.
    pub fn register_class(&mut self, id: ClassId, shape: ClassShape) {
        self.classes.insert(id, shape);
    }

    /// Register a method shape.
    pub fn register_method(&mut self, id: MethodId, shape: MethodShape) {
        self.methods.insert(id, shape);
    }

    /// Register an identity-cache factory.
    pub fn register_cache_factory(&mut self, cache: CacheFactory) {
        self.cache_factories.insert(cache.factory, cache);
    }

    /// Record that `arg` of native `method` cannot escape through it.
    pub fn trust_native_arg(&mut self, method: MethodId, arg: u32) {
        self.trusted_native_args.insert((method, arg));
    }

    /// Record a trusted non-escaping intrinsic method.
    pub fn trust_method(&mut self, method: MethodId) {
        self.trusted_non_escaping.insert(method);
    }

    /// Class shape lookup (`None` = unknown, treat conservatively).
    #[must_use]
    pub fn class_shape(&self, id: ClassId) -> Option<&ClassShape> {
        self.classes.get(&id)
    }

    /// Method shape lookup.
    #[must_use]
    pub fn method_shape(&self, id: MethodId) -> Option<&MethodShape> {
        self.methods.get(&id)
    }

    /// Subtype test; `None` when either class is unknown.
    #[must_use]
    pub fn is_subtype_of(&self, sub: ClassId, sup: ClassId) -> Option<bool> {
        self.class_shape(sup)?;
        let mut cur = Some(sub);
        while let Some(c) = cur {
            if c == sup {
                return Some(true);
            }
            cur = self.class_shape(c)?.super_class;
        }
        Some(false)
    }

    /// Identity-cache factory for a call target, if registered.
    #[must_use]
    pub fn identity_cache(&self, method: MethodId) -> Option<&CacheFactory> {
        self.cache_factories.get(&method)
    }

    /// Whether the whitelist proves `arg` cannot escape through `method`.
    #[must_use]
    pub fn native_arg_never_escapes(&self, method: MethodId, arg: u32) -> bool {
        self.trusted_native_args.contains(&(method, arg))
    }

    /// Whether a method is in the trusted non-escaping intrinsic table.
    #[must_use]
    pub fn is_trusted_non_escaping(&self, method: MethodId) -> bool {
        self.trusted_non_escaping.contains(&method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_shape_builders() {
        let shape = ClassShape::object("Point", 24)
            .with_field("x", 16, ValueType::Int32)
            .with_field("y", 20, ValueType::Int32);

        assert_eq!(shape.size, 24);
        assert_eq!(shape.fields.len(), 2);
        assert!(shape.field_at(16).is_some());
        assert!(shape.field_at(17).is_none());
        assert!(shape.contains_range(16, 4));
        assert!(shape.contains_range(20, 4));
        assert!(!shape.contains_range(20, 8));
        assert!(shape.is_header_offset(8));
        assert!(!shape.is_header_offset(16));
    }

    #[test]
    fn test_reference_slots() {
        let shape = ClassShape::object("Node", 32)
            .with_field("next", 16, ValueType::Address)
            .with_field("value", 24, ValueType::Int64);

        let slots: Vec<u32> = shape.reference_slots().collect();
        assert_eq!(slots, vec![16]);
    }

    #[test]
    fn test_subtype_chain() {
        let mut reg = VmRegistry::new();
        reg.register_class(ClassId(0), ClassShape::object("Object", 16));
        reg.register_class(
            ClassId(1),
            ClassShape::object("Base", 24).with_super(ClassId(0)),
        );
        reg.register_class(
            ClassId(2),
            ClassShape::object("Derived", 32).with_super(ClassId(1)),
        );

        assert_eq!(reg.is_subtype_of(ClassId(2), ClassId(0)), Some(true));
        assert_eq!(reg.is_subtype_of(ClassId(2), ClassId(1)), Some(true));
        assert_eq!(reg.is_subtype_of(ClassId(0), ClassId(2)), Some(false));
        assert_eq!(reg.is_subtype_of(ClassId(2), ClassId(9)), None);
    }

    #[test]
    fn test_trust_tables() {
        let mut reg = VmRegistry::new();
        reg.trust_native_arg(MethodId(4), 0);
        reg.trust_method(MethodId(5));

        assert!(reg.native_arg_never_escapes(MethodId(4), 0));
        assert!(!reg.native_arg_never_escapes(MethodId(4), 1));
        assert!(reg.is_trusted_non_escaping(MethodId(5)));
        assert!(!reg.is_trusted_non_escaping(MethodId(4)));
    }

    #[test]
    fn test_identity_cache_lookup() {
        let mut reg = VmRegistry::new();
        reg.register_cache_factory(CacheFactory {
            factory: MethodId(10),
            class: ClassId(3),
            constructor: MethodId(11),
        });

        let cache = reg.identity_cache(MethodId(10)).unwrap();
        assert_eq!(cache.class, ClassId(3));
        assert_eq!(cache.constructor, MethodId(11));
        assert!(reg.identity_cache(MethodId(11)).is_none());
    }

    #[test]
    fn test_flags() {
        let shape = ClassShape::object("Task", 24).runnable();
        assert!(shape.is_runnable);

        let weak = ClassShape::object("WeakRef", 32).weak_reference();
        assert!(weak.is_weak_reference);

        let frozen = ClassShape::object("Str", 24).immutable();
        assert!(frozen.is_immutable);

        let bad = ClassShape::object("Odd", 24).not_promotable();
        assert!(bad.promotable_size <= 0);
    }
}
