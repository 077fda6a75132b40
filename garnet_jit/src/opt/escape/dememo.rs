//! Identity-cache dememoization.
//!
//! A call to a boxed-primitive identity-cache factory returns a shared
//! cached instance, which escape analysis cannot reason about. When the
//! registry knows a constructor equivalent, the call is speculatively
//! rewritten into an explicit allocation plus a constructor call, recording
//! enough state to reverse the rewrite ("rememoize") if the replacement
//! turns out to escape in ways the cached instance would not have.

use smallvec::SmallVec;

use crate::ir::method::MethodIr;
use crate::ir::node::NodeId;
use crate::ir::opcodes::{CallTarget, OpCode};
use crate::ir::stmt::StmtId;
use crate::ir::types::ValueType;
use crate::meta::VmRegistry;

use super::candidates::DememoState;

/// Rewrite an identity-cache factory call into allocation + constructor.
///
/// `call_node` must be a `Call` whose target is a registered cache factory;
/// `stmt` is its enclosing statement. Returns the reversal record, or
/// `None` when the call is not a cache factory.
pub fn try_dememoize(
    ir: &mut MethodIr,
    meta: &VmRegistry,
    stmt: StmtId,
    call_node: NodeId,
) -> Option<DememoState> {
    let node = ir.arena.node(call_node).clone();
    let OpCode::Call(target) = node.op else {
        return None;
    };
    let cache = *meta.identity_cache(target.method)?;

    // The replacement only makes sense when the boxed class is known.
    meta.class_shape(cache.class)?;

    // Allocation takes the factory call's slot so every parent of the
    // call sees the new object.
    ir.arena.recreate(
        call_node,
        OpCode::NewObject(cache.class),
        SmallVec::new(),
        ValueType::Address,
    );

    // Constructor call on the fresh object, factory arguments forwarded.
    let mut ctor_args: SmallVec<[NodeId; 2]> = SmallVec::new();
    ctor_args.push(call_node);
    ctor_args.extend(node.operands.iter().copied());
    let ctor = ir.arena.add(
        OpCode::Call(CallTarget::direct(cache.constructor)),
        ctor_args,
        ValueType::Void,
    );
    let ctor_stmt = ir.insert_after(stmt, ctor);

    tracing::debug!(
        node = %call_node,
        factory = %target.method,
        ctor = %cache.constructor,
        "dememoized identity-cache call"
    );

    Some(DememoState {
        node: call_node,
        saved_target: target,
        saved_args: node.operands,
        saved_ty: node.ty,
        ctor_stmt,
    })
}

/// Reverse a speculative dememoization: restore the factory call and drop
/// the synthesized constructor statement.
pub fn rememoize(ir: &mut MethodIr, state: &DememoState) {
    ir.arena.recreate(
        state.node,
        OpCode::Call(state.saved_target),
        state.saved_args.clone(),
        state.saved_ty,
    );
    ir.detach(state.ctor_stmt);

    tracing::debug!(node = %state.node, "rememoized identity-cache call");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::types::{ClassId, MethodId};
    use crate::meta::{CacheFactory, ClassShape};

    fn registry() -> VmRegistry {
        let mut meta = VmRegistry::new();
        meta.register_class(
            ClassId(1),
            ClassShape::object("BoxedInt", 24).with_field("value", 16, ValueType::Int64),
        );
        meta.register_cache_factory(CacheFactory {
            factory: MethodId(10),
            class: ClassId(1),
            constructor: MethodId(11),
        });
        meta
    }

    fn boxed_call_ir() -> (MethodIr, StmtId, NodeId) {
        // x = BoxedInt.box(42)
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let x = b.local("x", ValueType::Address);
        let arg = b.const_int(42);
        let call = b.call(CallTarget::direct(MethodId(10)), &[arg], ValueType::Address);
        let stmt = b.store_local(x, call);
        (b.finish(), stmt, call)
    }

    #[test]
    fn test_dememoize_rewrites_call() {
        let meta = registry();
        let (mut ir, stmt, call) = boxed_call_ir();

        let state = try_dememoize(&mut ir, &meta, stmt, call).unwrap();

        // The call slot is now an allocation.
        assert_eq!(ir.arena.node(call).op, OpCode::NewObject(ClassId(1)));

        // A constructor call follows the store, receiver first.
        let ctor_root = ir.stmt(state.ctor_stmt).root;
        let ctor = ir.arena.node(ctor_root);
        match ctor.op {
            OpCode::Call(t) => assert_eq!(t.method, MethodId(11)),
            _ => panic!("Expected constructor call"),
        }
        assert_eq!(ctor.operand(0), Some(call));
        assert!(ir.is_attached(state.ctor_stmt));
    }

    #[test]
    fn test_rememoize_restores_original() {
        let meta = registry();
        let (mut ir, stmt, call) = boxed_call_ir();
        let original = ir.arena.node(call).clone();

        let state = try_dememoize(&mut ir, &meta, stmt, call).unwrap();
        rememoize(&mut ir, &state);

        // Same call target, same arguments, same type.
        let restored = ir.arena.node(call);
        assert_eq!(restored.op, original.op);
        assert_eq!(restored.operands, original.operands);
        assert_eq!(restored.ty, original.ty);
        assert!(!ir.is_attached(state.ctor_stmt));
    }

    #[test]
    fn test_non_factory_call_is_ignored() {
        let meta = registry();
        let mut b = IrBuilder::new(MethodId(0), "T.m", 0);
        let arg = b.const_int(1);
        let call = b.call(CallTarget::direct(MethodId(99)), &[arg], ValueType::Address);
        let stmt = b.stmt(call);
        let mut ir = b.finish();

        assert!(try_dememoize(&mut ir, &meta, stmt, call).is_none());
    }

    #[test]
    fn test_unknown_boxed_class_is_ignored() {
        let mut meta = VmRegistry::new();
        meta.register_cache_factory(CacheFactory {
            factory: MethodId(10),
            class: ClassId(77),
            constructor: MethodId(11),
        });
        let (mut ir, stmt, call) = boxed_call_ir();

        assert!(try_dememoize(&mut ir, &meta, stmt, call).is_none());
    }
}
