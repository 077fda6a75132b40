//! End-to-end escape-analysis scenarios.
//!
//! Each test builds a method the way the bytecode translator would, runs
//! the full pass (discovery through flush/monitor elimination), and checks
//! the rewritten IR shape.

use pretty_assertions::assert_eq;

use garnet_core::{CompilerOptions, InterruptFlag};
use garnet_jit::ir::builder::{field, IrBuilder};
use garnet_jit::ir::method::MethodIr;
use garnet_jit::ir::opcodes::{CallTarget, OpCode};
use garnet_jit::ir::types::{ClassId, MethodId, ValueType};
use garnet_jit::meta::{ClassShape, MapIrProvider, MethodShape, SpliceInliner, VmRegistry};
use garnet_jit::opt::{EscapeAnalysis, OptContext, OptimizationPass};

const POINT: ClassId = ClassId(1);

struct Fixture {
    meta: VmRegistry,
    provider: MapIrProvider,
    options: CompilerOptions,
    interrupt: InterruptFlag,
}

impl Fixture {
    fn new() -> Self {
        let mut meta = VmRegistry::new();
        meta.register_class(
            POINT,
            ClassShape::object("Point", 24)
                .with_field("x", 16, ValueType::Int32)
                .with_field("y", 20, ValueType::Int32),
        );
        Self {
            meta,
            provider: MapIrProvider::new(),
            options: CompilerOptions::default(),
            interrupt: InterruptFlag::new(),
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
}

fn allocations_by_block(ir: &MethodIr) -> Vec<(u32, usize)> {
    let mut out = Vec::new();
    for block in ir.cfg.iter() {
        let mut count = 0;
        for &sid in &block.stmts {
            for id in ir.arena.postorder(ir.stmt(sid).root) {
                if ir.arena.node(id).op.is_allocation() {
                    count += 1;
                }
            }
        }
        if count > 0 {
            out.push((block.id.0, count));
        }
    }
    out
}

/// Scenario 1: an object stored only into a local, read twice, method
/// returns void. Expect scalar promotion and no heap allocation left.
#[test]
fn local_object_fully_scalarized() {
    let f = Fixture::new();
    let mut b = IrBuilder::new(MethodId(0), "Scenario.one", 0);
    let p = b.local("p", ValueType::Address);
    let alloc = b.new_object(POINT);
    b.store_local(p, alloc);
    let base = b.load_local(p);
    let ten = b.const_int(10);
    b.store_field(base, field(POINT, 16, ValueType::Int32), ten);
    let r1 = b.load_local(p);
    let x1 = b.load_field(r1, field(POINT, 16, ValueType::Int32));
    let t1 = b.local("t1", ValueType::Int32);
    b.store_local(t1, x1);
    let r2 = b.load_local(p);
    let x2 = b.load_field(r2, field(POINT, 16, ValueType::Int32));
    let t2 = b.local("t2", ValueType::Int32);
    b.store_local(t2, x2);
    b.ret();
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new();
    let changed = pass.run(&mut ir, &f.ctx()).unwrap();

    assert!(changed);
    assert_eq!(pass.stats().promoted_non_contiguous, 1);
    assert_eq!(pass.stats().rejected, 0);
    assert_eq!(allocations_by_block(&ir), vec![]);

    // Every field access became a local read/write.
    let any_field_access = ir
        .stmt_ids_in_block_order()
        .into_iter()
        .flat_map(|sid| ir.arena.postorder(ir.stmt(sid).root))
        .any(|id| {
            let op = ir.arena.node(id).op;
            op.is_indirect_load() || op.is_indirect_store()
        });
    assert!(!any_field_access);
}

/// Scenario 2: the object is passed to a small method that provably does
/// not leak it. Expect the call inlined and the candidate promoted on the
/// following pass.
#[test]
fn sniffed_call_inlined_then_promoted() {
    let mut f = Fixture::new();
    const READER: MethodId = MethodId(40);
    f.meta
        .register_method(READER, MethodShape::bytecode("Reader.get", 12));
    {
        let mut cb = IrBuilder::new(READER, "Reader.get", 1);
        cb.set_bytecode_size(12);
        let p0 = cb.param(0, ValueType::Address);
        let x = cb.load_field(p0, field(POINT, 16, ValueType::Int32));
        let t = cb.local("t", ValueType::Int32);
        cb.store_local(t, x);
        cb.ret();
        f.provider.register(cb.finish());
    }

    let mut b = IrBuilder::new(MethodId(0), "Scenario.two", 0);
    let p = b.local("p", ValueType::Address);
    let alloc = b.new_object(POINT);
    b.store_local(p, alloc);
    let base = b.load_local(p);
    let one = b.const_int(1);
    b.store_field(base, field(POINT, 16, ValueType::Int32), one);
    let arg = b.load_local(p);
    let call = b.call(CallTarget::direct(READER), &[arg], ValueType::Void);
    b.stmt(call);
    b.ret();
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new().with_inliner(Box::new(SpliceInliner));
    let changed = pass.run(&mut ir, &f.ctx()).unwrap();

    assert!(changed);
    assert!(pass.stats().passes_run >= 2);
    assert!(pass.stats().inline_requests >= 1);
    assert_eq!(pass.stats().promoted_non_contiguous, 1);
    assert_eq!(allocations_by_block(&ir), vec![]);
}

/// Scenario 3: a small array whose reference is returned. Expect
/// rejection with the original allocation preserved unchanged.
#[test]
fn returned_array_stays_on_heap() {
    let f = Fixture::new();
    let mut b = IrBuilder::new(MethodId(0), "Scenario.three", 0);
    let a = b.local("a", ValueType::Address);
    let three = b.const_int(3);
    let alloc = b.new_array(ValueType::Int32, three);
    b.store_local(a, alloc);
    let load = b.load_local(a);
    b.ret_value(load);
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new();
    pass.run(&mut ir, &f.ctx()).unwrap();

    assert_eq!(pass.stats().rejected, 1);
    assert_eq!(pass.stats().promoted_contiguous, 0);
    assert_eq!(pass.stats().promoted_non_contiguous, 0);
    assert_eq!(ir.arena.node(alloc).op, OpCode::NewArray(ValueType::Int32));
    assert_eq!(allocations_by_block(&ir).len(), 1);
}

/// Scenario 4: allocated before a loop, a field written each iteration
/// and read after the loop, no cross-iteration aliasing. Expect scalar
/// promotion.
#[test]
fn loop_carried_field_scalarized() {
    let f = Fixture::new();
    let mut b = IrBuilder::new(MethodId(0), "Scenario.four", 0);
    let header = b.add_block();
    let body = b.add_block();
    let exit = b.add_block();

    let p = b.local("p", ValueType::Address);
    let alloc = b.new_object(POINT);
    b.store_local(p, alloc);
    b.goto(header);

    b.select(header);
    let cond = b.const_int(1);
    b.branch(cond, body);
    b.edge(header, exit);

    b.select(body);
    let base = b.load_local(p);
    let i = b.const_int(5);
    b.store_field(base, field(POINT, 16, ValueType::Int32), i);
    b.goto(header);

    b.select(exit);
    let base2 = b.load_local(p);
    let x = b.load_field(base2, field(POINT, 16, ValueType::Int32));
    let t = b.local("t", ValueType::Int32);
    b.store_local(t, x);
    b.ret();
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new();
    let changed = pass.run(&mut ir, &f.ctx()).unwrap();

    assert!(changed);
    assert_eq!(pass.stats().promoted_non_contiguous, 1);
    assert_eq!(allocations_by_block(&ir), vec![]);
}

/// Scenario 5: the only escape is a call reached solely through an
/// exception handler. Expect contiguous promotion with heapification
/// compensation in the cold block and a clean hot path.
#[test]
fn cold_call_escape_heapified() {
    let mut f = Fixture::new();
    // A handler-style sink with no IR available: the sniff fails and the
    // escape is compensated because the block is cold.
    f.meta
        .register_method(MethodId(60), MethodShape::native("Throwable.report"));

    let mut b = IrBuilder::new(MethodId(0), "Scenario.five", 0);
    let handler = b.add_catch_block();
    let entry = b.current_block();
    b.edge(entry, handler);

    let p = b.local("p", ValueType::Address);
    let alloc = b.new_object(POINT);
    b.store_local(p, alloc);
    let base = b.load_local(p);
    let one = b.const_int(1);
    b.store_field(base, field(POINT, 16, ValueType::Int32), one);
    b.ret();

    b.select(handler);
    let arg = b.load_local(p);
    let call = b.call(CallTarget::direct(MethodId(60)), &[arg], ValueType::Void);
    b.stmt(call);
    b.ret();
    let mut ir = b.finish();

    let entry_block = ir.cfg.entry();
    let mut pass = EscapeAnalysis::new();
    let changed = pass.run(&mut ir, &f.ctx()).unwrap();

    assert!(changed);
    assert_eq!(pass.stats().promoted_contiguous, 1);
    assert_eq!(pass.stats().heapified_sites, 1);

    // The only remaining allocation is the compensating heap copy, and it
    // is not on the hot path.
    let allocs = allocations_by_block(&ir);
    assert_eq!(allocs.len(), 1);
    assert_ne!(allocs[0].0, entry_block.0);

    // A guard comparison against null exists in the cold region.
    let has_guard_branch = ir
        .stmt_ids_in_block_order()
        .into_iter()
        .any(|sid| matches!(ir.arena.node(ir.stmt(sid).root).op, OpCode::Branch(_)));
    assert!(has_guard_branch);
}

/// Scenario 6: a monitor pair guarding a non-escaping candidate is
/// removed; an unrelated monitor pair on an escaping object is untouched.
#[test]
fn local_monitor_removed_escaping_monitor_kept() {
    let f = Fixture::new();
    let mut b = IrBuilder::new(MethodId(0), "Scenario.six", 0);

    // Promotable candidate with a lock around a field update.
    let p = b.local("p", ValueType::Address);
    let alloc = b.new_object(POINT);
    b.store_local(p, alloc);
    let m1 = b.load_local(p);
    let enter1 = b.monitor_enter(m1);
    let base = b.load_local(p);
    let one = b.const_int(1);
    b.store_field(base, field(POINT, 16, ValueType::Int32), one);
    let m2 = b.load_local(p);
    let exit1 = b.monitor_exit(m2);

    // Escaping object with its own lock.
    let q = b.local("q", ValueType::Address);
    let alloc2 = b.new_object(POINT);
    b.store_local(q, alloc2);
    let m3 = b.load_local(q);
    let enter2 = b.monitor_enter(m3);
    let m4 = b.load_local(q);
    let exit2 = b.monitor_exit(m4);
    let escaping = b.load_local(q);
    b.ret_value(escaping);
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new();
    let changed = pass.run(&mut ir, &f.ctx()).unwrap();

    assert!(changed);
    assert_eq!(pass.stats().monitors_removed, 2);
    assert!(!ir.is_attached(enter1));
    assert!(!ir.is_attached(exit1));
    assert!(ir.is_attached(enter2));
    assert!(ir.is_attached(exit2));
}

/// Suppression: a matching source filter forces the candidate to stay on
/// the heap regardless of provability.
#[test]
fn suppression_filter_blocks_promotion() {
    let mut f = Fixture::new();
    f.options.suppress = Some(garnet_core::SourceFilter::new("Scenario.sup*"));

    let mut b = IrBuilder::new(MethodId(0), "Scenario.sup", 0);
    let p = b.local("p", ValueType::Address);
    let alloc = b.new_object(POINT);
    b.store_local(p, alloc);
    let base = b.load_local(p);
    let one = b.const_int(1);
    b.store_field(base, field(POINT, 16, ValueType::Int32), one);
    b.ret();
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new();
    pass.run(&mut ir, &f.ctx()).unwrap();

    assert_eq!(pass.stats().promoted_non_contiguous, 0);
    assert_eq!(ir.arena.node(alloc).op, OpCode::NewObject(POINT));
}

/// Identity-cache dememoization: a boxing factory call becomes a plain
/// allocation plus inlined constructor, then promotes like any other
/// candidate; a leaking use reverses the rewrite.
#[test]
fn dememoized_boxing_promotes_or_reverts() {
    const BOXED: ClassId = ClassId(9);
    const FACTORY: MethodId = MethodId(70);
    const CTOR: MethodId = MethodId(71);

    let mut f = Fixture::new();
    f.meta.register_class(
        BOXED,
        ClassShape::object("BoxedInt", 24).with_field("value", 16, ValueType::Int64),
    );
    f.meta.register_cache_factory(garnet_jit::meta::CacheFactory {
        factory: FACTORY,
        class: BOXED,
        constructor: CTOR,
    });
    f.meta
        .register_method(CTOR, MethodShape::bytecode("BoxedInt.init", 8));
    {
        let mut cb = IrBuilder::new(CTOR, "BoxedInt.init", 2);
        cb.set_bytecode_size(8);
        let this = cb.param(0, ValueType::Address);
        let v = cb.param(1, ValueType::Int64);
        cb.store_field(this, field(BOXED, 16, ValueType::Int64), v);
        cb.ret();
        f.provider.register(cb.finish());
    }

    // Non-leaking use: the boxed value is unboxed locally.
    let mut b = IrBuilder::new(MethodId(0), "Scenario.box", 0);
    let x = b.local("x", ValueType::Address);
    let arg = b.const_int(42);
    let boxed = b.call(CallTarget::direct(FACTORY), &[arg], ValueType::Address);
    b.store_local(x, boxed);
    let base = b.load_local(x);
    let v = b.load_field(base, field(BOXED, 16, ValueType::Int64));
    let t = b.local("t", ValueType::Int64);
    b.store_local(t, v);
    b.ret();
    let mut ir = b.finish();

    let mut pass = EscapeAnalysis::new().with_inliner(Box::new(SpliceInliner));
    let changed = pass.run(&mut ir, &f.ctx()).unwrap();
    assert!(changed);
    assert_eq!(pass.stats().promoted_non_contiguous, 1);
    assert_eq!(allocations_by_block(&ir), vec![]);

    // Leaking use: the boxed value is returned, so the factory call must
    // be restored exactly.
    let mut b2 = IrBuilder::new(MethodId(1), "Scenario.boxleak", 0);
    let y = b2.local("y", ValueType::Address);
    let arg2 = b2.const_int(7);
    let boxed2 = b2.call(CallTarget::direct(FACTORY), &[arg2], ValueType::Address);
    b2.store_local(y, boxed2);
    let load = b2.load_local(y);
    b2.ret_value(load);
    let mut ir2 = b2.finish();

    let mut pass2 = EscapeAnalysis::new().with_inliner(Box::new(SpliceInliner));
    pass2.run(&mut ir2, &f.ctx()).unwrap();

    assert!(pass2.stats().rememoized >= 1);
    match ir2.arena.node(boxed2).op {
        OpCode::Call(target) => assert_eq!(target.method, FACTORY),
        other => panic!("factory call not restored: {other:?}"),
    }
    assert_eq!(ir2.arena.node(boxed2).operand(0), Some(arg2));
}
