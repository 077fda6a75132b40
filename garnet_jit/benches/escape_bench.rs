//! Escape analysis benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use garnet_core::{CompilerOptions, InterruptFlag};
use garnet_jit::ir::builder::{field, IrBuilder};
use garnet_jit::ir::method::MethodIr;
use garnet_jit::ir::types::{ClassId, MethodId, ValueType};
use garnet_jit::meta::{ClassShape, MapIrProvider, VmRegistry};
use garnet_jit::opt::{EscapeAnalysis, OptContext, OptimizationPass};

const POINT: ClassId = ClassId(1);

fn registry() -> VmRegistry {
    let mut meta = VmRegistry::new();
    meta.register_class(
        POINT,
        ClassShape::object("Point", 24)
            .with_field("x", 16, ValueType::Int32)
            .with_field("y", 20, ValueType::Int32),
    );
    meta
}

/// A method with `n` independent promotable allocations.
fn many_candidates(n: u32) -> MethodIr {
    let mut b = IrBuilder::new(MethodId(0), "Bench.many", 0);
    for i in 0..n {
        let p = b.local(format!("p{i}"), ValueType::Address);
        let alloc = b.new_object(POINT);
        b.store_local(p, alloc);
        let base = b.load_local(p);
        let v = b.const_int(i64::from(i));
        b.store_field(base, field(POINT, 16, ValueType::Int32), v);
        let base2 = b.load_local(p);
        let x = b.load_field(base2, field(POINT, 16, ValueType::Int32));
        let t = b.local(format!("t{i}"), ValueType::Int32);
        b.store_local(t, x);
    }
    b.ret();
    b.finish()
}

fn bench_escape_analysis(c: &mut Criterion) {
    let meta = registry();
    let provider = MapIrProvider::new();
    let options = CompilerOptions::default();
    let interrupt = InterruptFlag::new();

    let mut group = c.benchmark_group("escape");
    for n in [4u32, 16, 64] {
        group.bench_function(format!("promote_{n}"), |bench| {
            bench.iter(|| {
                let mut ir = many_candidates(n);
                let ctx = OptContext {
                    meta: &meta,
                    provider: &provider,
                    options: &options,
                    interrupt: &interrupt,
                };
                let mut pass = EscapeAnalysis::new();
                black_box(pass.run(&mut ir, &ctx).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_escape_analysis);
criterion_main!(benches);
