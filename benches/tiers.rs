use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use jitcalc::{compile, read_str, Vm};

// Benchmark: the three tiers on expressions of growing operator mix
fn bench_tier_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiers");

    let cases = vec![
        ("literal", "42"),
        ("mixed", "1 + 2 * 3 - 4 / 5"),
        ("nested", "2 * (3 + 1 / 2 - 6) + 2 * (3 + 1 / 2 - 6)"),
        ("pow", "2 ^ 10 + 3 ^ 4"),
    ];

    for (name, source) in cases {
        let expr = read_str(source).unwrap();
        let program = compile(&expr);

        group.bench_with_input(BenchmarkId::new("tree_eval", name), &expr, |b, expr| {
            b.iter(|| black_box(expr.eval()));
        });

        group.bench_with_input(BenchmarkId::new("bytecode", name), &program, |b, program| {
            let mut vm = Vm::new();
            b.iter(|| black_box(vm.run(program).unwrap()));
        });

        #[cfg(target_arch = "x86_64")]
        group.bench_with_input(BenchmarkId::new("jit", name), &program, |b, program| {
            let code = jitcalc::jit::compile(program).unwrap();
            b.iter(|| black_box(code.call()));
        });
    }

    group.finish();
}

// Benchmark: compilation cost per stage
fn bench_compilation_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    let source = "2 * (3 + 1 / 2 - 6) + 2 ^ 10";

    group.bench_function("parse", |b| {
        b.iter(|| black_box(read_str(source).unwrap()));
    });

    let expr = read_str(source).unwrap();
    group.bench_function("emit_bytecode", |b| {
        b.iter(|| black_box(compile(&expr)));
    });

    #[cfg(target_arch = "x86_64")]
    {
        let program = compile(&expr);
        group.bench_function("jit_compile", |b| {
            b.iter(|| black_box(jitcalc::jit::compile(&program).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tier_throughput, bench_compilation_time);
criterion_main!(benches);
