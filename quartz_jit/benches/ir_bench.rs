//! Benchmarks for the hot IR manipulation paths: list editing and range
//! cloning dominate optimization pass cost.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use quartz_jit::ir::cloner::Cloner;
use quartz_jit::ir::func::Func;
use quartz_jit::ir::opcode::Opcode;

fn build_straight_line(n: usize) -> Func {
    let mut func = Func::new();
    for i in 0..n {
        let instr = func.new_instr(Opcode::Add);
        let sym = func.syms.new_sym();
        let dst = func.new_reg_opnd(sym);
        func.set_dst(instr, dst);
        let src = func.new_int_const_opnd(i as i64);
        func.set_src1(instr, src);
        func.append(instr);
    }
    func
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for n in [100usize, 1000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("straight_line_{n}"), |b| {
            b.iter(|| black_box(build_straight_line(n)));
        });
    }
    group.finish();
}

fn bench_clone_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone_range");
    for n in [100usize, 1000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("clone_{n}"), |b| {
            b.iter_batched(
                || {
                    let func = build_straight_line(n);
                    let first = func.next_of(func.entry_instr()).unwrap();
                    let last = func.prev_of(func.exit_instr()).unwrap();
                    (func, first, last)
                },
                |(mut func, first, last)| {
                    let mut cloner = Cloner::new();
                    let at = func.prev_of(func.exit_instr()).unwrap();
                    black_box(cloner.clone_range(&mut func, first, last, at, |_, _| false));
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_remove_all(c: &mut Criterion) {
    c.bench_function("remove_1000", |b| {
        b.iter_batched(
            || build_straight_line(1000),
            |mut func| {
                func.for_each_editing(|f, id| {
                    if f.instr(id).opcode == Opcode::Add {
                        f.remove(id);
                    }
                });
                black_box(func.instr_count())
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_build, bench_clone_range, bench_remove_all);
criterion_main!(benches);
