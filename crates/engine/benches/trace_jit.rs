//! Benchmarks the full tracing pipeline — hot counter, recorder, optimizer,
//! register allocator, and `dynasmrt` code generation — against plain
//! bytecode dispatch, on the sum-loop scenario.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tracejit_engine::jit::JitConfig;
use tracejit_engine::vm::bytecode::{Function, Instr, Module};
use tracejit_engine::{Interpreter, JitState};

fn build_sum_loop(iterations: f64) -> Module {
    let mut f = Function::new("sum_loop", 5);
    let zero = f.add_constant(0.0);
    let limit = f.add_constant(iterations);
    let one = f.add_constant(1.0);

    f.push(Instr::LoadConst { dst: 0, idx: zero });
    f.push(Instr::LoadConst { dst: 1, idx: zero });
    f.push(Instr::LoadConst { dst: 2, idx: limit });
    f.push(Instr::LoadConst { dst: 4, idx: one });

    let header = f.push(Instr::Lt { dst: 3, lhs: 1, rhs: 2 });
    let exit_jump = f.push(Instr::JumpIfFalse { cond: 3, target: 0 });
    f.push(Instr::Add { dst: 0, lhs: 0, rhs: 1 });
    f.push(Instr::Add { dst: 1, lhs: 1, rhs: 4 });
    f.push(Instr::JumpBack { target: header });
    let after_loop = f.push(Instr::Print { src: 0 });
    f.push(Instr::Return { src: 0 });
    f.patch_jump_target(exit_jump, after_loop);

    let mut module = Module::new("sum_loop");
    module.add_function(f);
    module
}

fn bench_interpreted(c: &mut Criterion) {
    c.bench_function("sum_loop/interpreted", |b| {
        b.iter(|| {
            let config = JitConfig { enabled: false, ..Default::default() };
            let mut interp = Interpreter::with_jit(build_sum_loop(black_box(10_000.0)), 0, JitState::with_config(config));
            interp.run();
            black_box(interp.printed()[0]);
        });
    });
}

fn bench_traced(c: &mut Criterion) {
    c.bench_function("sum_loop/traced", |b| {
        b.iter(|| {
            let config = JitConfig { hot_threshold: 20, ..Default::default() };
            let mut interp = Interpreter::with_jit(build_sum_loop(black_box(10_000.0)), 0, JitState::with_config(config));
            interp.run();
            black_box(interp.printed()[0]);
        });
    });
}

criterion_group!(benches, bench_interpreted, bench_traced);
criterion_main!(benches);
