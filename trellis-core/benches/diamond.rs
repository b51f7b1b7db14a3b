//! Benchmarks for trellis-core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::{Cell, Derived, Effect, Engine};

// =============================================================================
// CELL BENCHMARKS
// =============================================================================

fn bench_cell_read(c: &mut Criterion) {
    let engine = Engine::new();
    let cell = engine.cell(42i64);
    c.bench_function("cell_read", |b| b.iter(|| black_box(cell.read())));
}

fn bench_cell_write(c: &mut Criterion) {
    let engine = Engine::new();
    let cell = engine.cell(0i64);
    c.bench_function("cell_write", |b| b.iter(|| cell.write(black_box(42))));
}

// =============================================================================
// DERIVED BENCHMARKS
// =============================================================================

fn bench_derived_read_cached(c: &mut Criterion) {
    let engine = Engine::new();
    let cell = engine.cell(42i64);
    let source = cell.clone();
    let doubled = engine.derived(move || source.read() * 2);
    let _ = doubled.read();

    c.bench_function("derived_read_cached", |b| b.iter(|| black_box(doubled.read())));
}

fn bench_derived_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived_chain");

    for depth in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let engine = Engine::new();
            let head = engine.cell(0i64);

            let source = head.clone();
            let mut tail: Derived<i64> = engine.derived(move || source.read() + 1);
            for _ in 1..depth {
                let previous = tail.clone();
                tail = engine.derived(move || previous.read() + 1);
            }

            let mut value = 0;
            b.iter(|| {
                value += 1;
                head.write(value);
                black_box(tail.read())
            })
        });
    }

    group.finish();
}

// =============================================================================
// DIAMOND BENCHMARKS
// =============================================================================

fn build_diamond(engine: &Engine, width: usize) -> (Cell<i64>, Derived<i64>, Effect) {
    let head = engine.cell(0i64);
    let branches: Vec<Derived<i64>> = (0..width)
        .map(|_| {
            let head = head.clone();
            engine.derived(move || head.read() + 1)
        })
        .collect();
    let sum = engine.derived(move || branches.iter().map(Derived::read).sum());

    let observed = sum.clone();
    let effect = engine.effect(move || {
        black_box(observed.read());
    });
    (head, sum, effect)
}

fn bench_diamond(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond");

    for width in [2, 5, 25] {
        group.bench_with_input(BenchmarkId::new("batched_write", width), &width, |b, &width| {
            let engine = Engine::new();
            let (head, sum, _effect) = build_diamond(&engine, width);

            let mut value = 0;
            b.iter(|| {
                value += 1;
                engine.with_batch(|| head.write(value)).unwrap();
                black_box(sum.read())
            })
        });
    }

    group.finish();
}

/// 500 batched writes through a width-5 diamond, checked like a harness would.
fn bench_diamond_scenario(c: &mut Criterion) {
    c.bench_function("diamond_scenario_500", |b| {
        b.iter(|| {
            let engine = Engine::new();
            let (head, sum, effect) = build_diamond(&engine, 5);
            engine.with_batch(|| head.write(1)).unwrap();

            for i in 0..500 {
                engine.with_batch(|| head.write(i)).unwrap();
                assert_eq!(sum.read(), (i + 1) * 5);
            }
            assert_eq!(effect.run_count(), 501);
            black_box(effect.run_count())
        })
    });
}

// =============================================================================
// EFFECT BENCHMARKS
// =============================================================================

fn bench_batch_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_fan_out");

    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::new("trigger", count), &count, |b, &count| {
            let engine = Engine::new();
            let cell = engine.cell(0i64);
            let effects: Vec<Effect> = (0..count)
                .map(|_| {
                    let source = cell.clone();
                    engine.effect(move || {
                        black_box(source.read());
                    })
                })
                .collect();

            let mut value = 0;
            b.iter(|| {
                value += 1;
                engine.with_batch(|| cell.write(value)).unwrap();
            });
            black_box(effects.len());
        });
    }

    group.finish();
}

criterion_group!(cell_benches, bench_cell_read, bench_cell_write);

criterion_group!(derived_benches, bench_derived_read_cached, bench_derived_chain);

criterion_group!(diamond_benches, bench_diamond, bench_diamond_scenario);

criterion_group!(effect_benches, bench_batch_fan_out);

criterion_main!(cell_benches, derived_benches, diamond_benches, effect_benches);
