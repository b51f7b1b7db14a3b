//! The diamond topology: one cell, N parallel `cell + 1` nodes, one node
//! summing them, one effect reading the sum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use trellis_core::{Cell, Derived, Effect, Engine};

struct Diamond {
    head: Cell<i64>,
    sum: Derived<i64>,
    effect: Effect,
    runs: Arc<AtomicUsize>,
    glitches: Arc<AtomicUsize>,
}

fn diamond(engine: &Engine, width: usize) -> Diamond {
    let head = engine.cell(0).named("head");

    let branches: Vec<Derived<i64>> = (0..width)
        .map(|i| {
            let head = head.clone();
            engine.derived(move || head.read() + 1).named(format!("branch{i}"))
        })
        .collect();

    let glitches = Arc::new(AtomicUsize::new(0));
    let seen_glitch = glitches.clone();
    let sum = engine
        .derived(move || {
            let values: Vec<i64> = branches.iter().map(Derived::read).collect();
            if values.windows(2).any(|pair| pair[0] != pair[1]) {
                seen_glitch.fetch_add(1, Ordering::SeqCst);
            }
            values.iter().sum()
        })
        .named("sum");

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let observed = sum.clone();
    let effect = engine
        .effect(move || {
            observed.read();
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .named("sink");

    Diamond {
        head,
        sum,
        effect,
        runs,
        glitches,
    }
}

#[test]
fn benchmark_scenario() {
    let engine = Engine::new();
    let d = diamond(&engine, 5);

    engine.with_batch(|| d.head.write(1)).unwrap();
    assert_eq!(d.sum.read(), 10);

    d.runs.store(0, Ordering::SeqCst);
    for i in 0..500 {
        engine.with_batch(|| d.head.write(i)).unwrap();
        assert_eq!(d.sum.read(), (i + 1) * 5);
    }

    assert_eq!(d.runs.load(Ordering::SeqCst), 500);
    assert_eq!(d.effect.run_count(), 501);
    assert_eq!(d.glitches.load(Ordering::SeqCst), 0);
}

#[test]
fn every_changing_write_runs_the_effect_exactly_once() {
    let engine = Engine::new();
    let width = 8;
    let d = diamond(&engine, width);
    engine.flush().unwrap();

    let mut previous = 0;
    for value in [3, -7, 12, 0, 41, 41, 2] {
        let before = d.runs.load(Ordering::SeqCst);
        engine.with_batch(|| d.head.write(value)).unwrap();

        assert_eq!(d.sum.read(), width as i64 * (value + 1));
        let expected = if value == previous { before } else { before + 1 };
        assert_eq!(d.runs.load(Ordering::SeqCst), expected, "after writing {value}");
        previous = value;
    }
    assert_eq!(d.glitches.load(Ordering::SeqCst), 0);
}

#[test]
fn equal_write_is_cut_off_below_the_head() {
    let engine = Engine::new();
    let d = diamond(&engine, 4);
    engine.with_batch(|| d.head.write(5)).unwrap();
    let sum_revision = d.sum.revision();
    let runs = d.runs.load(Ordering::SeqCst);

    engine.with_batch(|| d.head.write(5)).unwrap();

    // The head moved, nothing below it did.
    assert_eq!(d.head.revision().raw(), 2);
    assert_eq!(d.sum.revision(), sum_revision);
    assert_eq!(d.runs.load(Ordering::SeqCst), runs);
    assert!(!d.effect.is_stale());
}

#[test]
fn sum_is_consistent_without_batching() {
    let engine = Engine::new();
    let d = diamond(&engine, 3);

    for value in 0..20 {
        d.head.write(value);
        assert_eq!(d.sum.read(), 3 * (value + 1));
    }

    // Unbatched writes queued the effect without running it.
    assert_eq!(d.runs.load(Ordering::SeqCst), 0);
    assert_eq!(engine.pending_effects(), vec![d.effect.id()]);

    engine.with_batch(|| {}).unwrap();
    assert_eq!(d.runs.load(Ordering::SeqCst), 1);
    assert_eq!(d.glitches.load(Ordering::SeqCst), 0);
}
