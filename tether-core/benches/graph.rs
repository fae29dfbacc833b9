//! Benchmarks for the reactive graph
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::{Computed, Graph, Rc, Signal, Watcher};

// =============================================================================
// HANDLE BENCHMARKS
// =============================================================================

fn bench_rc_clone_drop(c: &mut Criterion) {
    let rc = Rc::new(42i32);
    c.bench_function("rc_clone_drop", |b| b.iter(|| black_box(rc.clone())));
}

// =============================================================================
// COMPUTED BENCHMARKS
// =============================================================================

fn bench_computed_get_cached(c: &mut Criterion) {
    let graph = Graph::new();
    let s = Signal::new(&graph, 42i32);
    let d = {
        let s = s.clone();
        Computed::new(&graph, move || Ok(s.get()? * 2))
    };

    // First get to cache the value
    let _ = d.get();

    c.bench_function("computed_get_cached", |b| b.iter(|| black_box(d.get())));
}

fn bench_computed_get_dirty(c: &mut Criterion) {
    let graph = Graph::new();
    let s = Signal::new(&graph, 0i32);
    let d = {
        let s = s.clone();
        Computed::new(&graph, move || Ok(s.get()? * 2))
    };

    let mut i = 0;
    c.bench_function("computed_get_dirty", |b| {
        b.iter(|| {
            i += 1;
            let _ = s.set(i);
            black_box(d.get())
        })
    });
}

fn bench_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for depth in [1, 10, 50] {
        let graph = Graph::new();
        let s = Signal::new(&graph, 0i32);
        let mut tail = {
            let s = s.clone();
            Computed::new(&graph, move || s.get())
        };
        for _ in 1..depth {
            let prev = tail.clone();
            tail = Computed::new(&graph, move || Ok(prev.get()? + 1));
        }

        let mut i = 0;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                i += 1;
                let _ = s.set(i);
                black_box(tail.get())
            })
        });
    }

    group.finish();
}

// =============================================================================
// PROPAGATION BENCHMARKS
// =============================================================================

fn bench_watcher_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("watcher_fan_out");

    for width in [1, 10, 100] {
        let graph = Graph::new();
        let s = Signal::new(&graph, 0i32);
        let watchers: Vec<_> = (0..width)
            .map(|_| {
                let s = s.clone();
                Watcher::new(&graph, move || s.get().map(drop))
            })
            .collect();

        let mut i = 0;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                i += 1;
                black_box(s.set(i))
            })
        });
        drop(watchers);
    }

    group.finish();
}

fn bench_batch_writes(c: &mut Criterion) {
    let graph = Graph::new();
    let signals: Vec<_> = (0..10).map(|_| Signal::new(&graph, 0i32)).collect();
    let _watcher = {
        let signals = signals.clone();
        Watcher::new(&graph, move || {
            for s in &signals {
                s.get()?;
            }
            Ok(())
        })
    };

    let mut i = 0;
    c.bench_function("batch_ten_writes", |b| {
        b.iter(|| {
            i += 1;
            graph.batch(|| {
                for s in &signals {
                    let _ = s.set(i);
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_rc_clone_drop,
    bench_computed_get_cached,
    bench_computed_get_dirty,
    bench_computed_chain,
    bench_watcher_fan_out,
    bench_batch_writes,
);
criterion_main!(benches);
