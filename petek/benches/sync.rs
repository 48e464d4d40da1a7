//! Benchmark: read-section entry/exit and grace-period cost.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use petek::RcuLock;
use std::sync::Arc;
use std::thread;

fn bench_read_section(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_section");
    group.throughput(Throughput::Elements(1));

    let rcu = RcuLock::new();
    group.bench_function("enter_exit", |b| {
        b.iter(|| {
            let section = rcu.read();
            black_box(&section);
        });
    });

    group.finish();
}

fn bench_synchronize(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronize");

    // Quiescent cells only: the writer scans but never waits.
    for &cells in &[1usize, 8, 64] {
        let rcu = Arc::new(RcuLock::new());
        let handles: Vec<_> = (0..cells)
            .map(|_| {
                let rcu = Arc::clone(&rcu);
                thread::spawn(move || {
                    let _section = rcu.read();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        group.bench_with_input(
            BenchmarkId::new("quiescent_cells", cells),
            &rcu,
            |b, rcu| {
                b.iter(|| rcu.synchronize());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_read_section, bench_synchronize);
criterion_main!(benches);
