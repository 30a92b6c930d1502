//! Benchmarks for the copy engine.

use bson::{Bson, Document, doc};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use fake::Fake;
use fake::faker::lorem::en::Word;
use rowmirror::memory::{MemorySink, MemorySource};
use rowmirror::{CopyEngine, CopyOptions, FlowGate, RunWindow, TableSpec, Watermarks};
use std::sync::Arc;

fn rows(n: i64) -> Vec<Document> {
    let now = Bson::DateTime(bson::DateTime::now());
    (0..n)
        .map(|id| {
            doc! {
                "id": id,
                "amount": (1i64..10_000).fake::<i64>(),
                "status": Word().fake::<String>(),
                "created_at": now.clone(),
                "updated_at": now.clone(),
            }
        })
        .collect()
}

fn orders() -> TableSpec {
    TableSpec::builder()
        .name("orders")
        .columns(["amount", "status"])
        .build()
        .expect("valid table spec")
}

/// Benchmark a full table copy against in-memory source and sink.
fn bench_copy_table(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let spec = orders();
    let mut group = c.benchmark_group("copy_table");

    for (high, low) in [(100, 50), (10_000, 5_000)] {
        let data = rows(20_000);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}/{}", high, low)),
            &(high, low),
            |b, &(high, low)| {
                b.to_async(&rt).iter(|| {
                    let source = MemorySource::new().with_table("orders", data.clone());
                    let options = CopyOptions {
                        watermarks: Watermarks { high, low },
                        ..CopyOptions::default()
                    };
                    let spec = &spec;
                    async move {
                        let engine = CopyEngine::new(source, Arc::new(MemorySink::new()), options)
                            .expect("valid options");
                        black_box(
                            engine
                                .copy_table(spec, &RunWindow::Unbounded)
                                .await
                                .expect("copy succeeds"),
                        )
                    }
                })
            },
        );
    }
    group.finish();
}

/// Benchmark flow gate bookkeeping.
fn bench_flow_gate(c: &mut Criterion) {
    c.bench_function("flow_gate_cycle", |b| {
        b.iter(|| {
            let mut gate = FlowGate::new(Watermarks::default());
            for _ in 0..20_000 {
                black_box(gate.on_emit());
                if gate.is_paused() {
                    while gate.is_paused() {
                        black_box(gate.on_ack());
                    }
                }
            }
            black_box(gate.pauses())
        })
    });
}

criterion_group!(benches, bench_copy_table, bench_flow_gate);
criterion_main!(benches);
