//! Cell store throughput on the in-memory backend.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ouroboros_cell::{Cell, CellStore, Cursor, NoopObserver, OpContext, StoreConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn populated_store(rt: &Runtime, rows: i64, versions: i64) -> CellStore {
    rt.block_on(async {
        let store = CellStore::open(StoreConfig::default())
            .await
            .unwrap()
            .with_observer(Arc::new(NoopObserver));
        let ctx = OpContext::background();
        for row in 0..rows {
            let row_key = format!("row:{}", row);
            for ref_key in 0..versions {
                let cell = Cell::new(row_key.as_str(), "col", ref_key, "payload");
                store
                    .put_cell(&ctx, &row_key, "col", ref_key, &cell)
                    .await
                    .unwrap();
            }
        }
        store
    })
}

fn bench_put_cell(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = populated_store(&rt, 0, 0);
    let ctx = OpContext::background();
    let mut ref_key = 0i64;

    c.bench_function("put_cell", |b| {
        b.iter(|| {
            ref_key += 1;
            let cell = Cell::new("bench", "col", ref_key, "payload");
            rt.block_on(store.put_cell(&ctx, "bench", "col", ref_key, black_box(&cell)))
                .unwrap();
        })
    });
}

fn bench_get_cell_latest(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("get_cell_latest");

    for versions in [1i64, 16, 256] {
        let store = populated_store(&rt, 100, versions);
        let ctx = OpContext::background();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}versions", versions)),
            &versions,
            |b, _| {
                b.iter(|| {
                    let cell = rt
                        .block_on(store.get_cell_latest(&ctx, black_box("row:42"), "col"))
                        .unwrap();
                    black_box(cell);
                })
            },
        );
    }

    group.finish();
}

fn bench_partition_scan(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = populated_store(&rt, 1_000, 4);
    let ctx = OpContext::background();
    let mut group = c.benchmark_group("partition_scan");

    for limit in [10i64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| {
                let page = rt
                    .block_on(store.partition_scan(
                        &ctx,
                        "addedAt",
                        Cursor::SequenceNumber(black_box(1_000)),
                        limit,
                    ))
                    .unwrap();
                black_box(page);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put_cell, bench_get_cell_latest, bench_partition_scan);
criterion_main!(benches);
