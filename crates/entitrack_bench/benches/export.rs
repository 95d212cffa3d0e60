//! Export and import benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use entitrack_bench::utils::generate_order_rows;
use entitrack_core::{EntityManager, ExportBundle, ExportOptions, ImportOptions, MergeStrategy};
use entitrack_testkit::fixtures::new_manager;

/// A manager holding `count` queried orders and `drafts` Added ones.
fn populated(count: usize, drafts: usize) -> EntityManager {
    let em = new_manager();
    em.merge_query_results("Order", &generate_order_rows(count), None)
        .unwrap();
    for _ in 0..drafts {
        em.create_entity("Order", &[]).unwrap();
    }
    em
}

/// Benchmark building a bundle from the cache.
fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    for count in [100, 1000] {
        let em = populated(count, count / 10);
        group.throughput(Throughput::Elements(em.len() as u64));
        group.bench_with_input(BenchmarkId::new("bundle", count), &em, |b, em| {
            b.iter(|| black_box(em.export_entities(None, &ExportOptions::new()).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("without_metadata", count), &em, |b, em| {
            let options = ExportOptions::new().include_metadata(false);
            b.iter(|| black_box(em.export_entities(None, &options).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark the two bundle encodings.
fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("bundle_encoding");
    let bundle = populated(1000, 100)
        .export_entities(None, &ExportOptions::new())
        .unwrap();
    let cbor = bundle.encode().unwrap();
    let json = bundle.to_json().unwrap();

    group.bench_function("cbor_encode", |b| b.iter(|| black_box(bundle.encode().unwrap())));
    group.bench_function("json_encode", |b| b.iter(|| black_box(bundle.to_json().unwrap())));
    group.throughput(Throughput::Bytes(cbor.len() as u64));
    group.bench_function("cbor_decode", |b| {
        b.iter(|| black_box(ExportBundle::decode(black_box(&cbor)).unwrap()))
    });
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("json_decode", |b| {
        b.iter(|| black_box(ExportBundle::from_json(black_box(&json)).unwrap()))
    });
    group.finish();
}

/// Benchmark importing into an empty manager and merging into a full one.
fn bench_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("import");
    for count in [100, 1000] {
        let bundle = populated(count, count / 10)
            .export_entities(None, &ExportOptions::new())
            .unwrap();
        // Temp-keyed rows are re-keyed on every import, so repeated merges
        // use a bundle without them.
        let queried = populated(count, 0)
            .export_entities(None, &ExportOptions::new())
            .unwrap();
        group.throughput(Throughput::Elements(bundle.entities.len() as u64));

        group.bench_with_input(BenchmarkId::new("fresh", count), &bundle, |b, bundle| {
            b.iter_batched(
                new_manager,
                |em| {
                    black_box(em.import_entities(bundle, &ImportOptions::new()).unwrap());
                    em
                },
                BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("overwrite", count), &queried, |b, bundle| {
            let em = new_manager();
            let options = ImportOptions::new().merge_strategy(MergeStrategy::OverwriteChanges);
            em.import_entities(bundle, &options).unwrap();
            b.iter(|| black_box(em.import_entities(bundle, &options).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_export, bench_encoding, bench_import);

criterion_main!(benches);
