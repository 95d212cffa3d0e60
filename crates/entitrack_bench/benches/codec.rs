//! Property value codec benchmarks.

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entitrack_bench::utils::random_record;
use entitrack_codec::{from_cbor, to_canonical_cbor, CanonicalEncoder, Value};
use uuid::Uuid;

/// An order-shaped record.
fn order_record() -> Value {
    Value::text_map([
        ("orderID", Value::Integer(10_248)),
        ("customerID", Value::Guid(Uuid::new_v4())),
        (
            "orderDate",
            Value::DateTime(Utc.timestamp_opt(1_600_000_000, 123_456_789).unwrap()),
        ),
        ("freight", Value::Float(32.38)),
        ("shipName", Value::Text("Vins et alcools Chevalier".into())),
        (
            "shipTo",
            Value::text_map([
                ("address", Value::Text("59 rue de l'Abbaye".into())),
                ("city", Value::Text("Reims".into())),
                ("postalCode", Value::Text("51100".into())),
                ("country", Value::Text("France".into())),
            ]),
        ),
    ])
}

/// Benchmark encoding individual scalar kinds.
fn bench_encode_scalars(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let scalars = [
        ("null", Value::Null),
        ("integer", Value::Integer(-1)),
        ("float", Value::Float(32.38)),
        ("text_short", Value::Text("Reims".into())),
        ("guid", Value::Guid(Uuid::new_v4())),
        (
            "datetime",
            Value::DateTime(Utc.timestamp_opt(1_600_000_000, 5).unwrap()),
        ),
    ];
    for (name, value) in scalars {
        group.bench_function(name, |b| {
            b.iter(|| black_box(to_canonical_cbor(black_box(&value)).unwrap()));
        });
    }
    group.bench_function("order_record", |b| {
        let value = order_record();
        b.iter(|| black_box(to_canonical_cbor(black_box(&value)).unwrap()));
    });
    group.finish();
}

/// Benchmark encoding records of increasing width.
fn bench_encode_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_width");
    for width in [4, 16, 64, 256] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let value = random_record(width);
            b.iter(|| black_box(to_canonical_cbor(black_box(&value)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.bench_function("order_record", |b| {
        let encoded = to_canonical_cbor(&order_record()).unwrap();
        b.iter(|| black_box(from_cbor(black_box(&encoded)).unwrap()));
    });
    for width in [16, 256] {
        let encoded = to_canonical_cbor(&random_record(width)).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("record", width), &encoded, |b, encoded| {
            b.iter(|| black_box(from_cbor(black_box(encoded)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark sorting keys while building a map.
fn bench_map_construction(c: &mut Criterion) {
    c.bench_function("text_map_64", |b| {
        let entries: Vec<(String, Value)> = (0..64)
            .rev()
            .map(|i| (format!("field_{i}"), Value::Integer(i)))
            .collect();
        b.iter(|| black_box(Value::text_map(black_box(entries.clone()))));
    });
}

/// Benchmark encoder reuse across a row set.
fn bench_encoder_reuse(c: &mut Criterion) {
    c.bench_function("encoder_reuse_100", |b| {
        let values: Vec<_> = (0..100).map(|_| order_record()).collect();
        b.iter(|| {
            let mut encoder = CanonicalEncoder::with_capacity(16 * 1024);
            for value in &values {
                encoder.encode(black_box(value)).unwrap();
            }
            black_box(encoder.into_bytes());
        });
    });
}

criterion_group!(
    benches,
    bench_encode_scalars,
    bench_encode_width,
    bench_decode,
    bench_map_construction,
    bench_encoder_reuse,
);

criterion_main!(benches);
