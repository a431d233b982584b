#![allow(unused)]
extern crate modcompat;

#[path = "../tests/common/mod.rs"]
mod common;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use modcompat::prelude::*;
use std::hint::black_box;

/// Benchmark reading and writing a plugin module
fn bench_module_io(c: &mut Criterion) {
    let module = common::build_legacy_plugin().unwrap();
    let data = module.to_bytes().unwrap();

    let mut group = c.benchmark_group("module_io");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("from_bytes", |b| {
        b.iter(|| {
            let parsed = Module::from_bytes(black_box(&data)).unwrap();
            black_box(parsed)
        });
    });
    group.bench_function("to_bytes", |b| {
        b.iter(|| black_box(module.to_bytes().unwrap()));
    });
    group.finish();
}

/// Benchmark a full pass over a legacy plugin and a clean one
fn bench_rewrite(c: &mut Criterion) {
    let session = RewriteSession::builder(RewriteConfig::paranoid().with_trusted(["Host"]))
        .trusted_module(common::build_host_v2().unwrap())
        .facades(common::facades().unwrap())
        .build()
        .unwrap();
    let legacy = common::build_legacy_plugin().unwrap();
    let clean = common::build_clean_plugin().unwrap();

    let mut group = c.benchmark_group("rewrite");
    group.bench_function("legacy_plugin", |b| {
        b.iter_batched(
            || legacy.clone(),
            |mut module| black_box(session.rewrite_module(&mut module).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
    group.bench_function("clean_plugin", |b| {
        b.iter_batched(
            || clean.clone(),
            |mut module| black_box(session.rewrite_module(&mut module).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_module_io, bench_rewrite);
criterion_main!(benches);
