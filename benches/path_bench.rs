use criterion::{Criterion, criterion_group, criterion_main};
use goproxycache::core::path::{cache_name, parse};
use std::hint::black_box;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("path::parse list", |b| {
        b.iter(|| parse(black_box("github.com/!user/!repo/@v/list")).unwrap())
    });
    c.bench_function("path::parse zip", |b| {
        b.iter(|| parse(black_box("github.com/!user/!repo/@v/v1.2.3.zip")).unwrap())
    });
}

fn bench_cache_name(c: &mut Criterion) {
    let req = parse("github.com/!user/!repo/@v/v1.2.3.info").unwrap();
    c.bench_function("path::cache_name info", |b| b.iter(|| cache_name(black_box(&req))));
}

criterion_group!(benches, bench_parse, bench_cache_name);
criterion_main!(benches);
