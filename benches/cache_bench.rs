use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use goproxycache::core::cache::DirCacher;
use std::hint::black_box;
use tokio::runtime::Runtime;

fn bench_put_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cacher = DirCacher::new(dir.path());
    let body = Bytes::from(vec![b'x'; 16 * 1024]);

    c.bench_function("cache put+get 16KiB", |b| {
        b.to_async(&rt).iter(|| {
            let cacher = &cacher;
            let body = body.clone();
            async move {
                cacher.put("example.com/foo/@v/v1.0.0.zip", black_box(body)).await.unwrap();
                black_box(cacher.get("example.com/foo/@v/v1.0.0.zip").await.unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_put_get);
criterion_main!(benches);
