use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use tempfile::tempdir;

use engine::{Engine, Options};

fn bench_options(dir: &std::path::Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        ..Options::default()
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("bench-key-{:09}", i).into_bytes()
}

fn bench_put(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(bench_options(dir.path())).unwrap();
    let value = vec![b'x'; 128];

    let mut i = 0usize;
    c.bench_function("put", |b| {
        b.iter(|| {
            engine.put(&key(i), &value).unwrap();
            i += 1;
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(bench_options(dir.path())).unwrap();
    let value = vec![b'x'; 128];
    for i in 0..10_000 {
        engine.put(&key(i), &value).unwrap();
    }

    let mut rng = rand::thread_rng();
    c.bench_function("get", |b| {
        b.iter(|| {
            let _ = engine.get(&key(rng.gen_range(0..10_000))).unwrap();
        })
    });
}

fn bench_delete(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(bench_options(dir.path())).unwrap();
    let value = vec![b'x'; 128];
    for i in 0..100_000 {
        engine.put(&key(i), &value).unwrap();
    }

    let mut i = 0usize;
    c.bench_function("delete", |b| {
        b.iter(|| {
            engine.delete(&key(i)).unwrap();
            i += 1;
        })
    });
}

criterion_group!(benches, bench_put, bench_get, bench_delete);
criterion_main!(benches);
