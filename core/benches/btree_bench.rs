use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use flatdb_core::btree::{OrderedIndex, PairKey};
use tempfile::tempdir;

fn bench_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_1000_order_5", |b| {
        b.iter_batched(
            || tempdir().unwrap(),
            |dir| {
                let mut tree = OrderedIndex::open(dir.path().join("pairs.db"), 5).unwrap();
                for i in 0..1000u32 {
                    tree.create(PairKey::new(i % 37, i)).unwrap();
                }
                dir
            },
            BatchSize::PerIteration,
        )
    });
}

fn bench_group_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut tree = OrderedIndex::open(dir.path().join("pairs.db"), 5).unwrap();
    for i in 0..5000u32 {
        tree.create(PairKey::new(i % 50, i)).unwrap();
    }
    c.bench_function("btree_group_read", |b| b.iter(|| tree.read(&PairKey::group(17)).unwrap()));
}

criterion_group!(benches, bench_insert, bench_group_read);
criterion_main!(benches);
