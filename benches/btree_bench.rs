use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use bplusdb::{BPlusTree, TreeConfig};
use tempfile::TempDir;

const KEY_COUNT: u32 = 2_000;

fn key(i: u32) -> Vec<u8> {
    format!("key{:08}", i).into_bytes()
}

fn populated_tree(count: u32) -> (BPlusTree, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut tree =
        BPlusTree::open_with_config(dir.path().join("bench.db"), TreeConfig::default()).unwrap();
    for i in 0..count {
        tree.insert(&key(i), &[0xAB; 64]).unwrap();
    }
    (tree, dir)
}

fn btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/insert");
    group.sample_size(20);
    group.throughput(Throughput::Elements(KEY_COUNT as u64));

    group.bench_function("sequential", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let tree = BPlusTree::open(dir.path().join("bench.db")).unwrap();
                (tree, dir)
            },
            |(mut tree, _dir)| {
                for i in 0..KEY_COUNT {
                    tree.insert(&key(i), &[0xAB; 64]).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

fn btree_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/get");
    let (tree, _dir) = populated_tree(KEY_COUNT);
    let mut i = 0u32;

    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        b.iter(|| {
            i = (i + 7919) % KEY_COUNT;
            black_box(tree.get(&key(i)).unwrap())
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(tree.get(b"zzz").is_err()));
    });

    group.finish();
}

criterion_group!(benches, btree_insert, btree_get);
criterion_main!(benches);
