use config::{DbConfig, EvictionPolicyType, SearchType};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::workload::{apply_writes, skewed_operations, unique_shuffled_keys};
use engine::Db;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::{tempdir, TempDir};

const N_KEYS: u64 = 20_000;
/// 1024 entries per memtable, so a load produces ~20 runs.
const MEMTABLE_BYTES: usize = 16 * 1024;

fn bench_config(search: SearchType, policy: EvictionPolicyType) -> DbConfig {
    DbConfig::default()
        .with_memtable_capacity(MEMTABLE_BYTES)
        .with_search_type(search)
        .with_eviction_policy(policy)
        .with_buffer_pool(8, 64)
        .with_size_ratio(4)
        .with_max_levels(4)
}

/// A database holding keys `1..=N_KEYS` with value `key * 10`.
fn loaded_db(config: DbConfig) -> (TempDir, Db) {
    let dir = tempdir().unwrap();
    let mut db = Db::open_with(dir.path().join("db"), config).unwrap();
    for key in unique_shuffled_keys(N_KEYS, &mut StdRng::seed_from_u64(42)) {
        db.put(key, key * 10).unwrap();
    }
    db.force_flush().unwrap();
    (dir, db)
}

fn strategies() -> Vec<(String, DbConfig)> {
    let mut out = Vec::new();
    for search in [SearchType::BinarySearch, SearchType::BTreeSearch] {
        for policy in [EvictionPolicyType::Lru, EvictionPolicyType::Clock] {
            out.push((format!("{}_{}", search, policy), bench_config(search, policy)));
        }
    }
    out
}

fn db_put_benchmark(c: &mut Criterion) {
    let ops = skewed_operations(N_KEYS as usize, 5, &mut StdRng::seed_from_u64(7));
    c.bench_function("db_put_skewed_20k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let config = bench_config(SearchType::BinarySearch, EvictionPolicyType::Lru);
                let db = Db::open_with(dir.path().join("db"), config).unwrap();
                (dir, db)
            },
            |(_dir, mut db)| {
                apply_writes(&mut db, &ops).unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

fn db_get_benchmark(c: &mut Criterion) {
    let probes = unique_shuffled_keys(N_KEYS, &mut StdRng::seed_from_u64(8));
    for (name, config) in strategies() {
        let (_dir, db) = loaded_db(config);
        c.bench_function(&format!("db_get_hit_1k_{}", name), |b| {
            b.iter(|| {
                for &key in &probes[..1_000] {
                    assert_eq!(db.get(key).unwrap(), key * 10);
                }
            });
        });
    }
}

fn db_scan_benchmark(c: &mut Criterion) {
    for (name, config) in strategies() {
        let (_dir, db) = loaded_db(config);
        let mut out = Vec::with_capacity(N_KEYS as usize);
        c.bench_function(&format!("db_scan_all_{}", name), |b| {
            b.iter(|| {
                db.scan(1, N_KEYS, &mut out).unwrap();
                assert_eq!(out.len(), N_KEYS as usize);
            });
        });
    }
}

criterion_group!(benches, db_put_benchmark, db_get_benchmark, db_scan_benchmark);
criterion_main!(benches);
