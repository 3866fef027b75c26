use crate::Db;
use anyhow::Result;
use config::{DbConfig, EvictionPolicyType, SearchType};
use std::fs;
use std::path::Path;

/// Counts `.sst` files across every level directory under `root`.
pub fn count_sst_files(root: &Path) -> usize {
    fs::read_dir(root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .flat_map(|level| fs::read_dir(level.path()).unwrap().filter_map(|e| e.ok()))
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}

/// Four-entry memtable, ratio 2, three levels, bloom filters on.
pub fn leveled_config() -> DbConfig {
    DbConfig::default()
        .with_memtable_capacity(4 * crate::KV_BYTE_SIZE)
        .with_bloom_filter_bits(8)
        .with_size_ratio(2)
        .with_max_levels(3)
        .with_buffer_pool(2, 16)
}

/// Same sizes as [`leveled_config`] without bloom filters: every flush stays
/// in level 0.
pub fn single_level_config() -> DbConfig {
    leveled_config().with_bloom_filter_bits(0)
}

/// Every combination of search strategy and eviction policy.
pub fn all_strategies(base: &DbConfig) -> Vec<DbConfig> {
    let mut configs = Vec::new();
    for search in [SearchType::BinarySearch, SearchType::BTreeSearch] {
        for policy in [EvictionPolicyType::Lru, EvictionPolicyType::Clock] {
            configs.push(base.clone().with_search_type(search).with_eviction_policy(policy));
        }
    }
    configs
}

/// Opens a database in `root/db`.
pub fn open_db(root: &Path, config: DbConfig) -> Result<Db> {
    Db::open_with(root.join("db"), config)
}
