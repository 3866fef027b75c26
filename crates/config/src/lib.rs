//! # Config - LevelKV engine configuration
//!
//! Construction-time options for a [`DbConfig`]-driven database, plus the two
//! strategy enums shared by the lower crates ([`SearchType`] for the SSTable
//! page-locate strategy and [`EvictionPolicyType`] for the buffer pool).
//!
//! ## Environment
//!
//! [`DbConfig::from_env`] layers environment variables over the defaults:
//!
//! ```text
//! LEVELKV_MEMTABLE_KB  Memtable capacity in KiB      (default: 1024 = 1 MiB)
//! LEVELKV_SEARCH       binary | btree                (default: binary)
//! LEVELKV_EVICTION     lru | clock                   (default: lru)
//! LEVELKV_BLOOM_BITS   Bloom bits per key, 0 = off   (default: 8)
//! LEVELKV_POOL_MIN     Buffer pool min pages         (default: 8)
//! LEVELKV_POOL_MAX     Buffer pool max pages         (default: 256)
//! LEVELKV_SIZE_RATIO   Level size ratio              (default: 8)
//! LEVELKV_MAX_LEVELS   Number of LSM levels          (default: 8)
//! ```

use anyhow::{bail, ensure, Result};
use std::fmt;
use std::str::FromStr;

/// Size of one key-value pair on disk and in the memtable: two `u64`s.
pub const KV_BYTE_SIZE: usize = 16;

/// Default memtable capacity (1 MiB).
pub const DEFAULT_MEMTABLE_CAPACITY: usize = 1024 * 1024;
/// Default bloom filter bits per key.
pub const DEFAULT_BLOOM_FILTER_BITS: usize = 8;
/// Default buffer pool floor, in pages.
pub const DEFAULT_BUFFER_POOL_MIN: usize = 8;
/// Default buffer pool capacity, in pages.
pub const DEFAULT_BUFFER_POOL_MAX: usize = 256;
/// Default ratio between the capacities of adjacent levels.
pub const DEFAULT_SIZE_RATIO: usize = 8;
/// Default number of LSM levels.
pub const DEFAULT_MAX_LEVELS: usize = 8;

/// Strategy used to locate the page holding a key inside an SSTable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchType {
    /// Binary search over an in-memory array of page fence keys.
    #[default]
    BinarySearch,
    /// Descent through a shallow tree of on-disk index pages.
    BTreeSearch,
}

impl SearchType {
    /// Stable on-disk tag.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            SearchType::BinarySearch => 0,
            SearchType::BTreeSearch => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SearchType::BinarySearch),
            1 => Some(SearchType::BTreeSearch),
            _ => None,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchType::BinarySearch => write!(f, "BinarySearch"),
            SearchType::BTreeSearch => write!(f, "BTreeSearch"),
        }
    }
}

impl FromStr for SearchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "binarysearch" => Ok(SearchType::BinarySearch),
            "btree" | "btreesearch" => Ok(SearchType::BTreeSearch),
            other => bail!("unknown search type: {}", other),
        }
    }
}

/// Page replacement strategy of the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionPolicyType {
    #[default]
    Lru,
    Clock,
}

impl fmt::Display for EvictionPolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicyType::Lru => write!(f, "LRU"),
            EvictionPolicyType::Clock => write!(f, "CLOCK"),
        }
    }
}

impl FromStr for EvictionPolicyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicyType::Lru),
            "clock" => Ok(EvictionPolicyType::Clock),
            other => bail!("unknown eviction policy: {}", other),
        }
    }
}

/// Construction-time options of a database.
///
/// `bloom_filter_bits == 0` disables bloom filters and selects the
/// single-level mode: every flushed run stays in `level0` and no compaction
/// runs automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Memtable capacity in bytes (16 bytes per entry).
    pub memtable_capacity: usize,
    pub search_type: SearchType,
    pub eviction_policy: EvictionPolicyType,
    /// Bloom filter bits per key; `0` disables filters and leveling.
    pub bloom_filter_bits: usize,
    /// Buffer pool floor, in pages.
    pub buffer_pool_min: usize,
    /// Buffer pool capacity, in pages.
    pub buffer_pool_max: usize,
    /// Capacity ratio between adjacent levels, and the level-0 run limit.
    pub size_ratio: usize,
    /// Number of levels; the last one never compacts further.
    pub max_levels: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            memtable_capacity: DEFAULT_MEMTABLE_CAPACITY,
            search_type: SearchType::default(),
            eviction_policy: EvictionPolicyType::default(),
            bloom_filter_bits: DEFAULT_BLOOM_FILTER_BITS,
            buffer_pool_min: DEFAULT_BUFFER_POOL_MIN,
            buffer_pool_max: DEFAULT_BUFFER_POOL_MAX,
            size_ratio: DEFAULT_SIZE_RATIO,
            max_levels: DEFAULT_MAX_LEVELS,
        }
    }
}

impl DbConfig {
    pub fn with_memtable_capacity(mut self, bytes: usize) -> Self {
        self.memtable_capacity = bytes;
        self
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicyType) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_bloom_filter_bits(mut self, bits: usize) -> Self {
        self.bloom_filter_bits = bits;
        self
    }

    pub fn with_buffer_pool(mut self, min_size: usize, max_size: usize) -> Self {
        self.buffer_pool_min = min_size;
        self.buffer_pool_max = max_size;
        self
    }

    pub fn with_size_ratio(mut self, ratio: usize) -> Self {
        self.size_ratio = ratio;
        self
    }

    pub fn with_max_levels(mut self, levels: usize) -> Self {
        self.max_levels = levels;
        self
    }

    /// Number of entries the memtable holds before it must be flushed.
    #[must_use]
    pub fn memtable_entries(&self) -> usize {
        (self.memtable_capacity / KV_BYTE_SIZE).max(1)
    }

    /// `true` when bloom filters and the leveled compaction path are on.
    #[must_use]
    pub fn leveled(&self) -> bool {
        self.bloom_filter_bits > 0
    }

    /// Checks that the options are mutually consistent.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.memtable_capacity >= KV_BYTE_SIZE,
            "memtable capacity must hold at least one entry ({} bytes), got {}",
            KV_BYTE_SIZE,
            self.memtable_capacity
        );
        ensure!(self.buffer_pool_min >= 1, "buffer pool min size must be >= 1");
        ensure!(
            self.buffer_pool_min <= self.buffer_pool_max,
            "buffer pool min size {} exceeds max size {}",
            self.buffer_pool_min,
            self.buffer_pool_max
        );
        ensure!(self.size_ratio >= 2, "size ratio must be >= 2");
        ensure!(self.max_levels >= 1, "max levels must be >= 1");
        ensure!(
            self.bloom_filter_bits <= 64,
            "bloom filter bits per key must be <= 64, got {}",
            self.bloom_filter_bits
        );
        Ok(())
    }

    /// Defaults overridden by `LEVELKV_*` environment variables.
    ///
    /// Unset variables keep their default; malformed values are an error.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(kb) = env_parse::<usize>("LEVELKV_MEMTABLE_KB")? {
            cfg.memtable_capacity = kb * 1024;
        }
        if let Some(search) = env_parse::<SearchType>("LEVELKV_SEARCH")? {
            cfg.search_type = search;
        }
        if let Some(policy) = env_parse::<EvictionPolicyType>("LEVELKV_EVICTION")? {
            cfg.eviction_policy = policy;
        }
        if let Some(bits) = env_parse::<usize>("LEVELKV_BLOOM_BITS")? {
            cfg.bloom_filter_bits = bits;
        }
        if let Some(min) = env_parse::<usize>("LEVELKV_POOL_MIN")? {
            cfg.buffer_pool_min = min;
        }
        if let Some(max) = env_parse::<usize>("LEVELKV_POOL_MAX")? {
            cfg.buffer_pool_max = max;
        }
        if let Some(ratio) = env_parse::<usize>("LEVELKV_SIZE_RATIO")? {
            cfg.size_ratio = ratio;
        }
        if let Some(levels) = env_parse::<usize>("LEVELKV_MAX_LEVELS")? {
            cfg.max_levels = levels;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Reads and parses an environment variable, `None` when unset.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {:?} ({})", key, raw, e)),
        Err(_) => Ok(None),
    }
}
