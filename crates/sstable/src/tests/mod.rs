mod merge_tests;

use crate::*;
use anyhow::Result;
use bufferpool::BufferPool;
use config::{EvictionPolicyType, SearchType};
use memtable::Entry;
use std::path::Path;

/// Small LRU pool shared by the reader tests.
pub(crate) fn pool() -> Result<BufferPool> {
    BufferPool::new(8, 64, EvictionPolicyType::Lru)
}

/// `n` entries with keys `0, step, 2*step, ...` and value `key + 1`.
pub(crate) fn stepped(n: u64, step: u64) -> Vec<Entry> {
    (0..n).map(|i| (i * step, i * step + 1)).collect()
}

/// Writes `entries` as SSTable `id` under `dir` and opens it.
pub(crate) fn write_and_open(
    dir: &Path,
    id: u64,
    search_type: SearchType,
    bloom_bits: usize,
    entries: &[Entry],
) -> Result<SstReader> {
    let path = dir.join(sst_file_name(id));
    SstWriter::write(
        &path,
        id,
        search_type,
        bloom_bits,
        entries.len(),
        entries.iter().copied().map(Ok),
    )?;
    SstReader::open(&path, id)
}
