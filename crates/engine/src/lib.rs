//! # Engine - LevelKV storage engine
//!
//! The central orchestrator that ties together the [`memtable`],
//! [`sstable`] and [`bufferpool`] crates into an LSM-tree store of `u64`
//! keys and `u64` values.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                      DB                       │
//! │                                               │
//! │ write.rs → Memtable insert                    │
//! │              |                                │
//! │              |  (next key would overflow?)    │
//! │              |            yes                 │
//! │              v                                │
//! │           flush() → new level-0 SST           │
//! │              |                                │
//! │              |  (level over budget?)          │
//! │              |            yes                 │
//! │              v                                │
//! │           merge into the next level           │
//! │                                               │
//! │ read.rs → Memtable → level0 → level1 → ...    │
//! │            (first match wins)                 │
//! │                 |                             │
//! │                 v                             │
//! │            BufferPool (pages)                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | [`lib.rs`]     | `Db` struct, open, accessors, `Debug`, `Drop`        |
//! | [`lsm`]        | Level layout, flush registration, leveled merges     |
//! | [`manifest`]   | Live runs per level, rewritten atomically            |
//! | [`write`]      | `put()`, `update()`, `delete()`, `force_flush()`     |
//! | [`read`]       | `get()`, `scan()`                                    |
//! | [`compaction`] | `compact()` full merge, `maybe_compact()`            |
//! | [`workload`]   | Seeded key and operation generators                  |
//!
//! ## Values
//!
//! Two values are reserved: [`INVALID_VALUE`] is what [`Db::get`] returns
//! for a missing or deleted key, and [`DELETED_KEY_VALUE`] is the tombstone
//! stored on delete. Writes of either value are rejected.
//!
//! ## Durability
//!
//! There is no write-ahead log. Entries still in the memtable are lost on a
//! crash; [`Db::close`] and `Drop` flush them. SST files are written to a
//! temp file, fsynced and renamed, so a crash never leaves a partial run.
//! The manifest decides which runs are live: a file left behind by a crash
//! mid-compaction is deleted on the next open instead of being loaded.

mod compaction;
pub mod lsm;
pub mod manifest;
mod read;
pub mod workload;
mod write;

use anyhow::{anyhow, ensure, Result};
use bufferpool::{BufferPool, BufferPoolStats};
use lsm::LsmTree;
use std::path::Path;
use tracing::info;

pub use config::{DbConfig, EvictionPolicyType, SearchType, KV_BYTE_SIZE};
pub use memtable::{Entry, Memtable, DELETED_KEY_VALUE, INVALID_VALUE};

/// An embedded key-value database.
///
/// # Write Path
///
/// 1. Reject reserved values.
/// 2. If the key would overflow the memtable, swap in an empty memtable,
///    write the full one as a level-0 SST and compact over-budget levels.
/// 3. Apply the write to the memtable.
///
/// # Read Path
///
/// 1. Check the memtable (freshest data, includes tombstones).
/// 2. Check SSTs level by level, newest run first.
/// 3. First match wins; a tombstone hides older values.
///
/// A `Db` is created closed; [`Db::open`] attaches it to a directory.
pub struct Db {
    pub(crate) config: DbConfig,
    pub(crate) mem: Memtable,
    pub(crate) lsm: Option<LsmTree>,
    pub(crate) pool: BufferPool,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path())
            .field("memtable_capacity", &self.config.memtable_capacity)
            .field("memtable_entries", &self.mem.len())
            .field("search_type", &self.config.search_type)
            .field("bloom_filter_bits", &self.config.bloom_filter_bits)
            .field("level_sst_counts", &self.level_sst_counts())
            .field("buffer_pool", &self.pool)
            .finish()
    }
}

impl Db {
    /// Creates a closed database with the given options.
    ///
    /// Nothing touches the disk until [`open`](Db::open).
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails [`DbConfig::validate`].
    pub fn new(config: DbConfig) -> Result<Self> {
        config.validate()?;
        let pool = BufferPool::new(config.buffer_pool_min, config.buffer_pool_max, config.eviction_policy)?;
        let mem = Memtable::new(config.memtable_capacity);
        Ok(Self {
            config,
            mem,
            lsm: None,
            pool,
        })
    }

    /// Creates a database and opens it at `path`.
    pub fn open_with<P: AsRef<Path>>(path: P, config: DbConfig) -> Result<Self> {
        let mut db = Self::new(config)?;
        db.open(path)?;
        Ok(db)
    }

    /// Opens the database directory at `path`, creating it if needed.
    ///
    /// Existing `level<N>` directories are loaded, so data flushed by an
    /// earlier instance is visible again.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is already open, the directory
    /// cannot be created or read, or an existing SST is corrupt.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if let Some(lsm) = &self.lsm {
            return Err(anyhow!("database is already open at {}", lsm.root().display()));
        }
        let lsm = LsmTree::open(path, &self.config)?;
        info!(
            path = %lsm.root().display(),
            search = %self.config.search_type,
            eviction = %self.config.eviction_policy,
            bloom_bits = self.config.bloom_filter_bits,
            "opened database"
        );
        self.lsm = Some(lsm);
        Ok(())
    }

    /// Flushes the memtable and detaches from the directory.
    ///
    /// Cached pages are dropped. The database can be opened again, at the
    /// same or another path. Closing a closed database is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.lsm.is_none() {
            return Ok(());
        }
        self.force_flush()?;
        self.lsm = None;
        self.pool
            .reset(self.config.buffer_pool_min, self.config.buffer_pool_max, self.config.eviction_policy)
    }

    /// Replaces the buffer pool bounds and eviction policy, dropping every
    /// cached page.
    ///
    /// # Errors
    ///
    /// Returns an error if `min_size` is 0 or exceeds `max_size`; the
    /// current pool is kept in that case.
    pub fn reset_buffer_pool(&mut self, min_size: usize, max_size: usize, policy: EvictionPolicyType) -> Result<()> {
        self.pool.reset(min_size, max_size, policy)?;
        self.config.buffer_pool_min = min_size;
        self.config.buffer_pool_max = max_size;
        self.config.eviction_policy = policy;
        Ok(())
    }

    pub(crate) fn lsm(&self) -> Result<&LsmTree> {
        self.lsm.as_ref().ok_or_else(|| anyhow!("database is not open"))
    }

    /// The tree together with the pool its readers cache pages in.
    pub(crate) fn lsm_and_pool(&mut self) -> Result<(&mut LsmTree, &BufferPool)> {
        let lsm = self.lsm.as_mut().ok_or_else(|| anyhow!("database is not open"))?;
        Ok((lsm, &self.pool))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lsm.is_some()
    }

    /// Directory of the open database.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.lsm.as_ref().map(LsmTree::root)
    }

    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Number of SSTs in each level, top first. Empty when closed.
    #[must_use]
    pub fn level_sst_counts(&self) -> Vec<usize> {
        self.lsm.as_ref().map(LsmTree::level_sst_counts).unwrap_or_default()
    }

    /// Total number of SSTs across all levels.
    #[must_use]
    pub fn sst_count(&self) -> usize {
        self.lsm.as_ref().map_or(0, LsmTree::sst_count)
    }

    /// Entries in the memtable, tombstones included.
    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.mem.len()
    }

    #[must_use]
    pub fn buffer_pool_stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    /// Pages currently cached.
    #[must_use]
    pub fn buffer_pool_len(&self) -> usize {
        self.pool.len()
    }

    /// The level layout, for inspection. `None` when closed.
    #[must_use]
    pub fn lsm_tree(&self) -> Option<&LsmTree> {
        self.lsm.as_ref()
    }

    /// `true` when a write of `key` would succeed without a flush.
    pub(crate) fn fits_in_memtable(&self, key: u64) -> bool {
        !self.mem.would_overflow(key)
    }
}

/// Best-effort flush on drop.
///
/// Entries remaining in the memtable are written to a level-0 SST so a
/// later [`Db::open`] sees them. Errors are ignored because `Drop` cannot
/// propagate them; call [`Db::close`] to observe failures.
impl Drop for Db {
    fn drop(&mut self) {
        if self.lsm.is_some() && !self.mem.is_empty() {
            let _ = self.flush();
        }
    }
}

/// Checks that `value` is storable.
pub(crate) fn check_value(value: u64) -> Result<()> {
    ensure!(
        !memtable::is_reserved_value(value),
        "value {:#x} is reserved and cannot be stored",
        value
    );
    Ok(())
}

#[cfg(test)]
mod tests;
