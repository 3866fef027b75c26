/// Compaction: explicit full merges and the leveled trigger check.
///
/// The level bookkeeping lives in [`LsmTree`](crate::lsm::LsmTree); this
/// module exposes it on [`Db`] with the memtable taken into account.
use anyhow::Result;

use crate::lsm::CompactionStats;
use crate::Db;

impl Db {
    /// Flushes the memtable and merges every SST into one run in the
    /// deepest level (level 0 in single-level mode).
    ///
    /// Tombstones are dropped: after a full merge no older run is left for
    /// them to shadow.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is not open or on I/O failure. On
    /// failure the input SSTs are kept.
    pub fn compact(&mut self) -> Result<CompactionStats> {
        self.force_flush()?;
        let (lsm, pool) = self.lsm_and_pool()?;
        lsm.compact_all(pool)
    }

    /// Runs leveled compaction until no level is over budget. Returns the
    /// number of merges. Always 0 in single-level mode.
    pub fn maybe_compact(&mut self) -> Result<usize> {
        let (lsm, pool) = self.lsm_and_pool()?;
        lsm.maybe_compact(pool)
    }
}
