/// Write path: `put()`, `update()`, `delete()`, `force_flush()`, and the
/// internal `flush()`.
///
/// All mutations flow through this module. A write that would overflow the
/// memtable first persists the full memtable as a new level-0 SST, then
/// lands in a fresh one.
use anyhow::{ensure, Result};
use memtable::{Memtable, DELETED_KEY_VALUE};

use crate::{check_value, Db};

impl Db {
    /// Inserts or overwrites `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is not open, `value` is one of the
    /// reserved sentinels, or a triggered flush fails.
    pub fn put(&mut self, key: u64, value: u64) -> Result<()> {
        check_value(value)?;
        self.write_entry(key, value)
    }

    /// Same as [`put`](Db::put); kept as a separate entry point because
    /// workloads distinguish the two.
    pub fn update(&mut self, key: u64, value: u64) -> Result<()> {
        check_value(value)?;
        self.write_entry(key, value)
    }

    /// Deletes `key` by writing a tombstone that shadows older values.
    pub fn delete(&mut self, key: u64) -> Result<()> {
        self.write_entry(key, DELETED_KEY_VALUE)
    }

    fn write_entry(&mut self, key: u64, value: u64) -> Result<()> {
        self.lsm()?;
        if !self.fits_in_memtable(key) {
            self.flush()?;
        }
        ensure!(
            self.mem.put(key, value),
            "memtable rejected key {} after flush (capacity {} bytes)",
            key,
            self.mem.capacity()
        );
        Ok(())
    }

    /// Writes the memtable to a new level-0 SST now.
    ///
    /// This is a no-op if the memtable is empty. Over-budget levels are
    /// compacted afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is not open or on I/O failure.
    pub fn force_flush(&mut self) -> Result<()> {
        self.lsm()?;
        if self.mem.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    /// Internal flush. Callers should use [`force_flush`](Db::force_flush)
    /// or rely on the automatic flush in the write methods.
    ///
    /// # Steps
    ///
    /// 1. Swap the full memtable for an empty one of the same capacity.
    /// 2. Write it as a level-0 SST. On failure the memtable is put back.
    /// 3. Run leveled compaction.
    pub(crate) fn flush(&mut self) -> Result<()> {
        let full = std::mem::replace(&mut self.mem, Memtable::new(self.config.memtable_capacity));
        let flushed = self.lsm_and_pool().and_then(|(lsm, _)| lsm.flush(&full));
        if let Err(e) = flushed {
            self.mem = full;
            return Err(e);
        }
        let (lsm, pool) = self.lsm_and_pool()?;
        lsm.maybe_compact(pool)?;
        Ok(())
    }
}
