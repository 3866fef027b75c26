/// Read path: get() and scan().
///
/// Point lookups check the memtable first (freshest data), then the SSTs
/// level by level, newest run first. The first match wins; tombstones shadow
/// older values.
///
/// Range scans feed the memtable range and every overlapping SST into a
/// [`MergeIterator`], which keeps the newest version of each key, then
/// filter out tombstones.
use anyhow::Result;
use memtable::{Entry, DELETED_KEY_VALUE, INVALID_VALUE};
use sstable::{MergeIterator, MergeSource};

use crate::Db;

impl Db {
    /// Looks up `key`, returning its value or [`INVALID_VALUE`] if the key
    /// was never written or has been deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is not open or an SST read fails.
    pub fn get(&self, key: u64) -> Result<u64> {
        let lsm = self.lsm()?;

        let raw = match self.mem.get(key) {
            Some(value) => Some(value),
            None => lsm.get(key, &self.pool)?,
        };
        Ok(match raw {
            Some(DELETED_KEY_VALUE) | None => INVALID_VALUE,
            Some(value) => value,
        })
    }

    /// Collects every live pair with `low <= key <= high` into `out`, in
    /// ascending key order.
    ///
    /// `out` is cleared first, and left empty on error. `low > high` yields
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is not open or an SST read fails.
    pub fn scan(&self, low: u64, high: u64, out: &mut Vec<Entry>) -> Result<()> {
        out.clear();
        let lsm = self.lsm()?;
        if low > high {
            return Ok(());
        }

        let mut sources: Vec<MergeSource<'_>> = Vec::new();
        sources.push(Box::new(self.mem.range(low, high).map(Ok::<Entry, anyhow::Error>)));
        sources.extend(lsm.range_sources(low, high, &self.pool));

        for item in MergeIterator::new(sources) {
            match item {
                Ok((_, DELETED_KEY_VALUE)) => {}
                Ok(entry) => out.push(entry),
                Err(e) => {
                    out.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
