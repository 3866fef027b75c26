//! Lazy page-by-page range iteration over one SSTable.

use anyhow::Result;
use bufferpool::{BufferPool, Page};
use memtable::Entry;
use std::sync::Arc;

use crate::SstReader;

/// Forward iterator over the entries of one SSTable with keys in
/// `[low, high]`, tombstones included.
///
/// Pages are fetched through the buffer pool one at a time as the cursor
/// crosses them. The first error is yielded once and ends the iteration.
/// [`rewind`](SstRangeIter::rewind) restarts from `low`.
pub struct SstRangeIter<'a> {
    reader: &'a SstReader,
    pool: &'a BufferPool,
    low: u64,
    high: u64,
    started: bool,
    done: bool,
    /// Current page and position inside it.
    cursor: Option<(Arc<Page>, usize)>,
    next_page: u64,
}

impl<'a> SstRangeIter<'a> {
    pub(crate) fn new(reader: &'a SstReader, pool: &'a BufferPool, low: u64, high: u64) -> Self {
        Self {
            reader,
            pool,
            low,
            high,
            started: false,
            done: false,
            cursor: None,
            next_page: 0,
        }
    }

    /// Restarts iteration at `low`.
    pub fn rewind(&mut self) {
        self.started = false;
        self.done = false;
        self.cursor = None;
        self.next_page = 0;
    }

    fn seek(&mut self) -> Result<()> {
        self.started = true;
        if !self.reader.overlaps(self.low, self.high) {
            return Ok(());
        }
        let first = self.reader.locate_page(self.low, self.pool)?.unwrap_or(0);
        let page = self.reader.fetch_page(first, self.pool)?;
        let pos = page.lower_bound(self.low);
        self.cursor = Some((page, pos));
        self.next_page = first + 1;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Entry>> {
        if !self.started {
            self.seek()?;
        }
        loop {
            let current = match &self.cursor {
                None => return Ok(None),
                Some((page, pos)) => page.entries().get(*pos).copied(),
            };
            match current {
                Some((key, value)) if key <= self.high => {
                    if let Some((_, pos)) = self.cursor.as_mut() {
                        *pos += 1;
                    }
                    return Ok(Some((key, value)));
                }
                Some(_) => {
                    self.cursor = None;
                    return Ok(None);
                }
                None => {}
            }

            // Current page exhausted.
            if self.next_page >= self.reader.data_pages() {
                self.cursor = None;
                return Ok(None);
            }
            let page = self.reader.fetch_page(self.next_page, self.pool)?;
            self.next_page += 1;
            self.cursor = Some((page, 0));
        }
    }
}

impl Iterator for SstRangeIter<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
