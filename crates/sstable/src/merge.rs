//! K-way merge over sorted sources.
//!
//! Produces entries in ascending key order. When the same key appears in
//! several sources, only the entry from the source with the **lowest index**
//! is emitted: callers order sources newest-first, so the newest wins.
//! Tombstones pass through untouched; dropping them is the caller's call.
//!
//! This is the core primitive for both range scans (memtable + SSTables) and
//! compaction (SSTables of two levels).

use anyhow::Result;
use memtable::Entry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One sorted input of a [`MergeIterator`].
pub type MergeSource<'a> = Box<dyn Iterator<Item = Result<Entry>> + 'a>;

/// The pending head of one source.
struct HeapEntry {
    key: u64,
    value: u64,
    /// Index into `sources`; lower is newer.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first,
        // and on a tie the newest (lowest index) source.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted sources into one deduplicated sorted stream.
///
/// The iterator is lazy: it holds one pending entry per source. The first
/// error from any source is yielded and ends the merge.
pub struct MergeIterator<'a> {
    sources: Vec<MergeSource<'a>>,
    heap: BinaryHeap<HeapEntry>,
    /// Error hit while priming the heap, yielded first.
    pending_error: Option<anyhow::Error>,
    failed: bool,
}

impl<'a> MergeIterator<'a> {
    /// Creates a merge over `sources`, ordered newest-first.
    pub fn new(sources: Vec<MergeSource<'a>>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_error: None,
            failed: false,
        };
        for source in 0..merge.sources.len() {
            if let Err(e) = merge.refill(source) {
                merge.pending_error = Some(e);
                break;
            }
        }
        merge
    }

    /// Collects all remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<Entry>> {
        self.by_ref().collect()
    }

    /// Pulls the next entry of `source` onto the heap.
    fn refill(&mut self, source: usize) -> Result<()> {
        match self.sources[source].next() {
            Some(Ok((key, value))) => {
                self.heap.push(HeapEntry { key, value, source });
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };
        // A failing source still lets `top` out; the error comes next.
        if let Err(e) = self.refill(top.source) {
            self.pending_error.get_or_insert(e);
        }

        // Older copies of the same key are skipped.
        while self.heap.peek().map_or(false, |next| next.key == top.key) {
            if let Some(dup) = self.heap.pop() {
                debug_assert!(dup.source > top.source);
                if let Err(e) = self.refill(dup.source) {
                    self.pending_error.get_or_insert(e);
                }
            }
        }

        Ok(Some((top.key, top.value)))
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
