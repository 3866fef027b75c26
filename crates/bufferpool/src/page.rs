//! The unit of disk I/O and of caching.

/// Identity of a page: the SSTable it belongs to and its page number inside
/// that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub sst_id: u64,
    pub page_no: u64,
}

impl PageId {
    #[must_use]
    pub fn new(sst_id: u64, page_no: u64) -> Self {
        Self { sst_id, page_no }
    }
}

/// A decoded, immutable page of `(key, value)` pairs.
///
/// Data pages hold user entries sorted by key. Index pages (B-tree search)
/// reuse the same shape with `(separator_key, child_page_no)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    id: PageId,
    entries: Vec<(u64, u64)>,
}

impl Page {
    pub fn new(id: PageId, entries: Vec<(u64, u64)>) -> Self {
        Self { id, entries }
    }

    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[must_use]
    pub fn entries(&self) -> &[(u64, u64)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn first_key(&self) -> Option<u64> {
        self.entries.first().map(|e| e.0)
    }

    #[must_use]
    pub fn last_key(&self) -> Option<u64> {
        self.entries.last().map(|e| e.0)
    }

    /// Binary search for an exact key.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<u64> {
        self.entries
            .binary_search_by_key(&key, |e| e.0)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Index of the first entry with key `>= key` (may equal `len()`).
    #[must_use]
    pub fn lower_bound(&self, key: u64) -> usize {
        self.entries.partition_point(|e| e.0 < key)
    }

    /// Index of the last entry with key `<= key`, if any.
    #[must_use]
    pub fn floor_index(&self, key: u64) -> Option<usize> {
        self.entries.partition_point(|e| e.0 <= key).checked_sub(1)
    }
}
