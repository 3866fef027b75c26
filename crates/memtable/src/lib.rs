//! In-memory write buffer of `u64 -> u64` pairs.
//!
//! Deletes are stored as a [`DELETED_KEY_VALUE`] tombstone so they shadow
//! older values that already live in SSTables. Size is accounted as
//! `len * KV_BYTE_SIZE`, matching the on-disk footprint of a flushed run.

use std::collections::BTreeMap;

pub use config::KV_BYTE_SIZE;

/// A key/value pair as stored on disk and returned by scans.
pub type Entry = (u64, u64);

/// Returned by point lookups for absent or deleted keys.
pub const INVALID_VALUE: u64 = u64::MAX;

/// Tombstone marker written in place of a value on delete.
pub const DELETED_KEY_VALUE: u64 = u64::MAX - 1;

/// `true` for the two reserved values no caller may store.
#[must_use]
pub fn is_reserved_value(value: u64) -> bool {
    value == INVALID_VALUE || value == DELETED_KEY_VALUE
}

/// Decoded memtable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemtableValue {
    Value(u64),
    Tombstone,
}

impl MemtableValue {
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        if raw == DELETED_KEY_VALUE {
            MemtableValue::Tombstone
        } else {
            MemtableValue::Value(raw)
        }
    }

    #[must_use]
    pub fn value(self) -> Option<u64> {
        match self {
            MemtableValue::Value(v) => Some(v),
            MemtableValue::Tombstone => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Memtable {
    map: BTreeMap<u64, u64>,
    capacity: usize,
}

impl Memtable {
    /// Creates an empty memtable holding at most `capacity_bytes` worth of
    /// pairs. Capacities below one pair are raised to one pair.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            map: BTreeMap::new(),
            capacity: capacity_bytes.max(KV_BYTE_SIZE),
        }
    }

    /// `true` if writing `key` would push the table past its capacity.
    /// Overwriting a present key never grows the table.
    #[must_use]
    pub fn would_overflow(&self, key: u64) -> bool {
        !self.map.contains_key(&key) && self.size_bytes() + KV_BYTE_SIZE > self.capacity
    }

    /// Inserts or overwrites `key`. Returns `false` (and stores nothing) when
    /// the key is new and the table is full; callers flush first.
    #[must_use]
    pub fn put(&mut self, key: u64, value: u64) -> bool {
        if self.would_overflow(key) {
            return false;
        }
        self.map.insert(key, value);
        debug_assert!(self.size_bytes() <= self.capacity);
        true
    }

    /// Same as [`put`](Self::put); kept for call sites that mean "change".
    #[must_use]
    pub fn update(&mut self, key: u64, value: u64) -> bool {
        self.put(key, value)
    }

    /// Writes a tombstone for `key`, whether or not it is present.
    #[must_use]
    pub fn delete(&mut self, key: u64) -> bool {
        self.put(key, DELETED_KEY_VALUE)
    }

    /// Raw stored value; may be [`DELETED_KEY_VALUE`].
    #[must_use]
    pub fn get(&self, key: u64) -> Option<u64> {
        self.map.get(&key).copied()
    }

    #[must_use]
    pub fn get_entry(&self, key: u64) -> Option<MemtableValue> {
        self.get(key).map(MemtableValue::from_raw)
    }

    #[must_use]
    pub fn contains_key(&self, key: u64) -> bool {
        self.map.contains_key(&key)
    }

    /// Ordered iterator over all pairs, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }

    /// Ordered iterator over `[low, high]`, tombstones included. Empty when
    /// `low > high`.
    pub fn range(&self, low: u64, high: u64) -> impl Iterator<Item = Entry> + '_ {
        let bounds = (low <= high).then_some(low..=high);
        bounds
            .into_iter()
            .flat_map(move |r| self.map.range(r).map(|(&k, &v)| (k, v)))
    }

    #[must_use]
    pub fn min_key(&self) -> Option<u64> {
        self.map.keys().next().copied()
    }

    #[must_use]
    pub fn max_key(&self) -> Option<u64> {
        self.map.keys().next_back().copied()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.map.len() * KV_BYTE_SIZE
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pairs the table can hold.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.capacity / KV_BYTE_SIZE
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
