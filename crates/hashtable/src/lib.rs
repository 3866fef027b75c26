//! # Extendible Hashtable
//!
//! A dynamically growing hash index built from a **directory** of
//! `2^global_depth` slots and a set of fixed-capacity **buckets**. Each slot
//! names the bucket that owns every hash whose low `global_depth` bits equal
//! the slot number. A bucket with `local_depth < global_depth` is shared by
//! `2^(global_depth - local_depth)` slots.
//!
//! Growth is incremental: a full bucket is split in two (one more hash bit
//! tells its entries apart), and the directory doubles only when the
//! splitting bucket is already as deep as the directory. There is never a
//! full-table rehash.
//!
//! ```text
//!  directory (global_depth = 2)          buckets
//!  ┌──────┐
//!  │ 00 ──┼──────────────────────────▶ [A] local_depth 1   (…0)
//!  │ 01 ──┼──────────────┐
//!  │ 10 ──┼──────────────┼───────────▶ [A]
//!  │ 11 ──┼───────┐      └───────────▶ [B] local_depth 2   (…01)
//!  └──────┘       └──────────────────▶ [C] local_depth 2   (…11)
//! ```
//!
//! Buckets live in an arena (`Vec`) and the directory stores arena indices,
//! so doubling is a plain reallocation that copies the old half into the new
//! half.
//!
//! The table is not internally synchronized. Doubling rewrites every slot,
//! so inserts need exclusive access (`&mut self`); the buffer pool holds the
//! table behind its own mutex.

use std::hash::{Hash, Hasher};

/// Default number of entries per bucket.
pub const DEFAULT_BUCKET_CAPACITY: usize = 8;

/// Depth at which buckets stop splitting and are allowed to overflow. Only
/// reachable when many keys share the same low hash bits.
pub const MAX_DEPTH: u32 = 32;

/// 64-bit FNV-1a with a splitmix64 finalizer.
///
/// Deterministic across processes (unlike `RandomState`), so directory
/// layouts are reproducible in tests. The finalizer spreads entropy into the
/// low bits, which are the ones the directory consumes.
#[derive(Debug, Clone, Copy)]
pub struct FnvHasher(u64);

impl Default for FnvHasher {
    fn default() -> Self {
        FnvHasher(0xcbf29ce484222325)
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        const FNV_PRIME: u64 = 0x00000100000001b3;
        for &byte in bytes {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        let mut x = self.0;
        x ^= x >> 30;
        x = x.wrapping_mul(0xbf58476d1ce4e5b9);
        x ^= x >> 27;
        x = x.wrapping_mul(0x94d049bb133111eb);
        x ^ (x >> 31)
    }
}

/// Hashes `key` with [`FnvHasher`].
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut h = FnvHasher::default();
    key.hash(&mut h);
    h.finish()
}

#[derive(Debug, Clone)]
struct Bucket<K, V> {
    local_depth: u32,
    /// `(hash, key, value)`; the hash is kept so splits never rehash.
    entries: Vec<(u64, K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, capacity: usize) -> Self {
        Self {
            local_depth,
            entries: Vec::with_capacity(capacity),
        }
    }
}

/// Directory + bucket hash index. See the crate docs for the layout.
#[derive(Debug, Clone)]
pub struct ExtendibleHashtable<K, V> {
    /// Slot -> index into `buckets`. Length is always `2^global_depth`.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    global_depth: u32,
    initial_depth: u32,
    bucket_capacity: usize,
    len: usize,
}

impl<K: Hash + Eq, V> ExtendibleHashtable<K, V> {
    /// Creates a table with a single-slot directory and the default bucket
    /// capacity.
    pub fn new() -> Self {
        Self::with_capacity(0, DEFAULT_BUCKET_CAPACITY)
    }

    /// Creates a table whose directory starts at `2^initial_depth` slots, each
    /// with its own bucket of `bucket_capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_capacity` is 0 or `initial_depth` exceeds
    /// [`MAX_DEPTH`].
    pub fn with_capacity(initial_depth: u32, bucket_capacity: usize) -> Self {
        assert!(bucket_capacity > 0, "bucket_capacity must be > 0");
        assert!(initial_depth <= MAX_DEPTH, "initial_depth must be <= {}", MAX_DEPTH);

        let slots = 1usize << initial_depth;
        Self {
            directory: (0..slots).collect(),
            buckets: (0..slots)
                .map(|_| Bucket::new(initial_depth, bucket_capacity))
                .collect(),
            global_depth: initial_depth,
            initial_depth,
            bucket_capacity,
            len: 0,
        }
    }

    /// Inserts `key -> value`, returning the previous value if the key was
    /// already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = hash_key(&key);
        loop {
            let b = self.bucket_index(hash);
            let cap = self.bucket_capacity;
            let bucket = &mut self.buckets[b];

            if let Some(slot) = bucket
                .entries
                .iter_mut()
                .find(|(h, k, _)| *h == hash && *k == key)
            {
                return Some(std::mem::replace(&mut slot.2, value));
            }

            if bucket.entries.len() < cap || bucket.local_depth >= MAX_DEPTH {
                bucket.entries.push((hash, key, value));
                self.len += 1;
                return None;
            }

            self.split(b);
        }
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = hash_key(key);
        self.buckets[self.bucket_index(hash)]
            .entries
            .iter()
            .find(|(h, k, _)| *h == hash && k == key)
            .map(|(_, _, v)| v)
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, returning its value. Buckets are never merged back;
    /// the directory keeps its size until [`clear`](Self::clear).
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = hash_key(key);
        let b = self.bucket_index(hash);
        let entries = &mut self.buckets[b].entries;
        let pos = entries.iter().position(|(h, k, _)| *h == hash && k == key)?;
        self.len -= 1;
        Some(entries.swap_remove(pos).2)
    }

    /// Drops every entry and shrinks the directory back to its initial depth.
    pub fn clear(&mut self) {
        *self = Self::with_capacity(self.initial_depth, self.bucket_capacity);
    }

    /// Iterates over all `(key, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter().map(|(_, k, v)| (k, v)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    #[must_use]
    pub fn directory_len(&self) -> usize {
        self.directory.len()
    }

    /// Number of distinct buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    /// Local depth of the bucket referenced by directory `slot`.
    #[must_use]
    pub fn local_depth(&self, slot: usize) -> Option<u32> {
        self.directory.get(slot).map(|&b| self.buckets[b].local_depth)
    }

    /// Verifies the structural invariants, describing the first violation.
    ///
    /// * the directory has `2^global_depth` slots;
    /// * every bucket has `local_depth <= global_depth` and is referenced by
    ///   exactly `2^(global_depth - local_depth)` slots, all agreeing on the
    ///   low `local_depth` bits;
    /// * every entry sits in the bucket its hash selects;
    /// * the cached length matches the entries.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.directory.len() != 1usize << self.global_depth {
            return Err(format!(
                "directory has {} slots, expected 2^{}",
                self.directory.len(),
                self.global_depth
            ));
        }

        let mut refs = vec![0usize; self.buckets.len()];
        for (slot, &b) in self.directory.iter().enumerate() {
            let bucket = self.buckets.get(b).ok_or(format!("slot {} -> missing bucket {}", slot, b))?;
            if bucket.local_depth > self.global_depth {
                return Err(format!(
                    "bucket {} local depth {} exceeds global depth {}",
                    b, bucket.local_depth, self.global_depth
                ));
            }
            refs[b] += 1;
        }

        let mut total = 0;
        for (b, bucket) in self.buckets.iter().enumerate() {
            let expected = 1usize << (self.global_depth - bucket.local_depth);
            if refs[b] != expected {
                return Err(format!(
                    "bucket {} (local depth {}) referenced by {} slots, expected {}",
                    b, bucket.local_depth, refs[b], expected
                ));
            }
            for (hash, _, _) in &bucket.entries {
                if self.bucket_index(*hash) != b {
                    return Err(format!("entry with hash {:#x} stored in wrong bucket {}", hash, b));
                }
            }
            total += bucket.entries.len();
        }

        if total != self.len {
            return Err(format!("len {} but {} entries stored", self.len, total));
        }
        Ok(())
    }

    // ---- Internal helpers ----

    fn bucket_index(&self, hash: u64) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        self.directory[(hash & mask) as usize]
    }

    /// Splits bucket `b` on bit `local_depth`, doubling the directory first
    /// when the bucket is as deep as the directory.
    fn split(&mut self, b: usize) {
        let local = self.buckets[b].local_depth;
        if local == self.global_depth {
            self.double_directory();
        }

        let bit = 1u64 << local;
        let sibling = self.buckets.len();
        self.buckets.push(Bucket::new(local + 1, self.bucket_capacity));
        self.buckets[b].local_depth = local + 1;

        for (slot, target) in self.directory.iter_mut().enumerate() {
            if *target == b && (slot as u64) & bit != 0 {
                *target = sibling;
            }
        }

        let (high, low): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buckets[b].entries)
            .into_iter()
            .partition(|(hash, _, _)| hash & bit != 0);
        self.buckets[b].entries = low;
        self.buckets[sibling].entries = high;

        debug_assert_eq!(self.check_invariants(), Ok(()));
    }

    /// Slot `i + 2^g` starts out pointing where slot `i` points.
    fn double_directory(&mut self) {
        self.directory.extend_from_within(..);
        self.global_depth += 1;
    }
}

impl<K: Hash + Eq, V> Default for ExtendibleHashtable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
