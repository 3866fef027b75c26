///! # Bloom Filter
///!
///! A space-efficient probabilistic membership test over `u64` keys.
///!
///! A bloom filter can tell you with certainty that a key is **not** in the set
///! (no false negatives), but may occasionally report that a key **is** in the
///! set when it isn't (false positives). The false positive rate is governed
///! by the bits-per-key budget and the number of hash functions derived from it.
///!
///! ## Usage in LevelKV
///!
///! Every SSTable written with `bloom_filter_bits > 0` embeds a filter built
///! from its full keyset. Point lookups consult it before touching any page:
///! a negative answer skips the SSTable without a single buffer pool access.
///!
///! ## Example
///!
///! ```rust
///! use bloom::BloomFilter;
///!
///! let mut bf = BloomFilter::new(1000, 8);
///! bf.insert(42);
///! assert!(bf.may_contain(42));
///! ```
use std::io::{self, Read, Write};

/// Smallest bit vector we allocate, so tiny SSTables still get a useful filter.
const MIN_BITS: u64 = 64;

/// A bloom filter backed by a bit vector with `k` independent hash functions.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are derived
/// from FNV-1a with two different seeds.
pub struct BloomFilter {
    /// The bit vector storing the filter state.
    bits: Vec<u8>,
    /// Number of bits in the filter.
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: u32,
    /// Number of keys inserted, used by `theoretical_fpr`.
    num_keys: u64,
}

impl BloomFilter {
    /// Creates a filter for `expected_keys` keys with `bits_per_key` bits each.
    ///
    /// The number of hash functions is `round(bits_per_key * ln 2)`, which
    /// minimizes the false positive rate for that budget.
    ///
    /// # Panics
    ///
    /// Panics if `bits_per_key` is 0 (a disabled filter is represented by not
    /// building one at all).
    pub fn new(expected_keys: usize, bits_per_key: usize) -> Self {
        assert!(bits_per_key > 0, "bits_per_key must be > 0");

        let m = (expected_keys.max(1) as u64)
            .saturating_mul(bits_per_key as u64)
            .max(MIN_BITS);
        let k = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        let k = k.clamp(1, 30);

        let byte_len = m.div_ceil(8) as usize;

        Self {
            bits: vec![0u8; byte_len],
            num_bits: m,
            num_hashes: k,
            num_keys: 0,
        }
    }

    /// Creates a bloom filter from raw parts (used during deserialization).
    fn from_raw(bits: Vec<u8>, num_bits: u64, num_hashes: u32, num_keys: u64) -> Self {
        Self {
            bits,
            num_bits,
            num_hashes,
            num_keys,
        }
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: u64) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
        self.num_keys += 1;
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: u64) -> bool {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            if !self.get_bit(bit_idx) {
                return false;
            }
        }
        true
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Returns the number of keys inserted.
    #[must_use]
    pub fn num_keys(&self) -> u64 {
        self.num_keys
    }

    /// Expected false positive rate for the keys inserted so far:
    /// `(1 - e^(-k * n / m))^k`.
    #[must_use]
    pub fn theoretical_fpr(&self) -> f64 {
        let k = self.num_hashes as f64;
        let n = self.num_keys as f64;
        let m = self.num_bits as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Returns the size of the serialized bloom filter in bytes.
    ///
    /// Layout: `num_bits(u64) + num_keys(u64) + num_hashes(u32) + bits_len(u32) + bits`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 8 + 4 + 4 + self.bits.len()
    }

    /// Serializes the bloom filter to a writer.
    ///
    /// Wire format (all little-endian):
    /// ```text
    /// [num_bits: u64][num_keys: u64][num_hashes: u32][bits_len: u32][bits: bytes]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.num_bits.to_le_bytes())?;
        w.write_all(&self.num_keys.to_le_bytes())?;
        w.write_all(&self.num_hashes.to_le_bytes())?;
        w.write_all(&(self.bits.len() as u32).to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a bloom filter from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf8 = [0u8; 8];
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf8)?;
        let num_bits = u64::from_le_bytes(buf8);

        r.read_exact(&mut buf8)?;
        let num_keys = u64::from_le_bytes(buf8);

        r.read_exact(&mut buf4)?;
        let num_hashes = u32::from_le_bytes(buf4);

        r.read_exact(&mut buf4)?;
        let bits_len = u32::from_le_bytes(buf4) as usize;

        // Safety cap: bloom filter should not exceed 128 MiB
        const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;
        if bits_len > MAX_BLOOM_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} bytes", bits_len),
            ));
        }
        if num_bits == 0 || num_bits.div_ceil(8) != bits_len as u64 || num_hashes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "inconsistent bloom filter header: num_bits={} bits_len={} num_hashes={}",
                    num_bits, bits_len, num_hashes
                ),
            ));
        }

        let mut bits = vec![0u8; bits_len];
        r.read_exact(&mut bits)?;

        Ok(Self::from_raw(bits, num_bits, num_hashes, num_keys))
    }

    // ---- Internal helpers ----

    /// Double hashing: h(i) = (h1 + i * h2) mod num_bits.
    fn get_bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        self.bits[byte_idx] |= 1 << bit_offset;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        (self.bits[byte_idx] >> bit_offset) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("num_keys", &self.num_keys)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// Computes two independent 64-bit hashes using FNV-1a with different seeds.
///
/// Sequential integer keys differ only in their low bytes, so both hashes go
/// through a final avalanche step. `h2` is forced odd so the probe sequence
/// never collapses onto `h1`.
fn hash_pair(key: u64) -> (u64, u64) {
    let bytes = key.to_le_bytes();
    let h1 = mix64(fnv1a_64(&bytes, 0xcbf29ce484222325));
    let h2 = mix64(fnv1a_64(&bytes, 0x517cc1b727220a95)) | 1;
    (h1, h2)
}

/// splitmix64 finalizer.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
