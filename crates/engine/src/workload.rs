//! Synthetic workload generators for tests and benchmarks.
//!
//! Every generator takes the random source as an argument, so a seeded
//! `StdRng` reproduces the same workload run after run:
//!
//! ```
//! use engine::workload::unique_shuffled_keys;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let a = unique_shuffled_keys(100, &mut StdRng::seed_from_u64(7));
//! let b = unique_shuffled_keys(100, &mut StdRng::seed_from_u64(7));
//! assert_eq!(a, b);
//! ```

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::Db;

/// A write in a generated workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Put,
    Update,
    Delete,
}

impl WriteOp {
    /// Maps the codes `0, 1, 2` to `Put, Update, Delete`.
    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(WriteOp::Put),
            1 => Some(WriteOp::Update),
            2 => Some(WriteOp::Delete),
            _ => None,
        }
    }
}

/// Keys `1..=n` in random order.
pub fn unique_shuffled_keys<R: Rng + ?Sized>(n: u64, rng: &mut R) -> Vec<u64> {
    let mut keys: Vec<u64> = (1..=n).collect();
    keys.shuffle(rng);
    keys
}

/// Shuffles `data` in place.
pub fn shuffle<R: Rng + ?Sized>(data: &mut [u64], rng: &mut R) {
    data.shuffle(rng);
}

/// `n` writes biased towards [`WriteOp::Put`].
///
/// Codes are drawn uniformly from `0..=2 + skew`; anything above 2 counts
/// as a put. With `skew == 0` the three kinds are equally likely.
pub fn skewed_operations<R: Rng + ?Sized>(n: usize, skew: u64, rng: &mut R) -> Vec<WriteOp> {
    (0..n)
        .map(|_| WriteOp::from_code(rng.gen_range(0..=2 + skew)).unwrap_or(WriteOp::Put))
        .collect()
}

/// Applies `ops` to `db`, the `i`-th op targeting key `i`: puts write
/// `i * 10`, updates `i * 5`. Returns the number of writes applied.
pub fn apply_writes(db: &mut Db, ops: &[WriteOp]) -> Result<u64> {
    for (i, op) in ops.iter().enumerate() {
        let key = i as u64;
        match op {
            WriteOp::Put => db.put(key, key * 10)?,
            WriteOp::Update => db.update(key, key * 5)?,
            WriteOp::Delete => db.delete(key)?,
        }
    }
    Ok(ops.len() as u64)
}
