//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk sorted runs of `u64 -> u64` pairs for the LevelKV
//! storage engine.
//!
//! When the in-memory [`memtable::Memtable`] fills up the engine flushes it
//! to disk as an SSTable; compaction merges SSTables into new ones. Files are
//! *write-once, read-many* and are only ever replaced, never modified.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA PAGES (4096 bytes each, page 0 .. data_pages-1)          │
//! │                                                               │
//! │ count (u32) | reserved (u32) | (key u64, value u64) x count   │
//! │ up to 255 pairs per page, zero padded                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION                                                 │
//! │                                                               │
//! │ binary search: first key of every data page (u64 each)        │
//! │ b-tree:        node pages of (min_key, child_page_no),        │
//! │                written bottom-up, root page last              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (optional, serialized BloomFilter)              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 96 bytes, see `format`)                   │
//! │ ... section offsets, key range, crc32 | magic "LKV1"          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Every page read goes through a shared
//! [`bufferpool::BufferPool`]; the reader itself keeps only the footer, the
//! fence keys and the bloom filter in memory.

mod format;
mod iter;
mod merge;
mod reader;
mod writer;

pub use format::{
    decode_page, encode_page, Footer, ENTRIES_PER_PAGE, FOOTER_BYTES, FORMAT_VERSION, PAGE_SIZE, SST_MAGIC,
};
pub use iter::SstRangeIter;
pub use merge::{MergeIterator, MergeSource};
pub use reader::SstReader;
pub use writer::{SstMeta, SstWriter};

/// File name of the SSTable with id `id`. Zero padding keeps directory
/// listings in id order.
#[must_use]
pub fn sst_file_name(id: u64) -> String {
    format!("sst-{:020}.sst", id)
}

/// Inverse of [`sst_file_name`]. `None` for anything else, including
/// `*.sst.tmp` leftovers.
#[must_use]
pub fn parse_sst_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("sst-")?.strip_suffix(".sst")?.parse().ok()
}

#[cfg(test)]
mod tests;
