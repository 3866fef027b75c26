use anyhow::{bail, ensure, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, WriteBytesExt};
use config::SearchType;
use memtable::{Entry, Memtable};
use std::fs::{remove_file, rename, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::{write_page, Footer, ENTRIES_PER_PAGE, FLAG_BLOOM, FORMAT_VERSION, PAGE_SIZE};

/// Summary of a freshly written SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    pub id: u64,
    pub path: PathBuf,
    pub entry_count: u64,
    pub data_pages: u64,
    pub min_key: u64,
    pub max_key: u64,
    pub file_size: u64,
    pub has_bloom: bool,
}

/// Writes sorted runs to disk as immutable SSTable files.
///
/// The write is crash-safe: data goes to `<path>.sst.tmp`, is fsynced, and
/// is then atomically renamed to `path`. A failed write removes the temp
/// file and leaves no `.sst` behind.
pub struct SstWriter {}

impl SstWriter {
    /// Flushes `mem` (tombstones included) to a new SSTable at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the memtable is empty or on any I/O failure.
    pub fn write_from_memtable(
        path: &Path,
        id: u64,
        search_type: SearchType,
        bloom_bits: usize,
        mem: &Memtable,
    ) -> Result<SstMeta> {
        if mem.is_empty() {
            bail!("refusing to write an empty SSTable (empty memtable)");
        }
        Self::write(path, id, search_type, bloom_bits, mem.len(), mem.iter().map(Ok))
    }

    /// Streams `entries` into a new SSTable at `path`.
    ///
    /// # Arguments
    ///
    /// * `search_type` – index written after the data pages: fence keys for
    ///   binary search, node pages for B-tree descent.
    /// * `bloom_bits` – bloom filter bits per key; 0 writes no filter.
    /// * `expected_count` – used to size the bloom filter. Over-estimating is
    ///   safe; under-estimating raises the false-positive rate.
    /// * `entries` – strictly ascending keys. Errors from the source abort
    ///   the write.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, not strictly ascending, or on
    /// I/O failure.
    pub fn write<I>(
        path: &Path,
        id: u64,
        search_type: SearchType,
        bloom_bits: usize,
        expected_count: usize,
        entries: I,
    ) -> Result<SstMeta>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let meta = match Self::write_tmp(&tmp_path, id, search_type, bloom_bits, expected_count, entries) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = remove_file(&tmp_path);
                return Err(e);
            }
        };

        rename(&tmp_path, path)?;

        // A crash after rename but before a directory sync can lose the entry.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(
            id,
            path = %path.display(),
            entries = meta.entry_count,
            pages = meta.data_pages,
            %search_type,
            bloom = meta.has_bloom,
            "wrote sstable"
        );
        Ok(SstMeta {
            path: path.to_path_buf(),
            ..meta
        })
    }

    fn write_tmp<I>(
        tmp_path: &Path,
        id: u64,
        search_type: SearchType,
        bloom_bits: usize,
        expected_count: usize,
        entries: I,
    ) -> Result<SstMeta>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut file = BufWriter::new(raw_file);

        let mut bloom = (bloom_bits > 0).then(|| BloomFilter::new(expected_count.max(1), bloom_bits));
        let mut page: Vec<Entry> = Vec::with_capacity(ENTRIES_PER_PAGE);
        let mut page_buf: Vec<u8> = Vec::with_capacity(PAGE_SIZE);
        // First key of every data page.
        let mut fences: Vec<u64> = Vec::new();
        let mut entry_count: u64 = 0;
        let mut last_key: Option<u64> = None;

        // DATA section
        for item in entries {
            let (key, value) = item?;
            if let Some(prev) = last_key {
                ensure!(
                    key > prev,
                    "sstable input not strictly ascending: {} after {}",
                    key,
                    prev
                );
            }
            last_key = Some(key);

            if let Some(bf) = bloom.as_mut() {
                bf.insert(key);
            }
            if page.is_empty() {
                fences.push(key);
            }
            page.push((key, value));
            entry_count += 1;

            if page.len() == ENTRIES_PER_PAGE {
                write_page(&mut file, &page, &mut page_buf)?;
                page.clear();
            }
        }
        if !page.is_empty() {
            write_page(&mut file, &page, &mut page_buf)?;
        }

        let (min_key, max_key) = match (fences.first(), last_key) {
            (Some(&min), Some(max)) => (min, max),
            _ => bail!("refusing to write an empty SSTable (no entries)"),
        };

        let data_pages = fences.len() as u64;
        let index_offset = data_pages * PAGE_SIZE as u64;

        // INDEX section
        let (index_len, root_page, tree_height) = match search_type {
            SearchType::BinarySearch => {
                for &fence in &fences {
                    file.write_u64::<LittleEndian>(fence)?;
                }
                (data_pages * 8, 0, 0)
            }
            SearchType::BTreeSearch => {
                let tree = write_btree(&mut file, &fences, &mut page_buf)?;
                (tree.node_pages * PAGE_SIZE as u64, tree.root_page, tree.height)
            }
        };

        // BLOOM section
        let bloom_offset = index_offset + index_len;
        let bloom_len = match &bloom {
            Some(bf) => {
                bf.write_to(&mut file)?;
                bf.serialized_size() as u64
            }
            None => 0,
        };

        let footer = Footer {
            version: FORMAT_VERSION,
            search_type,
            flags: if bloom.is_some() { FLAG_BLOOM } else { 0 },
            entry_count,
            data_pages,
            index_offset,
            index_len,
            root_page,
            tree_height,
            bloom_offset,
            bloom_len,
            min_key,
            max_key,
        };
        footer.write_to(&mut file)?;

        // Flush BufWriter, then sync the underlying file
        file.flush()?;
        let raw_file = file.into_inner()?;
        raw_file.sync_all()?;
        let file_size = raw_file.metadata()?.len();

        Ok(SstMeta {
            id,
            path: tmp_path.to_path_buf(),
            entry_count,
            data_pages,
            min_key,
            max_key,
            file_size,
            has_bloom: bloom.is_some(),
        })
    }
}

struct BTreeLayout {
    root_page: u64,
    height: u64,
    node_pages: u64,
}

/// Writes node pages bottom-up, one level at a time, root last.
///
/// Level 1 indexes the data pages by their fence keys; each higher level
/// indexes the level below until a single root remains. Node pages are
/// numbered after the data pages.
fn write_btree<W: Write>(w: &mut W, fences: &[u64], buf: &mut Vec<u8>) -> Result<BTreeLayout> {
    let data_pages = fences.len() as u64;
    let mut children: Vec<Entry> = fences
        .iter()
        .enumerate()
        .map(|(page_no, &key)| (key, page_no as u64))
        .collect();
    let mut next_page = data_pages;
    let mut height = 0;

    loop {
        let mut parents: Vec<Entry> = Vec::with_capacity(children.len() / ENTRIES_PER_PAGE + 1);
        for chunk in children.chunks(ENTRIES_PER_PAGE) {
            write_page(w, chunk, buf)?;
            parents.push((chunk[0].0, next_page));
            next_page += 1;
        }
        height += 1;

        if let [(_, root_page)] = parents[..] {
            return Ok(BTreeLayout {
                root_page,
                height,
                node_pages: next_page - data_pages,
            });
        }
        children = parents;
    }
}
