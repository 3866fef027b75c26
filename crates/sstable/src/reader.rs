use anyhow::{anyhow, bail, ensure, Context, Result};
use bloom::BloomFilter;
use bufferpool::{BufferPool, Page, PageId};
use byteorder::{LittleEndian, ReadBytesExt};
use config::SearchType;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::format::{decode_page, Footer, ENTRIES_PER_PAGE, FOOTER_BYTES, PAGE_SIZE};
use crate::iter::SstRangeIter;

/// Largest bloom section we accept (matches the bloom crate's own cap).
const MAX_BLOOM_BYTES: u64 = 128 * 1024 * 1024 + 64;

/// Reads an SSTable file for point lookups and range scans.
///
/// On [`open`](SstReader::open) the footer is validated and the small
/// per-file metadata is loaded: the fence keys for binary-search files and
/// the bloom filter when present. Pages are never cached here; every page
/// access goes through the caller's [`BufferPool`], keyed by
/// `(id, page_no)`.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so that pages can be read through `&self`.
pub struct SstReader {
    id: u64,
    path: PathBuf,
    footer: Footer,
    /// First key of every data page; empty for B-tree files.
    fences: Vec<u64>,
    bloom: Option<BloomFilter>,
    file: Mutex<File>,
}

impl SstReader {
    /// Opens the SSTable at `path` and assigns it the cache identity `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is too small, the footer magic or CRC is
    /// wrong, any section lies outside the file, or on I/O failure.
    pub fn open<P: AsRef<Path>>(path: P, id: u64) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf).with_context(|| format!("open sstable {}", path_buf.display()))?;
        let filesize = f.metadata()?.len();

        if filesize < FOOTER_BYTES {
            bail!("sstable file too small: {} bytes", filesize);
        }
        let footer = Footer::read_from(&mut f).with_context(|| format!("read footer of {}", path_buf.display()))?;
        validate_footer(&footer, filesize)?;

        let fences = match footer.search_type {
            SearchType::BinarySearch => {
                f.seek(SeekFrom::Start(footer.index_offset))?;
                let mut fences = Vec::with_capacity(footer.data_pages as usize);
                for _ in 0..footer.data_pages {
                    fences.push(f.read_u64::<LittleEndian>()?);
                }
                ensure!(
                    fences.windows(2).all(|w| w[0] < w[1]),
                    "corrupt index: fence keys out of order"
                );
                ensure!(
                    fences.first() == Some(&footer.min_key),
                    "corrupt index: first fence does not match min key"
                );
                fences
            }
            SearchType::BTreeSearch => Vec::new(),
        };

        let bloom = if footer.has_bloom() {
            f.seek(SeekFrom::Start(footer.bloom_offset))?;
            let mut section = (&mut f).take(footer.bloom_len);
            Some(BloomFilter::read_from(&mut section).context("corrupt bloom filter")?)
        } else {
            None
        };

        Ok(Self {
            id,
            path: path_buf,
            footer,
            fences,
            bloom,
            file: Mutex::new(f),
        })
    }

    /// Point lookup.
    ///
    /// Returns the raw stored value (which may be the tombstone marker) or
    /// `None` if the key is not in this file. A negative bloom answer or a
    /// key outside `[min_key, max_key]` costs no page access. Otherwise
    /// the page is located with the file's search strategy and fetched
    /// through `pool`.
    pub fn lookup(&self, key: u64, pool: &BufferPool) -> Result<Option<u64>> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        if key < self.footer.min_key || key > self.footer.max_key {
            return Ok(None);
        }
        let page_no = match self.locate_page(key, pool)? {
            Some(p) => p,
            None => return Ok(None),
        };
        let page = self.fetch_page(page_no, pool)?;
        Ok(page.get(key))
    }

    /// Lazy iterator over entries with keys in `[low, high]`.
    pub fn range_iter<'a>(&'a self, low: u64, high: u64, pool: &'a BufferPool) -> SstRangeIter<'a> {
        SstRangeIter::new(self, pool, low, high)
    }

    /// Lazy iterator over every entry, tombstones included.
    pub fn iter_all<'a>(&'a self, pool: &'a BufferPool) -> SstRangeIter<'a> {
        self.range_iter(self.footer.min_key, self.footer.max_key, pool)
    }

    /// Data page that would hold `key`: the last page whose first key is
    /// `<= key`. `None` if `key` precedes every page.
    pub(crate) fn locate_page(&self, key: u64, pool: &BufferPool) -> Result<Option<u64>> {
        match self.footer.search_type {
            SearchType::BinarySearch => Ok(self
                .fences
                .partition_point(|&fence| fence <= key)
                .checked_sub(1)
                .map(|i| i as u64)),
            SearchType::BTreeSearch => {
                let mut page_no = self.footer.root_page;
                for _ in 0..self.footer.tree_height {
                    let node = self.fetch_page(page_no, pool)?;
                    page_no = match node.floor_index(key) {
                        Some(i) => node.entries()[i].1,
                        None => return Ok(None),
                    };
                }
                ensure!(
                    page_no < self.footer.data_pages,
                    "corrupt b-tree in {}: leaf child {} is not a data page",
                    self.path.display(),
                    page_no
                );
                Ok(Some(page_no))
            }
        }
    }

    /// Fetches page `page_no` through the buffer pool.
    pub(crate) fn fetch_page(&self, page_no: u64, pool: &BufferPool) -> Result<Arc<Page>> {
        pool.get_page(PageId::new(self.id, page_no), || self.read_page(page_no))
    }

    /// Reads and decodes page `page_no` straight from disk.
    pub fn read_page(&self, page_no: u64) -> Result<Page> {
        ensure!(
            page_no < self.page_count(),
            "page {} out of range in {} ({} pages)",
            page_no,
            self.path.display(),
            self.page_count()
        );
        let offset = page_no * PAGE_SIZE as u64;

        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut f = self.file.lock().map_err(|e| anyhow!("lock poisoned: {}", e))?;
            f.seek(SeekFrom::Start(offset))?;
            f.read_exact(&mut buf)?;
        }
        let entries = decode_page(&buf).with_context(|| format!("page {} of {}", page_no, self.path.display()))?;
        Ok(Page::new(PageId::new(self.id, page_no), entries))
    }

    /// Data pages plus B-tree node pages.
    fn page_count(&self) -> u64 {
        match self.footer.search_type {
            SearchType::BinarySearch => self.footer.data_pages,
            SearchType::BTreeSearch => self.footer.data_pages + self.footer.index_len / PAGE_SIZE as u64,
        }
    }

    /// `false` means `key` is definitely not in this file. Always `true`
    /// when the file has no bloom filter.
    #[must_use]
    pub fn may_contain(&self, key: u64) -> bool {
        self.bloom.as_ref().map_or(true, |bf| bf.may_contain(key))
    }

    /// `true` if `[low, high]` intersects `[min_key, max_key]`.
    #[must_use]
    pub fn overlaps(&self, low: u64, high: u64) -> bool {
        low <= high && low <= self.footer.max_key && high >= self.footer.min_key
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.footer.entry_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.footer.entry_count == 0
    }

    #[must_use]
    pub fn min_key(&self) -> u64 {
        self.footer.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> u64 {
        self.footer.max_key
    }

    #[must_use]
    pub fn search_type(&self) -> SearchType {
        self.footer.search_type
    }

    #[must_use]
    pub fn has_bloom(&self) -> bool {
        self.bloom.is_some()
    }

    #[must_use]
    pub fn data_pages(&self) -> u64 {
        self.footer.data_pages
    }

    /// B-tree node levels above the data pages; 0 for binary-search files.
    #[must_use]
    pub fn tree_height(&self) -> u64 {
        self.footer.tree_height
    }
}

impl std::fmt::Debug for SstReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SstReader")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("entries", &self.footer.entry_count)
            .field("keys", &(self.footer.min_key..=self.footer.max_key))
            .field("search", &self.footer.search_type)
            .field("bloom", &self.bloom.is_some())
            .finish()
    }
}

fn validate_footer(footer: &Footer, filesize: u64) -> Result<()> {
    let footer_start = filesize - FOOTER_BYTES;
    let page = PAGE_SIZE as u64;
    let per_page = ENTRIES_PER_PAGE as u64;

    ensure!(footer.entry_count > 0, "corrupt footer: zero entries");
    ensure!(footer.min_key <= footer.max_key, "corrupt footer: min key above max key");
    ensure!(
        footer.data_pages == (footer.entry_count + per_page - 1) / per_page,
        "corrupt footer: {} data pages for {} entries",
        footer.data_pages,
        footer.entry_count
    );
    ensure!(
        footer.index_offset == footer.data_pages * page,
        "corrupt footer: index offset {} does not follow {} data pages",
        footer.index_offset,
        footer.data_pages
    );
    ensure!(
        footer.index_offset + footer.index_len <= footer_start,
        "corrupt footer: index section overruns footer"
    );

    match footer.search_type {
        SearchType::BinarySearch => ensure!(
            footer.index_len == footer.data_pages * 8,
            "corrupt footer: fence section is {} bytes for {} pages",
            footer.index_len,
            footer.data_pages
        ),
        SearchType::BTreeSearch => {
            ensure!(footer.tree_height >= 1, "corrupt footer: b-tree without levels");
            ensure!(
                footer.index_len > 0 && footer.index_len % page == 0,
                "corrupt footer: b-tree section is not page aligned"
            );
            let last_node = footer.data_pages + footer.index_len / page - 1;
            ensure!(
                footer.root_page == last_node,
                "corrupt footer: root page {} is not the last node page {}",
                footer.root_page,
                last_node
            );
        }
    }

    if footer.has_bloom() {
        ensure!(
            footer.bloom_offset == footer.index_offset + footer.index_len,
            "corrupt footer: bloom section does not follow the index"
        );
        ensure!(
            footer.bloom_len <= MAX_BLOOM_BYTES && footer.bloom_offset + footer.bloom_len <= footer_start,
            "corrupt footer: bloom section overruns footer"
        );
    }
    Ok(())
}
