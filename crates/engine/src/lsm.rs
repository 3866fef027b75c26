//! On-disk levels of the tree.
//!
//! ```text
//! <root>/level0/sst-00000000000000000007.sst   ← newest flush
//! <root>/level0/sst-00000000000000000006.sst
//! <root>/level1/sst-00000000000000000005.sst   ← one merged run per level
//! <root>/level2/sst-00000000000000000002.sst
//! ```
//!
//! SST ids are allocated from a single counter. Every level is kept
//! newest-first. The `MANIFEST` in the root lists the live runs of every
//! level; it is rewritten before obsolete files are deleted, and files it does
//! not list are removed on open.

use anyhow::{anyhow, bail, Context, Result};
use bufferpool::BufferPool;
use config::{DbConfig, SearchType};
use memtable::{Memtable, DELETED_KEY_VALUE};
use sstable::{parse_sst_file_name, sst_file_name, MergeIterator, MergeSource, SstReader, SstWriter};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::manifest::{Manifest, ManifestEntry};

/// Sorted runs grouped into levels.
pub struct LsmTree {
    root: PathBuf,
    /// `levels[n]` holds the runs of `level<n>`, newest first.
    levels: Vec<Vec<SstReader>>,
    manifest: Manifest,
    next_id: u64,
    search_type: SearchType,
    /// Bits per key written into new runs; 0 means no filter and no leveling.
    bloom_bits: usize,
    size_ratio: usize,
    memtable_entries: usize,
}

/// Outcome of one merge, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionStats {
    pub input_runs: usize,
    pub output_entries: u64,
    pub dropped_tombstones: u64,
}

impl LsmTree {
    /// Opens (or creates) the tree rooted at `root`.
    ///
    /// Only the runs listed in the manifest are loaded. Stale `*.sst.tmp`
    /// files and `.sst` files the manifest does not list are removed.
    pub fn open<P: AsRef<Path>>(root: P, config: &DbConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let manifest = Manifest::load_or_create(&root)?;
        if let Some(level) = manifest.max_level() {
            if level >= config.max_levels {
                bail!(
                    "{} holds level {} but the database is configured for {} levels",
                    root.display(),
                    level,
                    config.max_levels
                );
            }
        }

        let mut levels: Vec<Vec<SstReader>> = (0..config.max_levels).map(|_| Vec::new()).collect();
        let mut max_id = 0u64;
        for entry in &manifest.entries {
            let id = parse_sst_file_name(&entry.filename)
                .ok_or_else(|| anyhow!("manifest lists {} which is not an sstable", entry.filename))?;
            let path = root.join(level_dir_name(entry.level)).join(&entry.filename);
            let reader = SstReader::open(&path, id).with_context(|| format!("failed to open {}", path.display()))?;
            max_id = max_id.max(id);
            levels[entry.level].push(reader);
        }
        max_id = max_id.max(remove_unlisted_files(&root, &manifest)?);

        let tree = Self {
            root,
            levels,
            manifest,
            next_id: max_id + 1,
            search_type: config.search_type,
            bloom_bits: config.bloom_filter_bits,
            size_ratio: config.size_ratio,
            memtable_entries: config.memtable_entries(),
        };
        info!(
            root = %tree.root.display(),
            ssts = tree.sst_count(),
            levels = ?tree.level_sst_counts(),
            "opened lsm tree"
        );
        Ok(tree)
    }

    /// Writes `mem` as a new level-0 run. An empty memtable writes nothing.
    ///
    /// On failure no run is registered and the new file is removed.
    pub fn flush(&mut self, mem: &Memtable) -> Result<()> {
        if mem.is_empty() {
            return Ok(());
        }
        let id = self.alloc_id();
        let path = self.sst_path(0, id)?;
        let meta = SstWriter::write_from_memtable(&path, id, self.search_type, self.bloom_bits, mem)?;
        let registered = SstReader::open(&path, id).and_then(|reader| self.add_flushed_run(reader));
        if let Err(e) = registered {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        info!(
            id,
            entries = meta.entry_count,
            pages = meta.data_pages,
            level0_runs = self.levels[0].len(),
            "flushed memtable"
        );
        Ok(())
    }

    /// Registers a freshly flushed run as the newest run of level 0 and
    /// records it in the manifest.
    ///
    /// If the manifest cannot be saved the run is not registered.
    pub fn add_flushed_run(&mut self, sst: SstReader) -> Result<()> {
        self.next_id = self.next_id.max(sst.id() + 1);
        self.levels[0].insert(0, sst);
        if let Err(e) = self.save_manifest() {
            self.levels[0].remove(0);
            return Err(e);
        }
        Ok(())
    }

    /// Point lookup across all levels, newest run first.
    ///
    /// Returns the raw stored value, so a tombstone comes back as
    /// [`DELETED_KEY_VALUE`]. `None` means no run holds the key.
    pub fn get(&self, key: u64, pool: &BufferPool) -> Result<Option<u64>> {
        for sst in self.runs_newest_first() {
            if let Some(value) = sst.lookup(key, pool)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Range iterators over every run that overlaps `[low, high]`, newest
    /// first, ready to feed a [`MergeIterator`].
    pub fn range_sources<'a>(&'a self, low: u64, high: u64, pool: &'a BufferPool) -> Vec<MergeSource<'a>> {
        self.runs_newest_first()
            .filter(|sst| sst.overlaps(low, high))
            .map(|sst| Box::new(sst.range_iter(low, high, pool)) as MergeSource<'a>)
            .collect()
    }

    /// `true` when `level` is over its budget and should merge into the
    /// next level. Always `false` in single-level mode and for the last level.
    #[must_use]
    pub fn needs_compaction(&self, level: usize) -> bool {
        if !self.leveled() || level + 1 >= self.levels.len() {
            return false;
        }
        let runs = &self.levels[level];
        if level == 0 {
            return runs.len() >= self.size_ratio;
        }
        let entries: u64 = runs.iter().map(SstReader::len).sum();
        entries > self.level_capacity(level)
    }

    /// Entry budget of `level` (level >= 1): `memtable_entries * ratio^level`.
    #[must_use]
    pub fn level_capacity(&self, level: usize) -> u64 {
        let ratio = self.size_ratio as u64;
        (0..level).fold(self.memtable_entries as u64, |cap, _| cap.saturating_mul(ratio))
    }

    /// Merges every over-budget level into the next one, top to bottom.
    ///
    /// Returns the number of merges performed.
    pub fn maybe_compact(&mut self, pool: &BufferPool) -> Result<usize> {
        let mut merges = 0;
        for level in 0..self.levels.len() {
            if self.needs_compaction(level) {
                self.merge_levels(level, level + 1, level + 1, pool)?;
                merges += 1;
            }
        }
        Ok(merges)
    }

    /// Merges every run into a single run at the bottom level (level 0 in
    /// single-level mode). Tombstones are dropped.
    pub fn compact_all(&mut self, pool: &BufferPool) -> Result<CompactionStats> {
        let last = self.levels.len() - 1;
        let target = if self.leveled() { last } else { 0 };
        self.merge_levels(0, last, target, pool)
    }

    /// Merges the runs of levels `first..=last` into one new run at `target`.
    ///
    /// Inputs are read newest first (upper levels before lower ones), so the
    /// most recent version of each key wins. Tombstones are dropped only when
    /// no run exists below `last`. On failure the inputs stay in place.
    fn merge_levels(&mut self, first: usize, last: usize, target: usize, pool: &BufferPool) -> Result<CompactionStats> {
        debug_assert!(first <= target && target <= last && last < self.levels.len());

        let input_runs: usize = self.levels[first..=last].iter().map(Vec::len).sum();
        if input_runs == 0 {
            return Ok(CompactionStats::default());
        }
        let drop_tombstones = self.levels[last + 1..].iter().all(Vec::is_empty);
        let id = self.alloc_id();
        let path = self.sst_path(target, id)?;

        let taken: Vec<Vec<SstReader>> = (first..=last).map(|l| std::mem::take(&mut self.levels[l])).collect();
        let written = self.write_merged(&taken, &path, id, drop_tombstones, pool);
        let (output, stats) = match written {
            Ok(done) => done,
            Err(e) => {
                for (offset, runs) in taken.into_iter().enumerate() {
                    self.levels[first + offset] = runs;
                }
                return Err(e);
            }
        };

        let output_path = output.as_ref().map(|reader| reader.path().to_path_buf());
        if let Some(reader) = output {
            self.levels[target].insert(0, reader);
        }
        if let Err(e) = self.save_manifest() {
            if let Some(path) = output_path {
                self.levels[target].remove(0);
                let _ = fs::remove_file(path);
            }
            for (offset, runs) in taken.into_iter().enumerate() {
                self.levels[first + offset] = runs;
            }
            return Err(e);
        }

        // The manifest no longer lists the inputs; a file that survives here
        // is removed on the next open.
        for sst in taken.into_iter().flatten() {
            let (old_id, old_path) = (sst.id(), sst.path().to_path_buf());
            drop(sst);
            if let Err(e) = fs::remove_file(&old_path) {
                warn!(path = %old_path.display(), error = %e, "failed to remove compacted sstable");
            }
            match pool.invalidate_sst(old_id) {
                Ok(freed) => debug!(id = old_id, freed, "invalidated compacted sstable pages"),
                Err(e) => warn!(id = old_id, error = %e, "failed to invalidate compacted sstable pages"),
            }
        }

        let stats = CompactionStats { input_runs, ..stats };
        info!(
            from = first,
            to = target,
            inputs = stats.input_runs,
            output_entries = stats.output_entries,
            dropped_tombstones = stats.dropped_tombstones,
            "compacted levels"
        );
        Ok(stats)
    }

    /// Streams the merge of `inputs` into a new SST at `path`. Returns `None`
    /// when nothing survives the merge.
    fn write_merged(
        &self,
        inputs: &[Vec<SstReader>],
        path: &Path,
        id: u64,
        drop_tombstones: bool,
        pool: &BufferPool,
    ) -> Result<(Option<SstReader>, CompactionStats)> {
        let expected: u64 = inputs.iter().flatten().map(SstReader::len).sum();
        let sources: Vec<MergeSource<'_>> = inputs
            .iter()
            .flatten()
            .map(|sst| Box::new(sst.iter_all(pool)) as MergeSource<'_>)
            .collect();

        let dropped = Cell::new(0u64);
        let mut merged = MergeIterator::new(sources)
            .filter(|item| match item {
                Ok((_, value)) if drop_tombstones && *value == DELETED_KEY_VALUE => {
                    dropped.set(dropped.get() + 1);
                    false
                }
                _ => true,
            })
            .peekable();

        let output = if merged.peek().is_some() {
            let meta = SstWriter::write(path, id, self.search_type, self.bloom_bits, expected as usize, merged)?;
            Some((SstReader::open(path, id), meta.entry_count))
        } else {
            None
        };

        let (reader, output_entries) = match output {
            Some((Ok(reader), entries)) => (Some(reader), entries),
            Some((Err(e), _)) => {
                let _ = fs::remove_file(path);
                return Err(e);
            }
            None => (None, 0),
        };
        Ok((
            reader,
            CompactionStats {
                input_runs: 0,
                output_entries,
                dropped_tombstones: dropped.get(),
            },
        ))
    }

    /// Rewrites the manifest from the in-memory layout.
    fn save_manifest(&mut self) -> Result<()> {
        self.manifest.entries = self
            .levels
            .iter()
            .enumerate()
            .flat_map(|(level, runs)| {
                runs.iter().map(move |sst| ManifestEntry {
                    level,
                    filename: sst_file_name(sst.id()),
                })
            })
            .collect();
        self.manifest.save()
    }

    fn runs_newest_first(&self) -> impl Iterator<Item = &SstReader> + '_ {
        self.levels.iter().flatten()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Path of run `id` in `level`, creating the level directory if needed.
    fn sst_path(&self, level: usize, id: u64) -> Result<PathBuf> {
        let dir = self.root.join(level_dir_name(level));
        fs::create_dir_all(&dir)?;
        Ok(dir.join(sst_file_name(id)))
    }

    #[must_use]
    pub fn leveled(&self) -> bool {
        self.bloom_bits > 0
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Runs of `level`, newest first. Empty for an unknown level.
    #[must_use]
    pub fn level(&self, level: usize) -> &[SstReader] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of runs in each level, top first.
    #[must_use]
    pub fn level_sst_counts(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    #[must_use]
    pub fn sst_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Id the next flush or merge will use.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

impl std::fmt::Debug for LsmTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmTree")
            .field("root", &self.root)
            .field("levels", &self.level_sst_counts())
            .field("next_id", &self.next_id)
            .field("search_type", &self.search_type)
            .field("bloom_bits", &self.bloom_bits)
            .field("size_ratio", &self.size_ratio)
            .finish()
    }
}

/// `level<N>`.
#[must_use]
pub fn level_dir_name(level: usize) -> String {
    format!("level{}", level)
}

fn parse_level_dir(name: &str) -> Option<usize> {
    name.strip_prefix("level")?.parse().ok()
}

/// Deletes every `.sst` under a `level<N>` directory that `manifest` does not
/// list, along with stale temp files. Returns the largest id seen on disk.
fn remove_unlisted_files(root: &Path, manifest: &Manifest) -> Result<u64> {
    let mut max_id = 0u64;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let level = match entry.file_name().to_str().and_then(parse_level_dir) {
            Some(level) => level,
            None => continue,
        };

        cleanup_tmp_files(&entry.path());
        for file in fs::read_dir(entry.path())? {
            let path = file?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            let id = match parse_sst_file_name(name) {
                Some(id) => id,
                None => continue,
            };
            max_id = max_id.max(id);
            if !manifest.contains(level, name) {
                warn!(path = %path.display(), "removing sstable not listed in manifest");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove unlisted sstable");
                }
            }
        }
    }
    Ok(max_id)
}

/// Removes `*.sst.tmp` leftovers of an interrupted write.
fn cleanup_tmp_files(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".sst.tmp") {
                    debug!(path = %p.display(), "removing stale temp file");
                    let _ = fs::remove_file(&p);
                }
            }
        }
    }
}
