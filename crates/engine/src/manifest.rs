/// # Manifest - live runs per level
///
/// The authoritative list of which SST files make up the tree and which
/// level each belongs to. A file on disk that the manifest does not list is
/// left over from an interrupted flush or compaction and is never loaded.
///
/// ## File Format
///
/// One run per line, newest first within each level:
///
/// ```text
/// L0:sst-00000000000000000009.sst
/// L0:sst-00000000000000000008.sst
/// L2:sst-00000000000000000007.sst
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// The manifest is rewritten atomically: write to `MANIFEST.tmp`, fsync,
/// rename over `MANIFEST`. A crash leaves either the old or the new layout.
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file in the database root.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// One live run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub level: usize,
    /// File name inside `level<N>/`, not a full path.
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Loads `root/MANIFEST`, or starts an empty manifest if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_create(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let file = File::open(&path).with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            entries.push(parse_line(trimmed).with_context(|| format!("manifest line {}", line_num + 1))?);
        }
        Ok(Self { path, entries })
    }

    /// Writes the manifest to disk atomically.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("failed to create manifest tmp at {}", tmp_path.display()))?;
            Self::write_contents(&mut f, &self.entries)?;
            f.flush()?;
            f.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("failed to install manifest at {}", self.path.display()));
        }
        if let Some(dir) = self.path.parent() {
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    fn write_contents(f: &mut File, entries: &[ManifestEntry]) -> Result<()> {
        writeln!(f, "# LevelKV manifest")?;
        writeln!(f, "# Format: L<level>:<sst file name>")?;
        for entry in entries {
            writeln!(f, "L{}:{}", entry.level, entry.filename)?;
        }
        Ok(())
    }

    /// File names of `level`, in manifest order (newest first).
    pub fn level_filenames(&self, level: usize) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.filename.as_str())
            .collect()
    }

    /// `true` if `filename` is live in `level`.
    pub fn contains(&self, level: usize, filename: &str) -> bool {
        self.entries.iter().any(|e| e.level == level && e.filename == filename)
    }

    /// Deepest level any entry refers to.
    pub fn max_level(&self) -> Option<usize> {
        self.entries.iter().map(|e| e.level).max()
    }
}

fn parse_line(line: &str) -> Result<ManifestEntry> {
    let (level_str, filename) = line
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid format (expected 'L<n>:<filename>'): {}", line))?;
    let level = level_str
        .strip_prefix('L')
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("unknown level '{}'", level_str))?;
    if filename.is_empty() || filename.contains(['/', '\\']) {
        return Err(anyhow!("invalid file name '{}'", filename));
    }
    Ok(ManifestEntry {
        level,
        filename: filename.to_string(),
    })
}
