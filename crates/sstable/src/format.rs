//! Page codec and footer read/write helpers.
//!
//! ## Page (4096 bytes)
//!
//! ```text
//! [count: u32 LE][reserved: u32 LE][key: u64 LE][value: u64 LE] x count [zero padding]
//! ```
//!
//! Data pages and B-tree node pages share this layout; node pages store
//! `(min_key_of_child, child_page_no)` pairs.
//!
//! ## Footer (96 bytes, always last)
//!
//! ```text
//! [version: u16][search: u8][flags: u8][reserved: u32]
//! [entry_count][data_pages][index_offset][index_len][root_page]
//! [tree_height][bloom_offset][bloom_len][min_key][max_key]     (u64 LE each)
//! [crc32: u32 LE][magic: u32 LE = "LKV1"]
//! ```
//!
//! The CRC covers every footer byte before it.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use config::SearchType;
use memtable::Entry;
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};

/// Size of every data and index page.
pub const PAGE_SIZE: usize = 4096;

/// `count` + `reserved`.
pub const PAGE_HEADER_BYTES: usize = 8;

/// Maximum number of 16-byte pairs in one page.
pub const ENTRIES_PER_PAGE: usize = (PAGE_SIZE - PAGE_HEADER_BYTES) / 16;

/// Magic number identifying LevelKV SSTables (ASCII "LKV1").
pub const SST_MAGIC: u32 = 0x4c4b_5631;

/// Current footer version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the footer in bytes.
pub const FOOTER_BYTES: u64 = 96;

/// Footer flag: a serialized bloom filter follows the index.
pub const FLAG_BLOOM: u8 = 0b0000_0001;

const FOOTER_BODY_BYTES: usize = 88;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Encodes `entries` into exactly [`PAGE_SIZE`] bytes in `buf`.
pub fn encode_page(entries: &[Entry], buf: &mut Vec<u8>) -> IoResult<()> {
    if entries.len() > ENTRIES_PER_PAGE {
        return Err(invalid(format!(
            "{} entries do not fit in one page (max {})",
            entries.len(),
            ENTRIES_PER_PAGE
        )));
    }
    buf.clear();
    buf.write_u32::<LittleEndian>(entries.len() as u32)?;
    buf.write_u32::<LittleEndian>(0)?;
    for &(key, value) in entries {
        buf.write_u64::<LittleEndian>(key)?;
        buf.write_u64::<LittleEndian>(value)?;
    }
    buf.resize(PAGE_SIZE, 0);
    Ok(())
}

/// Encodes `entries` and writes the page to `w`.
pub fn write_page<W: Write>(w: &mut W, entries: &[Entry], buf: &mut Vec<u8>) -> IoResult<()> {
    encode_page(entries, buf)?;
    w.write_all(buf)
}

/// Decodes one page. Keys must be strictly ascending.
pub fn decode_page(mut bytes: &[u8]) -> IoResult<Vec<Entry>> {
    if bytes.len() != PAGE_SIZE {
        return Err(invalid(format!("page is {} bytes, expected {}", bytes.len(), PAGE_SIZE)));
    }
    let count = bytes.read_u32::<LittleEndian>()? as usize;
    let _reserved = bytes.read_u32::<LittleEndian>()?;
    if count > ENTRIES_PER_PAGE {
        return Err(invalid(format!("corrupt page: count {} exceeds {}", count, ENTRIES_PER_PAGE)));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key = bytes.read_u64::<LittleEndian>()?;
        let value = bytes.read_u64::<LittleEndian>()?;
        if let Some(&(prev, _)) = entries.last() {
            if key <= prev {
                return Err(invalid(format!("corrupt page: key {} follows {}", key, prev)));
            }
        }
        entries.push((key, value));
    }
    Ok(entries)
}

/// Parsed SSTable footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub version: u16,
    pub search_type: SearchType,
    pub flags: u8,
    pub entry_count: u64,
    pub data_pages: u64,
    pub index_offset: u64,
    pub index_len: u64,
    /// B-tree root page number; 0 for binary-search files.
    pub root_page: u64,
    /// Number of B-tree node levels; 0 for binary-search files.
    pub tree_height: u64,
    pub bloom_offset: u64,
    pub bloom_len: u64,
    pub min_key: u64,
    pub max_key: u64,
}

impl Footer {
    #[must_use]
    pub fn has_bloom(&self) -> bool {
        self.flags & FLAG_BLOOM != 0
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        let mut body = Vec::with_capacity(FOOTER_BODY_BYTES);
        body.write_u16::<LittleEndian>(self.version)?;
        body.write_u8(self.search_type.as_u8())?;
        body.write_u8(self.flags)?;
        body.write_u32::<LittleEndian>(0)?;
        for field in [
            self.entry_count,
            self.data_pages,
            self.index_offset,
            self.index_len,
            self.root_page,
            self.tree_height,
            self.bloom_offset,
            self.bloom_len,
            self.min_key,
            self.max_key,
        ] {
            body.write_u64::<LittleEndian>(field)?;
        }
        debug_assert_eq!(body.len(), FOOTER_BODY_BYTES);

        w.write_all(&body)?;
        w.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        w.write_u32::<LittleEndian>(SST_MAGIC)?;
        Ok(())
    }

    /// Reads and verifies the footer at the end of `r`.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> IoResult<Self> {
        let filesize = r.seek(SeekFrom::End(0))?;
        if filesize < FOOTER_BYTES {
            return Err(invalid("file too small for SSTable footer"));
        }

        r.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
        let mut body = [0u8; FOOTER_BODY_BYTES];
        r.read_exact(&mut body)?;
        let stored_crc = r.read_u32::<LittleEndian>()?;
        let magic = r.read_u32::<LittleEndian>()?;

        if magic != SST_MAGIC {
            return Err(invalid(format!("unknown SSTable magic: {:#x}", magic)));
        }
        let actual_crc = crc32fast::hash(&body);
        if actual_crc != stored_crc {
            return Err(invalid(format!(
                "footer CRC32 mismatch: expected {:#010x}, got {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let mut b = &body[..];
        let version = b.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported SSTable version {}", version)));
        }
        let tag = b.read_u8()?;
        let search_type =
            SearchType::from_u8(tag).ok_or_else(|| invalid(format!("unknown search type tag {}", tag)))?;
        let flags = b.read_u8()?;
        let _reserved = b.read_u32::<LittleEndian>()?;

        Ok(Footer {
            version,
            search_type,
            flags,
            entry_count: b.read_u64::<LittleEndian>()?,
            data_pages: b.read_u64::<LittleEndian>()?,
            index_offset: b.read_u64::<LittleEndian>()?,
            index_len: b.read_u64::<LittleEndian>()?,
            root_page: b.read_u64::<LittleEndian>()?,
            tree_height: b.read_u64::<LittleEndian>()?,
            bloom_offset: b.read_u64::<LittleEndian>()?,
            bloom_len: b.read_u64::<LittleEndian>()?,
            min_key: b.read_u64::<LittleEndian>()?,
            max_key: b.read_u64::<LittleEndian>()?,
        })
    }
}
