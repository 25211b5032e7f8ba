//! Point-lookup reader for one SSTable.

use anyhow::{anyhow, bail, Context, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use cache::BlockCache;
use memtable::Entry;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::format::{read_block, read_footer, BlockRecords, FOOTER_BYTES, MAX_KEY_BYTES};

/// One sparse-index entry: the first key of a block and the file offset of
/// that block's frame.
#[derive(Debug, Clone)]
struct IndexEntry {
    first_key: Vec<u8>,
    offset: u64,
}

/// Reads an SSTable file for point lookups.
///
/// On [`open`](Table::open) the footer and the whole sparse index are loaded
/// into memory, and the last data block is decoded once to learn the table's
/// `last_key`. A persistent file handle is kept for the lifetime of the
/// reader, wrapped in a `Mutex` so `get` works through a shared `&self`.
///
/// Lookups probe the block cache before touching the file; on a miss the
/// block frame is read, CRC-verified, and inserted into the cache.
pub struct Table {
    path: PathBuf,
    /// Basename, used as the cache-key component.
    filename: String,
    index: Vec<IndexEntry>,
    filter: Option<BloomFilter>,
    file: Mutex<File>,
    file_size: u64,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
}

impl Table {
    /// Opens a table and loads its sparse index.
    ///
    /// `filter` is the sibling bloom filter if the engine could load one;
    /// `None` degrades every lookup to a full index-and-block probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer is out of range, the index is
    /// malformed, or any I/O fails. A table with zero blocks is corrupt.
    pub fn open<P: AsRef<Path>>(path: P, filter: Option<BloomFilter>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("table path has no utf-8 filename: {}", path.display()))?
            .to_string();

        let mut file = File::open(&path)
            .with_context(|| format!("failed to open table {}", path.display()))?;
        let (index_offset, file_size) = read_footer(&mut file)?;

        // Load the sparse index: entries run from index_offset to the footer.
        file.seek(SeekFrom::Start(index_offset))?;
        let index_len = file_size - FOOTER_BYTES - index_offset;
        let mut section = vec![0u8; index_len as usize];
        file.read_exact(&mut section)?;

        let mut index = Vec::new();
        let mut cursor = &section[..];
        while !cursor.is_empty() {
            let key_len = cursor.read_u64::<LittleEndian>()?;
            if key_len == 0 || key_len > MAX_KEY_BYTES {
                bail!("corrupt index: implausible key length {}", key_len);
            }
            let mut first_key = vec![0u8; key_len as usize];
            cursor.read_exact(&mut first_key)?;
            let offset = cursor.read_u64::<LittleEndian>()?;
            if offset >= index_offset {
                bail!("corrupt index: block offset {} inside index section", offset);
            }
            index.push(IndexEntry { first_key, offset });
        }
        if index.is_empty() {
            bail!("corrupt table: no data blocks in {}", path.display());
        }

        let first_key = index[0].first_key.clone();

        // The index only knows each block's first key; the table's last key
        // is the final record of the final block.
        let last_block = read_block(&mut file, index.last().expect("non-empty").offset)?;
        let mut last_key = Vec::new();
        for record in BlockRecords::new(&last_block) {
            let (key, _) = record?;
            last_key = key.to_vec();
        }

        Ok(Self {
            path,
            filename,
            index,
            filter,
            file: Mutex::new(file),
            file_size,
            first_key,
            last_key,
        })
    }

    /// Point lookup for a single key.
    ///
    /// The bloom filter is consulted first: a negative answer proves the key
    /// is not in this table and costs no I/O. Otherwise the sparse index
    /// names the only block that could hold the key, and that block is
    /// fetched (through the cache) and scanned.
    ///
    /// Returns `Ok(Some(entry))` for a hit — which may be a tombstone — and
    /// `Ok(None)` when the key is not in this table.
    pub fn get(&self, key: &[u8], block_cache: &BlockCache) -> Result<Option<Entry>> {
        if let Some(filter) = &self.filter {
            if !filter.may_contain(key) {
                return Ok(None);
            }
        }

        // Greatest index entry with first_key <= key; if even the first
        // block starts past the target, the key cannot be here.
        let pos = self.index.partition_point(|e| e.first_key.as_slice() <= key);
        if pos == 0 {
            return Ok(None);
        }
        let offset = self.index[pos - 1].offset;

        let block = match block_cache.get(&self.filename, offset) {
            Some(cached) => cached,
            None => {
                let mut file = self.file.lock().map_err(|e| anyhow!("table file lock poisoned: {e}"))?;
                let bytes = read_block(&mut file, offset)
                    .with_context(|| format!("reading block of {}", self.path.display()))?;
                drop(file);
                block_cache.insert(&self.filename, offset, bytes)
            }
        };

        for record in BlockRecords::new(&block) {
            let (record_key, entry) = record?;
            if record_key == key {
                return Ok(Some(entry.to_entry()));
            }
            if record_key > key {
                break;
            }
        }
        Ok(None)
    }

    /// Smallest key in the table.
    #[must_use]
    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    /// Largest key in the table.
    #[must_use]
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// `true` if `key` falls inside `[first_key, last_key]`.
    #[must_use]
    pub fn range_contains(&self, key: &[u8]) -> bool {
        self.first_key.as_slice() <= key && key <= self.last_key.as_slice()
    }

    /// `true` if the table's key range intersects `[start, end]` (both ends
    /// inclusive).
    #[must_use]
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        self.first_key.as_slice() <= end && start <= self.last_key.as_slice()
    }

    /// Basename of the table file.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full path of the table file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the table file in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// `true` if a bloom filter was loaded for this table.
    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Estimated record count, used to size compaction output filters.
    ///
    /// The sibling filter was built with `m = -n ln p / (ln 2)²` bits, so
    /// given the same target rate `p`, `n ≈ m (ln 2)² / (-ln p)` recovers
    /// the capacity it was sized for (exactly, up to rounding — inverting
    /// the k formula instead loses several percent to k's rounding).
    /// Without a filter, fall back to a coarse bytes-per-record guess.
    #[must_use]
    pub fn estimated_entries(&self, false_positive_rate: f64) -> usize {
        match &self.filter {
            Some(f) => {
                let ln2 = std::f64::consts::LN_2;
                let n = (f.num_bits() as f64 * ln2 * ln2 / -false_positive_rate.ln()).round()
                    as usize;
                n.max(1)
            }
            None => (self.file_size / 64).max(1) as usize,
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("filename", &self.filename)
            .field("file_size", &self.file_size)
            .field("blocks", &self.index.len())
            .field("has_filter", &self.has_filter())
            .finish()
    }
}
