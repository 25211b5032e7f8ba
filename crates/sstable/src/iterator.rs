//! Sequential scan over one SSTable.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use memtable::{Entry, EntryRef};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::format::{read_block, read_footer, BlockRecords, FOOTER_BYTES, MAX_KEY_BYTES};

/// Streams a table's records in key order, one block at a time.
///
/// The iterator owns its file handle and the bytes of the current record;
/// `key()`/`entry()` borrows are invalidated by [`advance`](Self::advance).
/// Scans read blocks directly rather than through the block cache — a scan
/// touches each block once, and letting it churn the cache would evict the
/// blocks point lookups actually reuse.
pub struct TableIterator {
    file: File,
    /// `(first_key, frame_offset)` per block, for seeking.
    index: Vec<(Vec<u8>, u64)>,
    /// Which index entry the *next* block load will use.
    next_block: usize,
    /// Records of the current block, already split out of the frame.
    records: Vec<(Vec<u8>, Entry)>,
    /// Cursor into `records`; `records.len()` means the block is drained.
    pos: usize,
}

impl TableIterator {
    /// Opens the table at `path` and positions the cursor on its first
    /// record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("failed to open table {}", path.display()))?;
        let (index_offset, file_size) = read_footer(&mut file)?;

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
            index.push((first_key, offset));
        }

        let mut iter = Self {
            file,
            index,
            next_block: 0,
            records: Vec::new(),
            pos: 0,
        };
        iter.load_next_block()?;
        Ok(iter)
    }

    /// Repositions the cursor at the first record with key `>= start`.
    ///
    /// Uses the sparse index to jump straight to the candidate block, then
    /// walks forward within it.
    pub fn seek(&mut self, start: &[u8]) -> Result<()> {
        let pos = self.index.partition_point(|(first, _)| first.as_slice() <= start);
        self.next_block = pos.saturating_sub(1);
        self.records.clear();
        self.pos = 0;
        self.load_next_block()?;
        while self.valid() && self.key() < start {
            self.advance()?;
        }
        Ok(())
    }

    /// `false` once the data section is exhausted.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.pos < self.records.len()
    }

    /// Current key. Must only be called while [`valid`](Self::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.records[self.pos].0
    }

    /// Current entry. Must only be called while [`valid`](Self::valid).
    #[must_use]
    pub fn entry(&self) -> EntryRef<'_> {
        self.records[self.pos].1.as_ref()
    }

    /// Moves to the next record, loading the next block at a block boundary.
    pub fn advance(&mut self) -> Result<()> {
        self.pos += 1;
        if self.pos >= self.records.len() {
            self.load_next_block()?;
        }
        Ok(())
    }

    /// Decodes the next data block into `records`, or leaves the iterator
    /// invalid when the data section is exhausted.
    fn load_next_block(&mut self) -> Result<()> {
        self.records.clear();
        self.pos = 0;
        if self.next_block >= self.index.len() {
            return Ok(());
        }
        let offset = self.index[self.next_block].1;
        self.next_block += 1;

        let block = read_block(&mut self.file, offset)?;
        for record in BlockRecords::new(&block) {
            let (key, entry) = record?;
            self.records.push((key.to_vec(), entry.to_entry()));
        }
        if self.records.is_empty() {
            bail!("corrupt table: empty data block at offset {}", offset);
        }
        Ok(())
    }
}

impl std::fmt::Debug for TableIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableIterator")
            .field("blocks", &self.index.len())
            .field("next_block", &self.next_block)
            .field("valid", &self.valid())
            .finish()
    }
}
