//! Streaming SSTable writer.

use anyhow::{ensure, Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use memtable::EntryRef;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::format::write_record;

/// Facts about a finished table, used by the engine to build its manifest
/// entry and size the sibling bloom filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub entries: usize,
    pub file_size: u64,
}

/// Builds one SSTable from records supplied in strictly ascending key order.
///
/// Records accumulate in an open block buffer; once the unframed buffer
/// crosses the block-size target the block is framed out to disk
/// (`[len][bytes][crc]`) and a sparse-index entry is recorded for it. The
/// index and footer are written by [`finish`](TableBuilder::finish).
///
/// The builder writes to the destination path directly — publication is the
/// manifest's job, and an unpublished partial file is garbage the engine
/// sweeps on open.
pub struct TableBuilder {
    file: File,
    path: PathBuf,
    block_size: usize,
    /// Open block accumulating framed records.
    block: Vec<u8>,
    /// `(first_key, frame_offset)` per emitted or open block.
    index: Vec<(Vec<u8>, u64)>,
    /// File offset where the next block frame will start.
    offset: u64,
    first_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    entries: usize,
}

impl TableBuilder {
    /// Creates the destination file and an empty builder.
    pub fn new<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to create table at {}", path.display()))?;
        Ok(Self {
            file,
            path,
            block_size,
            block: Vec::with_capacity(block_size + 256),
            index: Vec::new(),
            offset: 0,
            first_key: None,
            last_key: None,
            entries: 0,
        })
    }

    /// Appends one record. Keys must arrive in strictly ascending order.
    pub fn add(&mut self, key: &[u8], entry: EntryRef<'_>) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        if let Some(last) = &self.last_key {
            ensure!(
                key > last.as_slice(),
                "keys must be strictly ascending: {:?} after {:?}",
                key,
                last
            );
        }

        if self.block.is_empty() {
            self.index.push((key.to_vec(), self.offset));
        }
        write_record(&mut self.block, key, entry);

        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }
        self.last_key = Some(key.to_vec());
        self.entries += 1;

        if self.block.len() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Number of records added so far.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Flushes any partial block, writes the sparse index and footer, fsyncs
    /// and closes the file.
    pub fn finish(mut self) -> Result<TableSummary> {
        ensure!(self.entries > 0, "cannot finish an empty table");

        if !self.block.is_empty() {
            self.flush_block()?;
        }

        let index_offset = self.offset;
        let mut section = Vec::new();
        for (first_key, frame_offset) in &self.index {
            section.write_u64::<LittleEndian>(first_key.len() as u64)?;
            section.extend_from_slice(first_key);
            section.write_u64::<LittleEndian>(*frame_offset)?;
        }
        self.file.write_all(&section)?;
        self.file.write_u64::<LittleEndian>(index_offset)?;

        self.file.flush()?;
        self.file.sync_all()?;

        let file_size = index_offset + section.len() as u64 + 8;
        Ok(TableSummary {
            first_key: self.first_key.expect("non-empty table has a first key"),
            last_key: self.last_key.expect("non-empty table has a last key"),
            entries: self.entries,
            file_size,
        })
    }

    /// Discards the partial table, removing the file.
    ///
    /// Used when a merge produces no output records.
    pub fn abandon(self) -> Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)
            .with_context(|| format!("failed to remove abandoned table {}", self.path.display()))?;
        Ok(())
    }

    /// Frames the open block out to disk: `[len][bytes][crc]`.
    fn flush_block(&mut self) -> Result<()> {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.block);
        let crc = hasher.finalize();

        self.file.write_u64::<LittleEndian>(self.block.len() as u64)?;
        self.file.write_all(&self.block)?;
        self.file.write_u32::<LittleEndian>(crc)?;

        self.offset += 8 + self.block.len() as u64 + 4;
        self.block.clear();
        Ok(())
    }
}
