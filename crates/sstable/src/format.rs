//! Record and frame encoding shared by the writer, reader, and iterator.

use anyhow::{bail, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memtable::EntryRef;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Reserved `value_len` marking a tombstone record inside a data block.
pub const TOMBSTONE_LEN: u64 = u64::MAX;

/// The footer is a single `u64`: the file offset of the sparse index.
pub const FOOTER_BYTES: u64 = 8;

/// Largest key we will allocate for while decoding (64 KiB).
pub const MAX_KEY_BYTES: u64 = 64 * 1024;
/// Largest value we will allocate for while decoding (10 MiB).
pub const MAX_VALUE_BYTES: u64 = 10 * 1024 * 1024;
/// Largest framed block we will read. A block normally closes at ~4 KiB but
/// a single oversized record can push one well past the target.
pub const MAX_BLOCK_BYTES: u64 = 64 * 1024 * 1024;

/// Appends one record to an open block buffer.
pub fn write_record(block: &mut Vec<u8>, key: &[u8], entry: EntryRef<'_>) {
    block
        .write_u64::<LittleEndian>(key.len() as u64)
        .expect("vec write is infallible");
    block.extend_from_slice(key);
    match entry.as_value() {
        Some(v) => {
            block
                .write_u64::<LittleEndian>(v.len() as u64)
                .expect("vec write is infallible");
            block.extend_from_slice(v);
        }
        None => {
            block
                .write_u64::<LittleEndian>(TOMBSTONE_LEN)
                .expect("vec write is infallible");
        }
    }
}

/// Zero-copy cursor over the records packed in one decoded block.
///
/// Yields `(key, entry)` borrows into the block bytes, or an error if the
/// block is internally inconsistent (which means the CRC matched corrupt
/// data — effectively unreachable, but not trusted).
pub struct BlockRecords<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlockRecords<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u64(&mut self) -> Result<u64> {
        if self.pos + 8 > self.data.len() {
            bail!("corrupt block: truncated length field");
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(raw))
    }

    fn read_bytes(&mut self, len: u64) -> Result<&'a [u8]> {
        let len = len as usize;
        if self.pos + len > self.data.len() {
            bail!("corrupt block: field overruns block boundary");
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

impl<'a> Iterator for BlockRecords<'a> {
    type Item = Result<(&'a [u8], EntryRef<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let result = (|| {
            let key_len = self.read_u64()?;
            if key_len == 0 || key_len > MAX_KEY_BYTES {
                bail!("corrupt block: implausible key length {}", key_len);
            }
            let key = self.read_bytes(key_len)?;
            let value_len = self.read_u64()?;
            if value_len == TOMBSTONE_LEN {
                return Ok((key, EntryRef::Tombstone));
            }
            if value_len > MAX_VALUE_BYTES {
                bail!("corrupt block: implausible value length {}", value_len);
            }
            let value = self.read_bytes(value_len)?;
            Ok((key, EntryRef::Value(value)))
        })();
        Some(result)
    }
}

/// Reads and verifies one framed block at `offset`.
///
/// Frame layout: `[u64 block_len][block bytes][u32 crc32(block bytes)]`.
/// A CRC mismatch or an implausible length surfaces as corruption.
pub fn read_block(file: &mut File, offset: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let block_len = file.read_u64::<LittleEndian>()?;
    if block_len == 0 || block_len > MAX_BLOCK_BYTES {
        bail!("corrupt table: implausible block length {} at offset {}", block_len, offset);
    }

    let mut block = vec![0u8; block_len as usize];
    file.read_exact(&mut block)?;
    let stored_crc = file.read_u32::<LittleEndian>()?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&block);
    let actual_crc = hasher.finalize();
    if actual_crc != stored_crc {
        bail!(
            "corrupt table: block CRC mismatch at offset {} (stored {:#010x}, computed {:#010x})",
            offset,
            stored_crc,
            actual_crc
        );
    }
    Ok(block)
}

/// Reads the footer of an open table file, returning
/// `(index_offset, file_size)`.
pub fn read_footer(file: &mut File) -> Result<(u64, u64)> {
    let file_size = file.seek(SeekFrom::End(0))?;
    if file_size < FOOTER_BYTES {
        bail!("table file too small to hold a footer ({} bytes)", file_size);
    }
    file.seek(SeekFrom::Start(file_size - FOOTER_BYTES))?;
    let index_offset = file.read_u64::<LittleEndian>()?;
    if index_offset >= file_size - FOOTER_BYTES {
        bail!("corrupt table: index offset {} outside data section", index_offset);
    }
    Ok((index_offset, file_size))
}
