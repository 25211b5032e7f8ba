//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the DriftKV storage engine.
//!
//! When the in-memory [`memtable::MemTable`] exceeds its size threshold the
//! engine flushes it to disk as an SSTable. SSTables are *write-once,
//! read-many* — once created they are never modified, only superseded by
//! compaction and deleted.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (framed blocks)                                  │
//! │                                                               │
//! │ block_len (u64) | block bytes | crc32(block bytes) (u32)      │
//! │                                                               │
//! │ within a block, records are packed back to back:              │
//! │   key_len (u64) | key | value_len (u64) | [value]             │
//! │   value_len == u64::MAX marks a tombstone (no value bytes)    │
//! │                                                               │
//! │ a block is closed once its unframed size crosses the target   │
//! │ (4 KiB by default)                                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SPARSE INDEX SECTION (one entry per data block)               │
//! │                                                               │
//! │ key_len (u64) | first key of block | block_file_offset (u64)  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 8 bytes)                                  │
//! │                                                               │
//! │ index_section_offset (u64 LE)                                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The bloom filter is **not** embedded —
//! it lives in a sibling `.filter` file (see the `bloom` crate) so it can
//! be loaded without touching the table and dropped together with it.

mod format;
mod iterator;
mod merge;
mod reader;
mod writer;

pub use format::{BlockRecords, FOOTER_BYTES, TOMBSTONE_LEN};
pub use iterator::TableIterator;
pub use merge::{MergeIterator, MergeSource};
pub use reader::Table;
pub use writer::{TableBuilder, TableSummary};

#[cfg(test)]
mod tests;
