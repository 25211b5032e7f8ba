mod iterator_tests;
mod reader_tests;
mod writer_tests;

use crate::{TableBuilder, TableSummary};
use anyhow::Result;
use memtable::EntryRef;
use std::path::Path;

/// Builds a table from `(key, value-or-tombstone)` pairs, already sorted.
pub(crate) fn build_table(
    path: &Path,
    block_size: usize,
    pairs: &[(&[u8], Option<&[u8]>)],
) -> Result<TableSummary> {
    let mut builder = TableBuilder::new(path, block_size)?;
    for (key, value) in pairs {
        let entry = match value {
            Some(v) => EntryRef::Value(v),
            None => EntryRef::Tombstone,
        };
        builder.add(key, entry)?;
    }
    builder.finish()
}
