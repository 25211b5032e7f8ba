//! Read path: `get()` and `scan()`.
//!
//! Point lookups walk the sources in recency order — memtable, sealed
//! memtable, L0 newest-first, then one range-matched candidate per deeper
//! level — and stop at the first hit. Range scans snapshot the in-memory
//! sources and k-way merge them with one table iterator per file whose key
//! range intersects the scan range.

use anyhow::{anyhow, Result};
use memtable::{Entry, EntryRef};
use sstable::{MergeIterator, MergeSource, Table, TableIterator};
use std::sync::Arc;

use crate::Store;

impl Store {
    /// Looks up a key, returning its value if present and live.
    ///
    /// Tombstones in any layer shadow older values and surface as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a table read fails (I/O or corruption). A key
    /// that simply isn't there is `Ok(None)`, not an error.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        anyhow::ensure!(!key.is_empty(), "key must not be empty");
        let inner = self.inner();

        // Probe the in-memory sources and snapshot candidate tables under
        // the read lock; all file I/O happens after it is dropped.
        let candidates: Vec<Arc<Table>> = {
            let st = inner.state.read().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;

            if let Some(entry) = st.mem.get(key) {
                return Ok(entry.as_value().map(<[u8]>::to_vec));
            }
            if let Some(sealed) = &st.sealed {
                if let Some(entry) = sealed.get(key) {
                    return Ok(entry.as_value().map(<[u8]>::to_vec));
                }
            }

            let mut out = Vec::new();
            for table in &st.levels[0] {
                if table.range_contains(key) {
                    out.push(Arc::clone(table));
                }
            }
            for level in st.levels.iter().skip(1) {
                // Disjoint ranges: at most one candidate per level.
                if let Some(table) = level.iter().find(|t| t.range_contains(key)) {
                    out.push(Arc::clone(table));
                }
            }
            out
        };

        for table in candidates {
            match table.get(key, &inner.block_cache)? {
                Some(Entry::Value(value)) => return Ok(Some(value)),
                Some(Entry::Tombstone) => return Ok(None),
                None => continue,
            }
        }
        Ok(None)
    }

    /// Returns a merged iterator over all live keys in `[start, end]`,
    /// **inclusive on both ends**.
    ///
    /// The iterator owns everything it needs — a snapshot of the in-memory
    /// sources and one open file iterator per overlapping table — so it
    /// stays valid while writes, flushes, and compactions continue. A range
    /// with `start > end` yields an empty iterator.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<ScanIter> {
        if start > end {
            return Ok(ScanIter::exhausted());
        }
        let inner = self.inner();

        // Snapshot in-memory ranges and table handles under the read lock.
        let (mem_snapshot, sealed_snapshot, tables) = {
            let st = inner.state.read().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;

            let snapshot_range = |mem: &memtable::MemTable| -> Vec<(Vec<u8>, Entry)> {
                mem.scan_from(start)
                    .take_while(|(key, _)| *key <= end)
                    .map(|(key, entry)| (key.to_vec(), entry.to_entry()))
                    .collect()
            };

            let mem_snapshot = snapshot_range(&st.mem);
            let sealed_snapshot = st.sealed.as_deref().map(snapshot_range);

            let mut tables: Vec<Arc<Table>> = Vec::new();
            for level in &st.levels {
                for table in level {
                    if table.overlaps(start, end) {
                        tables.push(Arc::clone(table));
                    }
                }
            }
            (mem_snapshot, sealed_snapshot, tables)
        };

        // Open file iterators outside the lock, in source-priority order:
        // memtable, sealed, L0 newest-first, then deeper levels.
        let mut sources = Vec::with_capacity(tables.len() + 2);
        sources.push(ScanSource::Snapshot(SnapshotCursor::new(mem_snapshot)));
        if let Some(snapshot) = sealed_snapshot {
            sources.push(ScanSource::Snapshot(SnapshotCursor::new(snapshot)));
        }
        for table in tables {
            let mut iter = TableIterator::open(table.path())?;
            iter.seek(start)?;
            sources.push(ScanSource::Table(iter));
        }

        Ok(ScanIter {
            merge: Some(MergeIterator::new(sources)),
            end: end.to_vec(),
        })
    }
}

/// Cursor over a vector snapshot of an in-memory source.
struct SnapshotCursor {
    pairs: Vec<(Vec<u8>, Entry)>,
    pos: usize,
}

impl SnapshotCursor {
    fn new(pairs: Vec<(Vec<u8>, Entry)>) -> Self {
        Self { pairs, pos: 0 }
    }
}

/// One prioritized input to the scan merge.
enum ScanSource {
    Snapshot(SnapshotCursor),
    Table(TableIterator),
}

impl MergeSource for ScanSource {
    fn valid(&self) -> bool {
        match self {
            ScanSource::Snapshot(c) => c.pos < c.pairs.len(),
            ScanSource::Table(t) => t.valid(),
        }
    }

    fn key(&self) -> &[u8] {
        match self {
            ScanSource::Snapshot(c) => &c.pairs[c.pos].0,
            ScanSource::Table(t) => t.key(),
        }
    }

    fn entry(&self) -> EntryRef<'_> {
        match self {
            ScanSource::Snapshot(c) => c.pairs[c.pos].1.as_ref(),
            ScanSource::Table(t) => t.entry(),
        }
    }

    fn advance(&mut self) -> Result<()> {
        match self {
            ScanSource::Snapshot(c) => {
                c.pos += 1;
                Ok(())
            }
            ScanSource::Table(t) => t.advance(),
        }
    }
}

/// Merged range-scan iterator.
///
/// Yields live `(key, value)` pairs in strictly ascending key order:
/// duplicates are resolved toward the most recent source and tombstones are
/// suppressed. The iterator ends at the first key past the inclusive upper
/// bound.
pub struct ScanIter {
    merge: Option<MergeIterator<ScanSource>>,
    end: Vec<u8>,
}

impl ScanIter {
    fn exhausted() -> Self {
        Self {
            merge: None,
            end: Vec::new(),
        }
    }
}

impl Iterator for ScanIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let merge = self.merge.as_mut()?;
        loop {
            match merge.next_entry() {
                Ok(Some((key, entry))) => {
                    if key > self.end {
                        self.merge = None;
                        return None;
                    }
                    match entry {
                        Entry::Value(value) => return Some(Ok((key, value))),
                        Entry::Tombstone => continue,
                    }
                }
                Ok(None) => {
                    self.merge = None;
                    return None;
                }
                Err(e) => {
                    self.merge = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl std::fmt::Debug for ScanIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanIter")
            .field("exhausted", &self.merge.is_none())
            .finish()
    }
}
