//! K-way merge over prioritized sources.
//!
//! Produces `(key, Entry)` pairs in ascending key order. When the same key
//! appears in several sources, the **highest-priority** source (lowest
//! index) wins and every other source holding that key is advanced past it,
//! keeping all cursors aligned.
//!
//! This is the core primitive for both compaction (sources are table
//! iterators, victim first) and range scans (the memtable cursor outranks
//! every table). Tombstone handling is deliberately left to the caller:
//! compaction decides per level whether to keep them, scans always suppress
//! them.

use anyhow::Result;
use memtable::{Entry, EntryRef};

use crate::TableIterator;

/// A cursor that the merge can drive.
///
/// Sources are handed to [`MergeIterator::new`] in priority order: index 0
/// shadows index 1, and so on. For the engine that ordering is
/// memtable, L0 newest to oldest, then L1, L2, ...
pub trait MergeSource {
    /// `false` once the source is exhausted.
    fn valid(&self) -> bool;
    /// Current key. Only called while valid.
    fn key(&self) -> &[u8];
    /// Current entry. Only called while valid.
    fn entry(&self) -> EntryRef<'_>;
    /// Moves to the next record.
    fn advance(&mut self) -> Result<()>;
}

impl MergeSource for TableIterator {
    fn valid(&self) -> bool {
        TableIterator::valid(self)
    }

    fn key(&self) -> &[u8] {
        TableIterator::key(self)
    }

    fn entry(&self) -> EntryRef<'_> {
        TableIterator::entry(self)
    }

    fn advance(&mut self) -> Result<()> {
        TableIterator::advance(self)
    }
}

/// Merges N prioritized sources into one deduplicated ascending stream.
pub struct MergeIterator<S: MergeSource> {
    sources: Vec<S>,
}

impl<S: MergeSource> MergeIterator<S> {
    /// `sources[0]` has the highest priority.
    #[must_use]
    pub fn new(sources: Vec<S>) -> Self {
        Self { sources }
    }

    /// Returns the next `(key, entry)` in ascending key order, or `None`
    /// when every source is exhausted.
    ///
    /// Steps: find the minimum current key across valid sources, take the
    /// record from the highest-priority source holding it, then advance
    /// *every* source positioned on that key so shadowed duplicates are
    /// consumed.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Entry)>> {
        let mut min_key: Option<&[u8]> = None;
        for source in self.sources.iter().filter(|s| s.valid()) {
            match min_key {
                Some(current) if source.key() >= current => {}
                _ => min_key = Some(source.key()),
            }
        }
        let min_key = match min_key {
            Some(k) => k.to_vec(),
            None => return Ok(None),
        };

        let mut winner: Option<Entry> = None;
        for source in self.sources.iter_mut() {
            if source.valid() && source.key() == min_key.as_slice() {
                if winner.is_none() {
                    winner = Some(source.entry().to_entry());
                }
                source.advance()?;
            }
        }

        let entry = winner.expect("a source held the minimum key");
        Ok(Some((min_key, entry)))
    }

    /// Drains the merge into a `Vec`. Test helper.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, Entry)>> {
        let mut out = Vec::new();
        while let Some(pair) = self.next_entry()? {
            out.push(pair);
        }
        Ok(out)
    }
}
