//! Write path: `put()`, `delete()`, and `flush()`.
//!
//! All mutations flow through this module. Each write is appended to the
//! WAL for durability, then applied to the memtable. When the memtable
//! crosses the flush threshold it is sealed and persisted as a new L0
//! SSTable with a sibling bloom filter.

use anyhow::{anyhow, ensure, Context, Result};
use bloom::BloomFilter;
use memtable::{EntryRef, MemTable};
use sstable::{Table, TableBuilder};
use std::sync::Arc;
use tracing::info;
use wal::WalRecord;

use crate::manifest::{filter_filename, table_filename};
use crate::{LsmState, Store, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Store {
    /// Inserts or updates a key-value pair.
    ///
    /// The record is appended to the WAL first; only on success is the
    /// memtable updated, so an acknowledged write is always recoverable.
    /// Crossing the flush threshold triggers a flush before returning.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        );
        ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );

        self.write_record(
            WalRecord::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
            key,
            EntryRef::Value(value),
        )
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// The tombstone shadows any older value in deeper levels until a
    /// compaction into the final level for this key drops it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        );

        self.write_record(
            WalRecord::Delete { key: key.to_vec() },
            key,
            EntryRef::Tombstone,
        )
    }

    /// WAL append, memtable insert, flush check — under the writer lock.
    fn write_record(&self, record: WalRecord, key: &[u8], entry: EntryRef<'_>) -> Result<()> {
        let inner = self.inner();
        let needs_flush = {
            let mut wal_guard = inner.wal.lock().map_err(|e| anyhow!("writer lock poisoned: {e}"))?;
            wal_guard
                .append(&record)
                .context("WAL append failed; write aborted")?;

            let mut st = inner.state.write().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;
            st.mem.put(key, entry);
            st.mem.bytes_used() >= inner.cfg.memtable_threshold
        };

        if needs_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes the memtable to a new L0 SSTable.
    ///
    /// A no-op when the memtable is empty. Public mainly for tests and the
    /// CLI's `FLUSH`-style tooling; the write path calls it automatically.
    ///
    /// # Steps
    ///
    /// 1. Take the writer lock for the whole flush — no write may land
    ///    between sealing the memtable and rotating the WAL.
    /// 2. Seal: swap in a fresh memtable; the sealed one stays readable.
    /// 3. Outside the engine lock, stream the sealed memtable through a
    ///    [`TableBuilder`] and a fresh bloom filter.
    /// 4. Publish under the engine lock: new table at the front of L0,
    ///    manifest saved atomically.
    /// 5. Rotate the WAL and wake the compaction worker.
    ///
    /// On failure the sealed records are restored to the memtable and the
    /// WAL is left in place — nothing is lost.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner();
        let mut wal_guard = inner.wal.lock().map_err(|e| anyhow!("writer lock poisoned: {e}"))?;

        // Seal under the engine lock; readers keep seeing the sealed data.
        let sealed = {
            let mut st = inner.state.write().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;
            if st.mem.is_empty() {
                return Ok(());
            }
            let sealed = Arc::new(std::mem::replace(
                &mut st.mem,
                MemTable::new(inner.cfg.arena_budget),
            ));
            st.sealed = Some(Arc::clone(&sealed));
            sealed
        };

        let result = self.build_and_publish_l0(&sealed);

        match result {
            Ok(filename) => {
                wal_guard.rotate().context("WAL rotation after flush failed")?;
                info!(
                    table = %filename,
                    entries = sealed.len(),
                    bytes = sealed.bytes_used(),
                    "flushed memtable to L0"
                );
                drop(wal_guard);
                self.wake_worker();
                Ok(())
            }
            Err(e) => {
                // Un-seal: the fresh memtable saw no writes (writer lock is
                // held), so replaying the sealed records restores it exactly.
                let mut st = inner.state.write().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;
                for (key, entry) in sealed.iter() {
                    st.mem.put(key, entry);
                }
                st.sealed = None;
                Err(e)
            }
        }
    }

    /// Writes the sealed memtable out as an L0 table + filter and publishes
    /// both in the manifest. Returns the new table's filename.
    fn build_and_publish_l0(&self, sealed: &MemTable) -> Result<String> {
        let inner = self.inner();

        let seq = {
            let mut st = inner.state.write().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;
            st.manifest.allocate_table_seq()
        };
        let filename = table_filename(seq);
        let table_path = inner.dir.join(&filename);
        let filter_path = inner.dir.join(filter_filename(&filename));

        // Heavy I/O, engine lock not held.
        let mut builder = TableBuilder::new(&table_path, inner.cfg.block_size)?;
        let mut filter = BloomFilter::new(crate::filter_capacity(sealed.len()), inner.cfg.bloom_fpr);
        for (key, entry) in sealed.iter() {
            builder.add(key, entry)?;
            filter.insert(key);
        }
        let summary = builder.finish()?;
        filter.save(&filter_path).context("failed to persist bloom filter")?;

        let table = Arc::new(Table::open(&table_path, Some(filter))?);

        // Publish: manifest first, level vector only once the save returned.
        let mut st = inner.state.write().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;
        let mut levels = st.levels.clone();
        levels[0].insert(0, table);
        st.manifest.entries = LsmState::manifest_entries(&levels);
        st.manifest.save()?;
        st.levels = levels;
        st.sealed = None;

        debug_assert_eq!(summary.entries, sealed.len());
        Ok(filename)
    }
}
