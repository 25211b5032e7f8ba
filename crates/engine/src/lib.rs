//! # Engine - DriftKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`],
//! [`sstable`], [`bloom`], and [`cache`] crates into a complete LSM-tree
//! key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   STORE                       │
//! │                                               │
//! │ write.rs → WAL append → memtable insert       │
//! │              |                                │
//! │              |  (threshold exceeded?)         │
//! │              |            yes                 │
//! │              v                                │
//! │           flush() → new L0 SSTable + filter   │
//! │                                               │
//! │ compaction.rs → background worker thread      │
//! │    L0 overflow  → merge into L1               │
//! │    Li oversized → merge into L(i+1)           │
//! │                                               │
//! │ read.rs → memtable → sealed → L0 newest-first │
//! │           → L1..Lmax by key range             │
//! │           (first match wins)                  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Store` struct, open/close, accessors, `Drop`        |
//! | [`config`]     | Immutable engine configuration                       |
//! | [`manifest`]   | Durable file-set metadata (atomic rewrite)           |
//! | `recovery.rs`  | Manifest load, level rebuild, WAL replay, GC sweep   |
//! | `write.rs`     | `put()`, `delete()`, `flush()`                       |
//! | `read.rs`      | `get()`, `scan()` and the merged scan iterator       |
//! | `compaction.rs`| Background worker, leveling, k-way merge, publication|
//!
//! ## Concurrency
//!
//! The level vector, manifest copy, and memtable pointer live under one
//! `RwLock`. Readers take the read lock just long enough to probe the
//! memtable and snapshot the `Arc` table handles they need; all file I/O
//! happens after the lock is dropped. The WAL sits behind its own mutex,
//! which doubles as the writer-side lock: a flush holds it end to end so no
//! write can slip between sealing the memtable and rotating the log.
//!
//! ## Crash safety
//!
//! Every write is fsynced into the WAL **before** the memtable update. The
//! WAL is rotated only **after** the flush that drained it has been
//! published in the manifest. The manifest itself is rewritten atomically
//! (temp + rename), and any data file it does not reference is deleted on
//! the next open.

mod compaction;
pub mod config;
pub mod manifest;
mod read;
mod recovery;
mod write;

pub use config::Config;
pub use read::ScanIter;

use anyhow::{Context, Result};
use cache::BlockCache;
use crossbeam_channel::Sender;
use manifest::{Manifest, TableMeta};
use memtable::MemTable;
use sstable::Table;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use wal::Wal;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Basename of the write-ahead log within the data directory.
pub const WAL_FILENAME: &str = "wal.log";

/// Capacity to size a bloom filter holding `entries` records.
///
/// A filter loaded to exactly its design capacity realizes its worst-case
/// false-positive rate, and compaction sizes from an estimate that may run
/// low; the 25% slack keeps the realized rate under the configured target
/// in both cases.
pub(crate) fn filter_capacity(entries: usize) -> usize {
    (entries + entries / 4).max(1)
}

/// Messages for the background compaction worker.
pub(crate) enum WorkerMsg {
    /// A flush or publication happened; look for work now.
    Wake,
    /// Stop after the current pass.
    Shutdown,
}

/// Everything guarded by the engine lock.
pub(crate) struct LsmState {
    /// The mutable memtable receiving writes.
    pub(crate) mem: MemTable,
    /// A memtable frozen at the start of a flush. Immutable, still readable,
    /// and cleared once its SSTable is published.
    pub(crate) sealed: Option<Arc<MemTable>>,
    /// `levels[0]` is newest-first and may overlap; every deeper level is
    /// sorted by first key with disjoint ranges.
    pub(crate) levels: Vec<Vec<Arc<Table>>>,
    pub(crate) manifest: Manifest,
}

impl LsmState {
    /// Derives the manifest entry list from the level vector.
    pub(crate) fn manifest_entries(levels: &[Vec<Arc<Table>>]) -> Vec<TableMeta> {
        let mut entries = Vec::new();
        for (level, tables) in levels.iter().enumerate() {
            for table in tables {
                entries.push(TableMeta {
                    level: level as u32,
                    filename: table.filename().to_string(),
                    first_key: table.first_key().to_vec(),
                    last_key: table.last_key().to_vec(),
                    file_size: table.file_size(),
                });
            }
        }
        entries
    }
}

/// Shared engine internals; the compaction worker holds a second `Arc`.
pub(crate) struct StoreInner {
    pub(crate) dir: PathBuf,
    pub(crate) cfg: Config,
    pub(crate) state: RwLock<LsmState>,
    /// The WAL handle; its mutex is also the writer-side lock.
    pub(crate) wal: Mutex<Wal>,
    pub(crate) block_cache: BlockCache,
    /// Held for the whole of one compaction: the worker and a manual
    /// `compact()` must never run concurrently.
    pub(crate) compaction_lock: Mutex<()>,
}

/// The DriftKV storage engine.
///
/// A `Store` is shared by reference: reads take `&self` and are safe from
/// any thread, writes take `&self` but are serialized through the internal
/// writer lock. Dropping the store shuts down the compaction worker and
/// flushes whatever the memtable still holds.
///
/// # Write path
///
/// 1. Append the record to the WAL (fsynced — crash-safe durability).
/// 2. Apply the mutation to the memtable.
/// 3. If the memtable crossed the flush threshold, seal it, write an L0
///    SSTable plus its bloom filter, publish via the manifest, rotate the
///    WAL.
///
/// # Read path
///
/// 1. Check the memtable, then the sealed memtable if a flush is in flight.
/// 2. Check L0 tables newest to oldest, then each deeper level's single
///    candidate table by key range. Bloom filters are consulted before any
///    table I/O; the first match wins, tombstones shadow older values.
pub struct Store {
    inner: Arc<StoreInner>,
    worker_tx: Sender<WorkerMsg>,
    worker: Option<JoinHandle<()>>,
}

impl Store {
    /// Opens (or creates) a store in `dir`, performing full recovery.
    ///
    /// # Recovery steps
    ///
    /// 1. Create the directory if missing and load the manifest.
    /// 2. Sweep files the manifest does not reference (garbage from an
    ///    interrupted flush or compaction).
    /// 3. Rebuild the level vector, loading each table with its sibling
    ///    bloom filter (an unreadable filter is a logged, skipped
    ///    optimization; a missing table is fatal).
    /// 4. Replay the WAL into a fresh memtable, repairing a corrupt tail.
    /// 5. Start the background compaction worker.
    pub fn open<P: AsRef<Path>>(dir: P, cfg: Config) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;

        let manifest = Manifest::load_or_create(&dir)?;
        recovery::sweep_garbage(&dir, &manifest);
        let levels = recovery::load_levels(&dir, &cfg, &manifest)?;

        let wal_path = dir.join(WAL_FILENAME);
        let mut mem = MemTable::new(cfg.arena_budget);
        recovery::replay_wal(&wal_path, &mut mem)?;
        let wal = Wal::open(&wal_path, cfg.wal_sync)?;

        let inner = Arc::new(StoreInner {
            dir,
            block_cache: BlockCache::new(cfg.block_cache_bytes),
            state: RwLock::new(LsmState {
                mem,
                sealed: None,
                levels,
                manifest,
            }),
            wal: Mutex::new(wal),
            compaction_lock: Mutex::new(()),
            cfg,
        });

        let (worker_tx, worker_rx) = crossbeam_channel::unbounded();
        let worker = compaction::spawn_worker(Arc::clone(&inner), worker_rx);

        Ok(Self {
            inner,
            worker_tx,
            worker: Some(worker),
        })
    }

    /// Shuts down the worker and flushes the memtable.
    ///
    /// Dropping the store does the same on a best-effort basis; `close`
    /// surfaces the errors.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.worker.take() {
            let _ = self.worker_tx.send(WorkerMsg::Shutdown);
            let _ = handle.join();
        }
        self.flush()
    }

    // ---- Introspection ----

    /// Number of tables currently at `level`.
    #[must_use]
    pub fn level_table_count(&self, level: usize) -> usize {
        let st = self.inner.state.read().expect("engine lock poisoned");
        st.levels.get(level).map_or(0, Vec::len)
    }

    /// Total number of live tables across all levels.
    #[must_use]
    pub fn table_count(&self) -> usize {
        let st = self.inner.state.read().expect("engine lock poisoned");
        st.levels.iter().map(Vec::len).sum()
    }

    /// Bytes currently buffered in the mutable memtable.
    #[must_use]
    pub fn memtable_bytes(&self) -> usize {
        let st = self.inner.state.read().expect("engine lock poisoned");
        st.mem.bytes_used()
    }

    /// Block-cache `(hits, misses)` counters.
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        self.inner.block_cache.stats()
    }

    /// The data directory this store lives in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }

    pub(crate) fn wake_worker(&self) {
        let _ = self.worker_tx.send(WorkerMsg::Wake);
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.read().expect("engine lock poisoned");
        let per_level: Vec<usize> = st.levels.iter().map(Vec::len).collect();
        f.debug_struct("Store")
            .field("dir", &self.inner.dir)
            .field("memtable_bytes", &st.mem.bytes_used())
            .field("memtable_entries", &st.mem.len())
            .field("flush_in_flight", &st.sealed.is_some())
            .field("tables_per_level", &per_level)
            .finish()
    }
}

/// Best-effort close on drop.
///
/// Errors are swallowed because `Drop` cannot propagate them — anything the
/// flush fails to persist is still safe in the WAL and will be recovered on
/// the next open.
impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
impl Store {
    /// Tears the store down the way a crash would: the worker is stopped,
    /// but nothing is flushed and no shutdown bookkeeping runs. Data not
    /// yet in an SSTable survives only through the WAL.
    pub(crate) fn simulate_crash(mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.worker_tx.send(WorkerMsg::Shutdown);
            let _ = handle.join();
        }
        std::mem::forget(self);
    }
}

#[cfg(test)]
mod tests;
