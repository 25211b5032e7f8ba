//! Engine configuration.
//!
//! Every tunable the storage engine consumes is collected here and passed
//! immutably at [`Store::open`](crate::Store::open). The defaults are the
//! engine's contract; tests shrink them to force flushes and compactions
//! with little data.

use crate::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Immutable engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memtable byte size that triggers a flush to an L0 SSTable.
    pub memtable_threshold: usize,
    /// Hard byte budget of the memtable arena. Must be at least
    /// `memtable_threshold + MAX_KEY_SIZE + MAX_VALUE_SIZE`: the flush runs
    /// after the write that crosses the threshold, so the arena has to
    /// absorb one maximum-sized record on top of a nearly-full memtable.
    pub arena_budget: usize,
    /// Target unframed size of one SSTable data block.
    pub block_size: usize,
    /// Byte budget of the shared block cache.
    pub block_cache_bytes: usize,
    /// Number of levels, L0 included.
    pub max_level: usize,
    /// Target false-positive rate for per-table bloom filters.
    pub bloom_fpr: f64,
    /// L0 file count that triggers compaction into L1. `0` disables the
    /// automatic trigger (manual [`compact`](crate::Store::compact) only).
    pub l0_compaction_trigger: usize,
    /// Base size limit for L1; level `i >= 1` is limited to
    /// `level_base_bytes * 10^(i-1)`.
    pub level_base_bytes: u64,
    /// Fsync the WAL on every append. Turning this off trades crash
    /// durability of the most recent writes for write throughput.
    pub wal_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        let memtable_threshold = 4 * 1024 * 1024;
        Self {
            memtable_threshold,
            arena_budget: memtable_threshold + MAX_KEY_SIZE + MAX_VALUE_SIZE,
            block_size: 4 * 1024,
            block_cache_bytes: 4 * 1024 * 1024,
            max_level: 12,
            bloom_fpr: 0.01,
            l0_compaction_trigger: 4,
            level_base_bytes: 10 * 1024 * 1024,
            wal_sync: true,
        }
    }
}

impl Config {
    /// A small-threshold configuration for tests: flushes after `threshold`
    /// bytes, no WAL fsync, automatic compaction left on. The arena keeps
    /// the full maximum-record headroom; it is allocated lazily, so a large
    /// budget costs nothing up front.
    #[must_use]
    pub fn small(threshold: usize) -> Self {
        Self {
            memtable_threshold: threshold,
            arena_budget: threshold + MAX_KEY_SIZE + MAX_VALUE_SIZE,
            wal_sync: false,
            ..Self::default()
        }
    }
}
