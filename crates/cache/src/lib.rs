//! # Block Cache
//!
//! A bounded, least-recently-used cache of decoded SSTable data blocks.
//!
//! Keys are `(filename, block_offset)` pairs; values are the raw block bytes
//! as returned after CRC verification, shared out as `Arc` so a block being
//! evicted under a reader's feet stays alive until the reader drops it.
//!
//! Capacity is a byte budget, not an entry count — a handful of 4 KiB blocks
//! and one oversized block are accounted the same way. Inserting a block
//! larger than the whole budget hands the bytes back uncached.
//!
//! The cache takes `&self` everywhere (interior `Mutex`) so a single
//! instance can be shared across reader threads and the compaction worker
//! behind one `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cache key: which file, which block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BlockKey {
    file: String,
    offset: u64,
}

struct Slot {
    bytes: Arc<Vec<u8>>,
    /// Recency stamp; also the slot's key in the eviction order map.
    tick: u64,
}

struct Inner {
    map: HashMap<BlockKey, Slot>,
    /// tick -> key, ascending = least recently used first.
    order: BTreeMap<u64, BlockKey>,
    used: usize,
    next_tick: u64,
}

/// Byte-budgeted LRU cache of data blocks.
pub struct BlockCache {
    budget: usize,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    /// Creates a cache with the given byte budget.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                used: 0,
                next_tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a block, refreshing its recency on hit.
    pub fn get(&self, file: &str, offset: u64) -> Option<Arc<Vec<u8>>> {
        let key = BlockKey {
            file: file.to_string(),
            offset,
        };
        let mut guard = self.inner.lock().expect("block cache mutex poisoned");
        let inner = &mut *guard;
        let tick = inner.next_tick;
        inner.next_tick += 1;

        match inner.map.get_mut(&key) {
            Some(slot) => {
                let old_tick = std::mem::replace(&mut slot.tick, tick);
                let bytes = Arc::clone(&slot.bytes);
                inner.order.remove(&old_tick);
                inner.order.insert(tick, key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts a block, evicting least-recently-used entries until the
    /// budget holds. Returns the shared handle for immediate use.
    pub fn insert(&self, file: &str, offset: u64, bytes: Vec<u8>) -> Arc<Vec<u8>> {
        let bytes = Arc::new(bytes);
        if bytes.len() > self.budget {
            return bytes;
        }

        let key = BlockKey {
            file: file.to_string(),
            offset,
        };
        let mut inner = self.inner.lock().expect("block cache mutex poisoned");

        // Replace any stale slot for the same block first.
        if let Some(old) = inner.map.remove(&key) {
            inner.order.remove(&old.tick);
            inner.used -= old.bytes.len();
        }

        while inner.used + bytes.len() > self.budget {
            let (&oldest, _) = inner
                .order
                .iter()
                .next()
                .expect("cache over budget but empty");
            let victim = inner.order.remove(&oldest).expect("order entry vanished");
            let slot = inner.map.remove(&victim).expect("map entry vanished");
            inner.used -= slot.bytes.len();
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.used += bytes.len();
        inner.order.insert(tick, key.clone());
        inner.map.insert(
            key,
            Slot {
                bytes: Arc::clone(&bytes),
                tick,
            },
        );
        bytes
    }

    /// Current number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("block cache mutex poisoned").map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.inner.lock().expect("block cache mutex poisoned").used
    }

    /// `(hits, misses)` counters since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hits, misses) = self.stats();
        f.debug_struct("BlockCache")
            .field("budget", &self.budget)
            .field("bytes_used", &self.bytes_used())
            .field("blocks", &self.len())
            .field("hits", &hits)
            .field("misses", &misses)
            .finish()
    }
}
