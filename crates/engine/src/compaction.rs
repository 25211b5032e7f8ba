//! Background compaction: leveling triggers, k-way merge, publication.
//!
//! One long-lived worker thread owns compaction. It wakes on an explicit
//! signal (sent after every flush) or a one-second fallback tick, then
//! drains triggers one compaction at a time:
//!
//! - **L0 → L1** when L0 holds more files than the configured trigger. The
//!   victim is the *oldest* L0 table; newer L0 tables shadow the output by
//!   read priority, so they can stay put.
//! - **Li → L(i+1)** when level `i`'s total bytes exceed
//!   `level_base_bytes * 10^(i-1)`. The victim is the first table by key.
//!
//! The input set is the victim plus every target-level table whose key
//! range intersects it (boundary keys inclusive). The merge streams through
//! a [`TableBuilder`] into `compacted.tmp`; tombstones are dropped only
//! when no level deeper than the target could still hold the key — dropping
//! them earlier would resurrect older versions. Publication renames the
//! output, rewrites the manifest, and only then swaps the in-memory level
//! vector; a crash at any point leaves either the old file set or an
//! orphaned output that the next open sweeps.
//!
//! Errors on the heavy path are logged and swallowed — the file set is
//! untouched and the next tick retries.

use anyhow::{anyhow, Context, Result};
use bloom::BloomFilter;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use sstable::{MergeIterator, Table, TableBuilder, TableIterator};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manifest::{filter_filename, table_filename};
use crate::{LsmState, Store, StoreInner, WorkerMsg};

/// Transient compaction output, renamed to `<seq>.sst` on publication.
pub(crate) const COMPACTION_TMP_FILENAME: &str = "compacted.tmp";

/// How long the worker sleeps before a fallback pass when nothing wakes it.
const WORKER_TICK: Duration = Duration::from_secs(1);

/// Spawns the compaction worker. It exits on [`WorkerMsg::Shutdown`] or
/// when every sender is gone.
pub(crate) fn spawn_worker(inner: Arc<StoreInner>, rx: Receiver<WorkerMsg>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("driftkv-compaction".to_string())
        .spawn(move || loop {
            match rx.recv_timeout(WORKER_TICK) {
                Ok(WorkerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Ok(WorkerMsg::Wake) | Err(RecvTimeoutError::Timeout) => {
                    debug!("compaction worker pass");
                    loop {
                        match inner.compact_pass(false) {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                warn!(error = %e, "compaction failed; file set unchanged, will retry");
                                break;
                            }
                        }
                    }
                }
            }
        })
        .expect("failed to spawn compaction worker")
}

/// One selected compaction: inputs, target, and the context needed for the
/// tombstone policy.
struct CompactionJob {
    source_level: usize,
    target_level: usize,
    victim: Arc<Table>,
    overlaps: Vec<Arc<Table>>,
    /// Key ranges of every table in levels deeper than the target. A
    /// tombstone may be dropped only if none of these cover its key.
    deeper_ranges: Vec<(Vec<u8>, Vec<u8>)>,
}

impl StoreInner {
    /// Runs at most one compaction. Returns `true` if one was published
    /// (or a pure removal happened), `false` if no trigger fired.
    ///
    /// `force_l0` compacts L0 regardless of the file-count trigger — used
    /// by [`Store::compact`] to drain L0 deterministically.
    pub(crate) fn compact_pass(&self, force_l0: bool) -> Result<bool> {
        // Serialize compactions: the worker and a manual `compact()` call
        // must never select the same victim twice.
        let _exclusive = self
            .compaction_lock
            .lock()
            .map_err(|e| anyhow!("compaction lock poisoned: {e}"))?;

        let Some(job) = self.select_job(force_l0)? else {
            return Ok(false);
        };

        let result = self.run_job(&job);
        if result.is_err() {
            let _ = std::fs::remove_file(self.dir.join(COMPACTION_TMP_FILENAME));
        }
        result?;
        Ok(true)
    }

    /// Picks the next compaction under a short read lock, snapshotting the
    /// `Arc` handles the merge will need.
    fn select_job(&self, force_l0: bool) -> Result<Option<CompactionJob>> {
        let st = self.state.read().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;

        let deeper_ranges = |levels: &[Vec<Arc<Table>>], target: usize| -> Vec<(Vec<u8>, Vec<u8>)> {
            levels
                .iter()
                .skip(target + 1)
                .flatten()
                .map(|t| (t.first_key().to_vec(), t.last_key().to_vec()))
                .collect()
        };

        // L0 -> L1: count trigger.
        let l0 = &st.levels[0];
        let l0_fires = if force_l0 {
            !l0.is_empty()
        } else {
            self.cfg.l0_compaction_trigger > 0 && l0.len() > self.cfg.l0_compaction_trigger
        };
        if l0_fires {
            let victim = Arc::clone(l0.last().expect("L0 checked non-empty"));
            let overlaps: Vec<Arc<Table>> = st.levels[1]
                .iter()
                .filter(|t| t.overlaps(victim.first_key(), victim.last_key()))
                .cloned()
                .collect();
            return Ok(Some(CompactionJob {
                source_level: 0,
                target_level: 1,
                deeper_ranges: deeper_ranges(&st.levels, 1),
                victim,
                overlaps,
            }));
        }

        // Li -> L(i+1): size trigger. The deepest level has nowhere to go.
        for level in 1..self.cfg.max_level - 1 {
            let total: u64 = st.levels[level].iter().map(|t| t.file_size()).sum();
            if total <= self.level_size_limit(level) {
                continue;
            }
            let victim = Arc::clone(&st.levels[level][0]);
            let target = level + 1;
            let overlaps: Vec<Arc<Table>> = st.levels[target]
                .iter()
                .filter(|t| t.overlaps(victim.first_key(), victim.last_key()))
                .cloned()
                .collect();
            return Ok(Some(CompactionJob {
                source_level: level,
                target_level: target,
                deeper_ranges: deeper_ranges(&st.levels, target),
                victim,
                overlaps,
            }));
        }

        Ok(None)
    }

    /// `level_base_bytes * 10^(level-1)` for level >= 1.
    fn level_size_limit(&self, level: usize) -> u64 {
        self.cfg
            .level_base_bytes
            .saturating_mul(10u64.saturating_pow(level as u32 - 1))
    }

    /// The heavy phase (merge + build, no engine lock) followed by the
    /// publication critical section.
    fn run_job(&self, job: &CompactionJob) -> Result<()> {
        // Victim first: it is strictly newer than everything in the target
        // level, so it wins key collisions in the merge.
        let mut sources = Vec::with_capacity(1 + job.overlaps.len());
        sources.push(TableIterator::open(job.victim.path())?);
        for table in &job.overlaps {
            sources.push(TableIterator::open(table.path())?);
        }
        let mut merge = MergeIterator::new(sources);

        let estimated: usize = job.victim.estimated_entries(self.cfg.bloom_fpr)
            + job
                .overlaps
                .iter()
                .map(|t| t.estimated_entries(self.cfg.bloom_fpr))
                .sum::<usize>();
        let mut filter = BloomFilter::new(crate::filter_capacity(estimated), self.cfg.bloom_fpr);

        let tmp_path = self.dir.join(COMPACTION_TMP_FILENAME);
        let mut builder = TableBuilder::new(&tmp_path, self.cfg.block_size)?;

        while let Some((key, entry)) = merge.next_entry()? {
            if entry.is_tombstone() && !covered_by(&job.deeper_ranges, &key) {
                // The output level is the deepest that can hold this key;
                // the tombstone has nothing left to shadow.
                continue;
            }
            builder.add(&key, entry.as_ref())?;
            filter.insert(&key);
        }

        let input_count = 1 + job.overlaps.len();
        if builder.entries() == 0 {
            builder.abandon()?;
            self.publish(job, None)?;
            info!(
                from_level = job.source_level,
                to_level = job.target_level,
                inputs = input_count,
                "compaction produced no records, inputs removed"
            );
        } else {
            let entries = builder.entries();
            builder.finish()?;
            let filename = self.publish(job, Some(filter))?;
            info!(
                from_level = job.source_level,
                to_level = job.target_level,
                inputs = input_count,
                output = %filename.expect("publication with output returns a name"),
                entries,
                "compaction published"
            );
        }

        // Inputs are superseded; readers that still hold the Arc handles
        // keep their open file descriptors until they finish.
        self.remove_table_files(&job.victim);
        for table in &job.overlaps {
            self.remove_table_files(table);
        }
        Ok(())
    }

    /// The publication critical section: rename the output into place,
    /// persist its filter, rewrite the manifest, and only then swap the
    /// in-memory level vector.
    fn publish(&self, job: &CompactionJob, output: Option<BloomFilter>) -> Result<Option<String>> {
        let mut st = self.state.write().map_err(|e| anyhow!("engine lock poisoned: {e}"))?;

        let mut levels = st.levels.clone();
        levels[job.source_level].retain(|t| t.filename() != job.victim.filename());
        levels[job.target_level]
            .retain(|t| !job.overlaps.iter().any(|o| o.filename() == t.filename()));

        let mut published = None;
        if let Some(filter) = output {
            let seq = st.manifest.allocate_table_seq();
            let filename = table_filename(seq);
            let final_path = self.dir.join(&filename);

            std::fs::rename(self.dir.join(COMPACTION_TMP_FILENAME), &final_path)
                .context("failed to rename compaction output")?;
            filter
                .save(self.dir.join(filter_filename(&filename)))
                .context("failed to persist compaction filter")?;

            let table = Arc::new(Table::open(&final_path, Some(filter))?);
            let pos = levels[job.target_level]
                .partition_point(|t| t.first_key() < table.first_key());
            levels[job.target_level].insert(pos, table);
            published = Some(filename);
        }

        st.manifest.entries = LsmState::manifest_entries(&levels);
        st.manifest.save()?;
        st.levels = levels;
        Ok(published)
    }

    /// Best-effort deletion of a superseded table and its filter.
    fn remove_table_files(&self, table: &Table) {
        for path in [
            table.path().to_path_buf(),
            self.dir.join(filter_filename(table.filename())),
        ] {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "failed to delete superseded file");
            }
        }
    }
}

/// `true` if any `[first, last]` range covers `key`.
fn covered_by(ranges: &[(Vec<u8>, Vec<u8>)], key: &[u8]) -> bool {
    ranges
        .iter()
        .any(|(first, last)| first.as_slice() <= key && key <= last.as_slice())
}

impl Store {
    /// Drains every pending compaction, forcing L0 down into L1 even when
    /// the file-count trigger has not fired.
    ///
    /// Primarily for tests and the CLI; the background worker does the same
    /// work incrementally.
    pub fn compact(&self) -> Result<()> {
        while self.inner().compact_pass(true)? {}
        Ok(())
    }
}
