//! Cold-start recovery: garbage sweep, level rebuild, WAL replay.

use anyhow::{bail, ensure, Context, Result};
use bloom::BloomFilter;
use memtable::{EntryRef, MemTable};
use sstable::Table;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::manifest::{filter_filename, Manifest, MANIFEST_FILENAME, MANIFEST_TMP_FILENAME};
use crate::{Config, WAL_FILENAME};

/// Deletes files the manifest does not reference.
///
/// After a crash the directory may hold an SSTable or filter written by a
/// flush or compaction that never published, plus transient `.tmp` files.
/// The manifest is the single source of truth; everything else goes.
pub(crate) fn sweep_garbage(dir: &Path, manifest: &Manifest) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not scan data directory for garbage");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == MANIFEST_FILENAME || name == WAL_FILENAME {
            continue;
        }

        let keep = if name.ends_with(".sst") {
            manifest.references(name)
        } else if name.ends_with(".filter") {
            // A filter lives and dies with its table.
            let table = format!("{}.sst", name.trim_end_matches(".filter"));
            manifest.references(&table)
        } else {
            // compacted.tmp, manifest.tmp, anything unknown.
            name != MANIFEST_TMP_FILENAME && name != crate::compaction::COMPACTION_TMP_FILENAME
        };

        if !keep {
            info!(file = %path.display(), "sweeping unreferenced file");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "failed to sweep file");
            }
        }
    }
}

/// Rebuilds the level vector from the manifest.
///
/// L0 is ordered newest first (filenames are monotone table numbers, so
/// descending filename order is creation order); deeper levels are sorted
/// ascending by first key. A referenced table that is missing on disk is
/// fatal; an unreadable sibling filter only costs the lookup shortcut.
pub(crate) fn load_levels(
    dir: &Path,
    cfg: &Config,
    manifest: &Manifest,
) -> Result<Vec<Vec<Arc<Table>>>> {
    let mut levels: Vec<Vec<Arc<Table>>> = vec![Vec::new(); cfg.max_level];

    for meta in &manifest.entries {
        ensure!(
            (meta.level as usize) < cfg.max_level,
            "manifest references level {} but max_level is {}",
            meta.level,
            cfg.max_level
        );

        let path = dir.join(&meta.filename);
        if !path.exists() {
            bail!(
                "manifest references missing table {} — data directory is damaged",
                path.display()
            );
        }

        let filter_path = dir.join(filter_filename(&meta.filename));
        let filter = match BloomFilter::load(&filter_path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!(
                    filter = %filter_path.display(),
                    error = %e,
                    "bloom filter unreadable, lookups will probe the table directly"
                );
                None
            }
        };

        let table = Table::open(&path, filter)
            .with_context(|| format!("failed to open table {}", path.display()))?;
        levels[meta.level as usize].push(Arc::new(table));
    }

    levels[0].sort_by(|a, b| b.filename().cmp(a.filename()));
    for level in levels.iter_mut().skip(1) {
        level.sort_by(|a, b| a.first_key().cmp(b.first_key()));
    }

    Ok(levels)
}

/// Replays the WAL into a fresh memtable.
///
/// Tail repair (warning + truncation to the last record boundary) happens
/// inside [`wal::recover`]; this wrapper just applies the records.
pub(crate) fn replay_wal(path: &Path, mem: &mut MemTable) -> Result<()> {
    let stats = wal::recover(path, |record| match record {
        wal::WalRecord::Put { key, value } => mem.put(&key, EntryRef::Value(&value)),
        wal::WalRecord::Delete { key } => mem.put(&key, EntryRef::Tombstone),
    })
    .context("WAL replay failed")?;

    if stats.records > 0 {
        info!(records = stats.records, "replayed write-ahead log");
    }
    Ok(())
}
