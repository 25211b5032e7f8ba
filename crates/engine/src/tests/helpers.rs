use crate::{Config, Store};
use anyhow::Result;
use std::path::Path;

/// Opens a store with a tiny flush threshold, WAL fsync off, and automatic
/// compaction disabled so tests control the file set deterministically.
pub fn open_small(dir: &Path, threshold: usize) -> Result<Store> {
    Store::open(
        dir,
        Config {
            l0_compaction_trigger: 0,
            ..Config::small(threshold)
        },
    )
}

/// Counts files in `dir` with the given extension.
pub fn count_files(dir: &Path, ext: &str) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|x| x == ext)
                .unwrap_or(false)
        })
        .count()
}

/// Collects every key present in any `.sst` file under `dir`, tombstones
/// included. Used to assert what physically remains on disk.
pub fn keys_on_disk(dir: &Path) -> Result<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("sst") {
            continue;
        }
        let mut iter = sstable::TableIterator::open(&path)?;
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.advance()?;
        }
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}
