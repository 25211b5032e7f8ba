//! End-to-end test battery for `driftkv test`.
//!
//! Each scenario runs against its own temporary directory and returns an
//! error describing the first violated expectation. The runner prints one
//! PASS/FAIL line per scenario and reports the failure count so `main` can
//! exit non-zero.

use anyhow::{anyhow, ensure, Result};
use engine::{Config, Store};
use tempfile::tempdir;

fn small_config() -> Config {
    Config {
        l0_compaction_trigger: 0,
        wal_sync: false,
        ..Config::default()
    }
}

/// Runs every scenario, printing a line per result. Returns the number of
/// failures.
pub fn run_all() -> usize {
    let scenarios: &[(&str, fn() -> Result<()>)] = &[
        ("durability across crash", durability),
        ("shadowing across memtable and disk", shadowing),
        ("compaction preserves newest", compaction_newest),
        ("tombstone lifecycle", tombstone_lifecycle),
        ("range scan", range_scan),
        ("bloom efficiency", bloom_efficiency),
    ];

    let mut failures = 0;
    for (name, scenario) in scenarios {
        match scenario() {
            Ok(()) => println!("PASS  {name}"),
            Err(e) => {
                failures += 1;
                println!("FAIL  {name}: {e:#}");
            }
        }
    }
    println!("{} passed, {} failed", scenarios.len() - failures, failures);
    failures
}

/// A write acknowledged before a crash is visible after reopen.
fn durability() -> Result<()> {
    let dir = tempdir()?;

    let store = Store::open(dir.path(), small_config())?;
    store.put(b"User:100", b"Alice")?;
    // Crash: no close, no flush. The record only exists in the WAL.
    std::mem::forget(store);

    let store = Store::open(dir.path(), small_config())?;
    ensure!(
        store.get(b"User:100")? == Some(b"Alice".to_vec()),
        "value lost across simulated crash"
    );
    store.close()
}

/// A memtable write shadows the flushed version of the same key.
fn shadowing() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path(), small_config())?;

    store.put(b"k", b"v1")?;
    store.flush()?;
    store.put(b"k", b"v2")?;
    ensure!(
        store.get(b"k")? == Some(b"v2".to_vec()),
        "memtable must shadow the SSTable"
    );
    store.close()
}

/// Three flushed versions compact down to the newest one in a single file.
fn compaction_newest() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path(), small_config())?;

    for value in [&b"v1"[..], b"v2", b"v3"] {
        store.put(b"k", value)?;
        store.flush()?;
    }
    store.compact()?;

    ensure!(
        store.get(b"k")? == Some(b"v3".to_vec()),
        "compaction must keep the newest version"
    );
    ensure!(
        store.level_table_count(0) == 0 && store.level_table_count(1) == 1,
        "compaction should leave exactly one L1 table"
    );
    store.close()
}

/// A delete shadows the flushed value and fully disappears once compaction
/// reaches the final level for that key.
fn tombstone_lifecycle() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path(), small_config())?;

    store.put(b"k", b"v")?;
    store.flush()?;
    store.delete(b"k")?;
    store.flush()?;
    ensure!(store.get(b"k")?.is_none(), "tombstone must hide the value");

    store.compact()?;
    ensure!(store.get(b"k")?.is_none(), "key must stay deleted after compaction");
    ensure!(
        store.table_count() == 0,
        "value and tombstone should annihilate at the final level"
    );
    store.close()
}

/// a..d flushed, b deleted in memory, scan a..c inclusive on both ends.
fn range_scan() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path(), small_config())?;

    for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
        store.put(k.as_bytes(), v.as_bytes())?;
    }
    store.flush()?;
    store.delete(b"b")?;

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = store.scan(b"a", b"c")?.collect::<Result<_>>()?;
    ensure!(
        pairs
            == vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ],
        "scan returned {:?}",
        pairs
    );
    store.close()
}

/// Absent-key lookups are answered by the filters, not the data blocks.
fn bloom_efficiency() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(
        dir.path(),
        Config {
            memtable_threshold: 16 * 1024,
            ..small_config()
        },
    )?;

    for i in 0..10_000u32 {
        store.put(format!("key{:06}", i).as_bytes(), b"val")?;
    }
    store.flush()?;
    store.compact()?;

    // Absent keys inside the stored range, so only the filters can reject.
    let probes = 1000u32;
    let mut zero_read = 0u32;
    for i in 0..probes {
        let before = store.cache_stats();
        let found = store.get(format!("key{:06}x", i).as_bytes())?;
        ensure!(found.is_none(), "absent key reported present");
        if store.cache_stats() == before {
            zero_read += 1;
        }
    }

    let fraction = f64::from(zero_read) / f64::from(probes);
    if fraction < 0.99 {
        return Err(anyhow!(
            "only {:.1}% of absent lookups avoided block reads (need 99%)",
            fraction * 100.0
        ));
    }
    store.close()
}
