use super::helpers::open_small;
use crate::{Config, Store};
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Basic mutations ---------------------

#[test]
fn put_then_get() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"name", b"Alice")?;
    assert_eq!(store.get(b"name")?, Some(b"Alice".to_vec()));
    assert_eq!(store.get(b"missing")?, None);
    Ok(())
}

#[test]
fn overwrite_returns_latest() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v1")?;
    store.put(b"k", b"v2")?;
    assert_eq!(store.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn delete_hides_key() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v")?;
    store.delete(b"k")?;
    assert_eq!(store.get(b"k")?, None);

    // delete of an absent key is a quiet no-op for the caller
    store.delete(b"never-existed")?;
    assert_eq!(store.get(b"never-existed")?, None);
    Ok(())
}

#[test]
fn empty_value_is_a_live_record() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"")?;
    assert_eq!(store.get(b"k")?, Some(Vec::new()));

    // and it stays distinct from a tombstone across a flush
    store.flush()?;
    assert_eq!(store.get(b"k")?, Some(Vec::new()));
    Ok(())
}

// --------------------- Argument validation ---------------------

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    assert!(store.put(b"", b"v").is_err());
    assert!(store.delete(b"").is_err());
    assert!(store.get(b"").is_err());
    Ok(())
}

#[test]
fn oversized_key_and_value_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    let big_key = vec![b'k'; crate::MAX_KEY_SIZE + 1];
    assert!(store.put(&big_key, b"v").is_err());

    let big_value = vec![b'v'; crate::MAX_VALUE_SIZE + 1];
    assert!(store.put(b"k", &big_value).is_err());
    Ok(())
}

// --------------------- Flush behaviour ---------------------

#[test]
fn crossing_threshold_flushes_to_l0() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 256)?;

    for i in 0..50u32 {
        store.put(format!("key{:04}", i).as_bytes(), &[b'v'; 32])?;
    }

    assert!(store.level_table_count(0) > 0, "flushes should land in L0");
    // every key still readable across memtable and tables
    for i in 0..50u32 {
        assert!(store.get(format!("key{:04}", i).as_bytes())?.is_some());
    }
    Ok(())
}

#[test]
fn flush_of_empty_memtable_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.flush()?;
    assert_eq!(store.table_count(), 0);

    store.put(b"k", b"v")?;
    store.flush()?;
    assert_eq!(store.table_count(), 1);

    // nothing buffered anymore, so a second flush adds nothing
    store.flush()?;
    assert_eq!(store.table_count(), 1);
    Ok(())
}

#[test]
fn flush_truncates_the_wal() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v")?;
    let wal_path = dir.path().join(crate::WAL_FILENAME);
    assert!(std::fs::metadata(&wal_path)?.len() > 0);

    store.flush()?;
    assert_eq!(std::fs::metadata(&wal_path)?.len(), 0);
    Ok(())
}

#[test]
fn read_your_writes_after_flush() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v1")?;
    store.flush()?;
    store.put(b"k", b"v2")?;

    // memtable shadows the flushed table
    assert_eq!(store.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn flush_publishes_filter_siblings() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v")?;
    store.flush()?;

    assert_eq!(super::helpers::count_files(dir.path(), "sst"), 1);
    assert_eq!(super::helpers::count_files(dir.path(), "filter"), 1);
    Ok(())
}

#[test]
fn writes_interleaved_with_reads_from_another_thread() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(dir.path(), Config::small(512))?;

    std::thread::scope(|scope| -> Result<()> {
        let reader = scope.spawn(|| {
            // Hammer reads while the writer below flushes and compacts.
            for _ in 0..2000 {
                let _ = store.get(b"key0001");
            }
        });

        for i in 0..200u32 {
            store.put(format!("key{:04}", i).as_bytes(), &[b'v'; 16])?;
        }
        reader.join().expect("reader thread panicked");
        Ok(())
    })?;

    for i in 0..200u32 {
        assert!(store.get(format!("key{:04}", i).as_bytes())?.is_some());
    }
    Ok(())
}
