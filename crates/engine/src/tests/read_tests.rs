use super::helpers::open_small;
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Shadowing across layers ---------------------

#[test]
fn memtable_shadows_flushed_value() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v1")?;
    store.flush()?;
    store.put(b"k", b"v2")?;

    assert_eq!(store.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn newer_l0_file_shadows_older() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"old")?;
    store.flush()?;
    store.put(b"k", b"new")?;
    store.flush()?;

    assert_eq!(store.level_table_count(0), 2);
    assert_eq!(store.get(b"k")?, Some(b"new".to_vec()));
    Ok(())
}

#[test]
fn l0_shadows_l1() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"l1-version")?;
    store.flush()?;
    store.compact()?; // k now lives in L1
    assert_eq!(store.level_table_count(1), 1);

    store.put(b"k", b"l0-version")?;
    store.flush()?;

    assert_eq!(store.get(b"k")?, Some(b"l0-version".to_vec()));
    Ok(())
}

#[test]
fn tombstone_in_memtable_shadows_disk() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v")?;
    store.flush()?;
    store.delete(b"k")?;

    assert_eq!(store.get(b"k")?, None);
    Ok(())
}

#[test]
fn tombstone_in_newer_file_shadows_older_file() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    store.put(b"k", b"v")?;
    store.flush()?;
    store.delete(b"k")?;
    store.flush()?;

    assert_eq!(store.get(b"k")?, None);
    Ok(())
}

// --------------------- Multi-level reads ---------------------

#[test]
fn keys_found_across_all_layers() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    // L1: an old compacted batch
    for i in 0..20u32 {
        store.put(format!("a{:03}", i).as_bytes(), b"l1")?;
    }
    store.flush()?;
    store.compact()?;

    // L0: two newer batches
    for i in 0..10u32 {
        store.put(format!("b{:03}", i).as_bytes(), b"l0-old")?;
    }
    store.flush()?;
    for i in 0..10u32 {
        store.put(format!("c{:03}", i).as_bytes(), b"l0-new")?;
    }
    store.flush()?;

    // memtable: the newest records
    store.put(b"d000", b"mem")?;

    assert_eq!(store.get(b"a005")?, Some(b"l1".to_vec()));
    assert_eq!(store.get(b"b005")?, Some(b"l0-old".to_vec()));
    assert_eq!(store.get(b"c005")?, Some(b"l0-new".to_vec()));
    assert_eq!(store.get(b"d000")?, Some(b"mem".to_vec()));
    assert_eq!(store.get(b"e000")?, None);
    Ok(())
}

// --------------------- Bloom filter efficiency ---------------------

#[test]
fn absent_lookups_rarely_touch_data_blocks() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 16 * 1024)?;

    // 10k keys across several flushed files, then compacted so lookups face
    // a settled file set.
    for i in 0..10_000u32 {
        store.put(format!("key{:06}", i).as_bytes(), b"val")?;
    }
    store.flush()?;
    store.compact()?;

    // Absent keys chosen inside the stored key range, so the range check
    // cannot reject them — only the filters can.
    let probes = 2000u32;
    let mut zero_read_calls = 0u32;
    for i in 0..probes {
        let (h0, m0) = store.cache_stats();
        assert_eq!(store.get(format!("key{:06}x", i).as_bytes())?, None);
        let (h1, m1) = store.cache_stats();
        if h1 + m1 == h0 + m0 {
            zero_read_calls += 1;
        }
    }

    // The filters must reject at least 99% of absent lookups before any I/O.
    let fraction = f64::from(zero_read_calls) / f64::from(probes);
    assert!(
        fraction >= 0.99,
        "only {:.1}% of absent lookups avoided block reads",
        fraction * 100.0
    );
    Ok(())
}

#[test]
fn present_lookups_hit_the_block_cache_on_repeat() -> Result<()> {
    let dir = tempdir()?;
    let store = open_small(dir.path(), 1 << 20)?;

    for i in 0..100u32 {
        store.put(format!("key{:04}", i).as_bytes(), b"v")?;
    }
    store.flush()?;

    store.get(b"key0042")?;
    let (_, misses_after_first) = store.cache_stats();
    store.get(b"key0042")?;
    let (hits, misses) = store.cache_stats();

    assert_eq!(misses, misses_after_first, "repeat lookup must not re-read the block");
    assert!(hits >= 1);
    Ok(())
}
