use super::build_table;
use crate::Table;
use anyhow::Result;
use bloom::BloomFilter;
use cache::BlockCache;
use memtable::Entry;
use tempfile::tempdir;

fn sample_pairs() -> Vec<(&'static [u8], Option<&'static [u8]>)> {
    vec![
        (b"apple", Some(b"red")),
        (b"banana", Some(b"yellow")),
        (b"cherry", Some(b"")),
        (b"damson", None),
        (b"elder", Some(b"berry")),
    ]
}

#[test]
fn hits_and_misses() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &sample_pairs())?;

    let table = Table::open(&path, None)?;
    let cache = BlockCache::new(1 << 20);

    assert_eq!(table.get(b"apple", &cache)?, Some(Entry::Value(b"red".to_vec())));
    assert_eq!(table.get(b"elder", &cache)?, Some(Entry::Value(b"berry".to_vec())));

    // before the first key, between keys, after the last key
    assert_eq!(table.get(b"aardvark", &cache)?, None);
    assert_eq!(table.get(b"coconut", &cache)?, None);
    assert_eq!(table.get(b"zucchini", &cache)?, None);
    Ok(())
}

#[test]
fn tombstone_and_empty_value_are_distinct() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &sample_pairs())?;

    let table = Table::open(&path, None)?;
    let cache = BlockCache::new(1 << 20);

    assert_eq!(table.get(b"damson", &cache)?, Some(Entry::Tombstone));
    assert_eq!(table.get(b"cherry", &cache)?, Some(Entry::Value(Vec::new())));
    Ok(())
}

#[test]
fn endpoints_and_overlap_are_inclusive() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &sample_pairs())?;

    let table = Table::open(&path, None)?;
    assert_eq!(table.first_key(), b"apple");
    assert_eq!(table.last_key(), b"elder");

    assert!(table.range_contains(b"apple"));
    assert!(table.range_contains(b"elder"));
    assert!(!table.range_contains(b"zzz"));

    // a boundary key alone is enough to overlap
    assert!(table.overlaps(b"elder", b"zzz"));
    assert!(table.overlaps(b"a", b"apple"));
    assert!(!table.overlaps(b"f", b"zzz"));
    assert!(!table.overlaps(b"a", b"appl"));
    Ok(())
}

#[test]
fn last_key_spans_multiple_blocks() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..200u32)
        .map(|i| (format!("key{:04}", i).into_bytes(), vec![b'v'; 30]))
        .collect();
    let borrowed: Vec<(&[u8], Option<&[u8]>)> = pairs
        .iter()
        .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
        .collect();
    build_table(&path, 256, &borrowed)?;

    let table = Table::open(&path, None)?;
    assert_eq!(table.first_key(), b"key0000");
    assert_eq!(table.last_key(), b"key0199");
    Ok(())
}

#[test]
fn filter_short_circuits_absent_lookups() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &sample_pairs())?;

    let mut filter = BloomFilter::new(5, 0.01);
    for (key, _) in sample_pairs() {
        filter.insert(key);
    }

    let table = Table::open(&path, Some(filter))?;
    let cache = BlockCache::new(1 << 20);

    assert_eq!(table.get(b"not-there", &cache)?, None);
    // The filter answered; the cache was never probed, let alone the disk.
    assert_eq!(cache.stats(), (0, 0));

    // Present keys still read through.
    assert!(table.get(b"banana", &cache)?.is_some());
    Ok(())
}

#[test]
fn second_lookup_in_same_block_is_a_cache_hit() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &sample_pairs())?;

    let table = Table::open(&path, None)?;
    let cache = BlockCache::new(1 << 20);

    table.get(b"apple", &cache)?;
    table.get(b"banana", &cache)?;

    let (hits, misses) = cache.stats();
    assert_eq!(misses, 1, "only the first lookup should touch the disk");
    assert_eq!(hits, 1);
    Ok(())
}

#[test]
fn corrupt_block_is_detected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    // Tiny block target: each record lands in its own block, so damaging the
    // first block leaves the last block (read during open) intact.
    build_table(&path, 16, &sample_pairs())?;

    // Flip one byte inside the first data block's payload (frame header is
    // 8 bytes of length, so offset 12 is record bytes).
    let mut bytes = std::fs::read(&path)?;
    bytes[12] ^= 0xff;
    std::fs::write(&path, &bytes)?;

    let table = Table::open(&path, None)?;
    let cache = BlockCache::new(1 << 20);
    let err = table.get(b"apple", &cache).unwrap_err();
    assert!(err.to_string().contains("reading block"), "unexpected error: {err:#}");
    Ok(())
}

#[test]
fn truncated_footer_fails_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &sample_pairs())?;

    let bytes = std::fs::read(&path)?;
    std::fs::write(&path, &bytes[..3])?;

    assert!(Table::open(&path, None).is_err());
    Ok(())
}

#[test]
fn estimated_entries_tracks_filter_sizing() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..1000u32)
        .map(|i| (format!("key{:06}", i).into_bytes(), b"v".to_vec()))
        .collect();
    let borrowed: Vec<(&[u8], Option<&[u8]>)> = pairs
        .iter()
        .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
        .collect();
    build_table(&path, 4096, &borrowed)?;

    let mut filter = BloomFilter::new(1000, 0.01);
    for (k, _) in &borrowed {
        filter.insert(k);
    }
    let table = Table::open(&path, Some(filter))?;

    // Inverting the bit-count formula with the same target rate recovers
    // the capacity the filter was built for.
    assert_eq!(table.estimated_entries(0.01), 1000);
    Ok(())
}
