use super::build_table;
use crate::{TableBuilder, FOOTER_BYTES};
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use memtable::EntryRef;
use std::io::{Seek, SeekFrom};
use tempfile::tempdir;

#[test]
fn summary_reports_endpoints_and_counts() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let summary = build_table(
        &path,
        4096,
        &[
            (b"apple", Some(b"red")),
            (b"banana", Some(b"yellow")),
            (b"cherry", None),
        ],
    )?;

    assert_eq!(summary.first_key, b"apple");
    assert_eq!(summary.last_key, b"cherry");
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.file_size, std::fs::metadata(&path)?.len());
    Ok(())
}

#[test]
fn footer_points_inside_the_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(&path, 4096, &[(b"a", Some(b"1")), (b"b", Some(b"2"))])?;

    let mut f = std::fs::File::open(&path)?;
    let size = f.metadata()?.len();
    f.seek(SeekFrom::Start(size - FOOTER_BYTES))?;
    let index_offset = f.read_u64::<LittleEndian>()?;
    assert!(index_offset > 0 && index_offset < size - FOOTER_BYTES);
    Ok(())
}

#[test]
fn small_block_target_produces_multiple_blocks() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    // 64-byte target with ~25-byte records: every couple of adds closes a
    // block, so the index must carry more than one entry.
    let mut builder = TableBuilder::new(&path, 64)?;
    for i in 0..20u32 {
        let key = format!("key{:04}", i);
        builder.add(key.as_bytes(), EntryRef::Value(b"some value"))?;
    }
    builder.finish()?;

    let table = crate::Table::open(&path, None)?;
    let cache = cache::BlockCache::new(1 << 20);
    for i in 0..20u32 {
        let key = format!("key{:04}", i);
        assert!(
            table.get(key.as_bytes(), &cache)?.is_some(),
            "{} should be found across block boundaries",
            key
        );
    }
    Ok(())
}

#[test]
fn unsorted_add_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::new(dir.path().join("t.sst"), 4096)?;
    builder.add(b"m", EntryRef::Value(b"v"))?;

    assert!(builder.add(b"a", EntryRef::Value(b"v")).is_err());
    // equal keys are also not "strictly ascending"
    assert!(builder.add(b"m", EntryRef::Value(b"v")).is_err());
    Ok(())
}

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut builder = TableBuilder::new(dir.path().join("t.sst"), 4096)?;
    assert!(builder.add(b"", EntryRef::Value(b"v")).is_err());
    Ok(())
}

#[test]
fn finishing_an_empty_table_fails() -> Result<()> {
    let dir = tempdir()?;
    let builder = TableBuilder::new(dir.path().join("t.sst"), 4096)?;
    assert!(builder.finish().is_err());
    Ok(())
}

#[test]
fn abandon_removes_the_partial_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let mut builder = TableBuilder::new(&path, 4096)?;
    builder.add(b"a", EntryRef::Value(b"v"))?;
    assert!(path.exists());

    builder.abandon()?;
    assert!(!path.exists());
    Ok(())
}
