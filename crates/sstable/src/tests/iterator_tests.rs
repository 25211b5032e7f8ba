use super::build_table;
use crate::TableIterator;
use anyhow::Result;
use memtable::EntryRef;
use tempfile::tempdir;

fn drain(iter: &mut TableIterator) -> Result<Vec<(Vec<u8>, bool)>> {
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.entry().is_tombstone()));
        iter.advance()?;
    }
    Ok(out)
}

#[test]
fn full_scan_yields_input_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");
    build_table(
        &path,
        4096,
        &[
            (b"a", Some(b"1")),
            (b"b", None),
            (b"c", Some(b"3")),
        ],
    )?;

    let mut iter = TableIterator::open(&path)?;
    assert!(iter.valid());
    assert_eq!(iter.key(), b"a");
    assert_eq!(iter.entry(), EntryRef::Value(b"1".as_slice()));

    let all = drain(&mut iter)?;
    assert_eq!(
        all,
        vec![
            (b"a".to_vec(), false),
            (b"b".to_vec(), true),
            (b"c".to_vec(), false),
        ]
    );
    assert!(!iter.valid());
    Ok(())
}

#[test]
fn round_trip_across_many_blocks() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..500u32)
        .map(|i| (format!("key{:04}", i).into_bytes(), format!("val{}", i).into_bytes()))
        .collect();
    let borrowed: Vec<(&[u8], Option<&[u8]>)> = pairs
        .iter()
        .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
        .collect();
    build_table(&path, 128, &borrowed)?;

    let mut iter = TableIterator::open(&path)?;
    let mut seen = 0usize;
    while iter.valid() {
        let expect_key = format!("key{:04}", seen);
        let expect_val = format!("val{}", seen);
        assert_eq!(iter.key(), expect_key.as_bytes());
        assert_eq!(iter.entry(), EntryRef::Value(expect_val.as_bytes()));
        seen += 1;
        iter.advance()?;
    }
    assert_eq!(seen, 500, "every written record must come back, in order");
    Ok(())
}

#[test]
fn seek_lands_on_first_key_at_or_after_start() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..100u32)
        .map(|i| (format!("key{:04}", i * 2).into_bytes(), b"v".to_vec()))
        .collect();
    let borrowed: Vec<(&[u8], Option<&[u8]>)> = pairs
        .iter()
        .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
        .collect();
    build_table(&path, 128, &borrowed)?;

    let mut iter = TableIterator::open(&path)?;

    // exact hit
    iter.seek(b"key0050")?;
    assert!(iter.valid());
    assert_eq!(iter.key(), b"key0050");

    // between stored keys: key0051 doesn't exist, lands on key0052
    iter.seek(b"key0051")?;
    assert_eq!(iter.key(), b"key0052");

    // before the table
    iter.seek(b"aaa")?;
    assert_eq!(iter.key(), b"key0000");

    // past the table
    iter.seek(b"zzz")?;
    assert!(!iter.valid());
    Ok(())
}

#[test]
fn seek_then_scan_stays_ordered() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("t.sst");

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..300u32)
        .map(|i| (format!("k{:04}", i).into_bytes(), b"v".to_vec()))
        .collect();
    let borrowed: Vec<(&[u8], Option<&[u8]>)> = pairs
        .iter()
        .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
        .collect();
    build_table(&path, 96, &borrowed)?;

    let mut iter = TableIterator::open(&path)?;
    iter.seek(b"k0123")?;

    let rest = drain(&mut iter)?;
    assert_eq!(rest.len(), 300 - 123);
    assert_eq!(rest[0].0, b"k0123");
    assert_eq!(rest.last().unwrap().0, b"k0299");
    Ok(())
}
