//! # Manifest - Durable File-Set Metadata
//!
//! Records which SSTable files exist, which level each belongs to, and each
//! file's key range, so the engine can reconstruct its level vector after a
//! restart. Any file in the data directory that the manifest does not
//! reference is garbage from an interrupted flush or compaction and is swept
//! on open.
//!
//! ## File format
//!
//! All integers little-endian:
//!
//! ```text
//! [magic: u64 "DRIFTMAN"][next_table_seq: u64]
//! then zero or more records:
//! [level: u32][name_len: u32][filename]
//! [first_len: u32][first_key][last_len: u32][last_key][file_size: u64]
//! ```
//!
//! `next_table_seq` is a persisted monotone counter used to name new table
//! files. Filenames derived from it sort in creation order even when two
//! flushes land inside the filesystem's timestamp resolution.
//!
//! ## Crash safety
//!
//! The manifest is rewritten atomically: write `manifest.tmp` in full,
//! fsync, then rename over `manifest`. Loading accepts a truncated tail
//! only at a record boundary; a short read mid-record means the manifest
//! was damaged some other way and aborts the open.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the manifest file within the data directory.
pub const MANIFEST_FILENAME: &str = "manifest";
/// Temporary file used during atomic manifest writes.
pub const MANIFEST_TMP_FILENAME: &str = "manifest.tmp";

const MANIFEST_MAGIC: u64 = u64::from_le_bytes(*b"DRIFTMAN");

/// Sanity cap on manifest key fields (matches the engine's key limit).
const MAX_FIELD_BYTES: u32 = 64 * 1024;

/// Metadata for one SSTable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub level: u32,
    /// Basename of the `.sst` file (the sibling filter shares the stem).
    pub filename: String,
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub file_size: u64,
}

/// In-memory copy of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    tmp_path: PathBuf,
    /// Next table number to hand out; persisted so restarts never reuse one.
    next_table_seq: u64,
    /// All table entries. Level-0 entries appear newest first; higher levels
    /// are ordered by first key, mirroring the engine's level vector.
    pub entries: Vec<TableMeta>,
}

impl Manifest {
    /// Loads the manifest from `dir`, or creates an empty one if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// A manifest that exists but is undecodable mid-record aborts the open
    /// — the file set cannot be trusted.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        let tmp_path = dir.join(MANIFEST_TMP_FILENAME);

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    tmp_path,
                    next_table_seq: 1,
                    entries: Vec::new(),
                });
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open manifest at {}", path.display()))
            }
        };
        let mut rdr = BufReader::new(file);

        let magic = rdr
            .read_u64::<LittleEndian>()
            .context("corrupt manifest: missing header")?;
        if magic != MANIFEST_MAGIC {
            bail!("corrupt manifest: bad magic {:#018x}", magic);
        }
        let next_table_seq = rdr
            .read_u64::<LittleEndian>()
            .context("corrupt manifest: missing table counter")?;

        let mut entries = Vec::new();
        loop {
            // The level field doubles as the record boundary: clean EOF here
            // is a tolerable truncated tail, anywhere later is corruption.
            let level = match rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e).context("failed to read manifest record"),
            };

            let read = |rdr: &mut BufReader<File>| -> Result<Vec<u8>> {
                let len = rdr.read_u32::<LittleEndian>().context("corrupt manifest: short record")?;
                if len == 0 || len > MAX_FIELD_BYTES {
                    bail!("corrupt manifest: implausible field length {}", len);
                }
                let mut buf = vec![0u8; len as usize];
                rdr.read_exact(&mut buf).context("corrupt manifest: short record")?;
                Ok(buf)
            };

            let filename = String::from_utf8(read(&mut rdr)?)
                .context("corrupt manifest: filename is not utf-8")?;
            let first_key = read(&mut rdr)?;
            let last_key = read(&mut rdr)?;
            let file_size = rdr
                .read_u64::<LittleEndian>()
                .context("corrupt manifest: short record")?;

            entries.push(TableMeta {
                level,
                filename,
                first_key,
                last_key,
                file_size,
            });
        }

        Ok(Self {
            path,
            tmp_path,
            next_table_seq,
            entries,
        })
    }

    /// Persists the manifest atomically: full write to `manifest.tmp`,
    /// fsync, rename over `manifest`.
    pub fn save(&self) -> Result<()> {
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.tmp_path)
                .with_context(|| {
                    format!("failed to create manifest tmp at {}", self.tmp_path.display())
                })?;

            f.write_u64::<LittleEndian>(MANIFEST_MAGIC)?;
            f.write_u64::<LittleEndian>(self.next_table_seq)?;
            for meta in &self.entries {
                f.write_u32::<LittleEndian>(meta.level)?;
                f.write_u32::<LittleEndian>(meta.filename.len() as u32)?;
                f.write_all(meta.filename.as_bytes())?;
                f.write_u32::<LittleEndian>(meta.first_key.len() as u32)?;
                f.write_all(&meta.first_key)?;
                f.write_u32::<LittleEndian>(meta.last_key.len() as u32)?;
                f.write_all(&meta.last_key)?;
                f.write_u64::<LittleEndian>(meta.file_size)?;
            }
            f.flush()?;
            f.sync_all()?;
        }

        fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("failed to publish manifest at {}", self.path.display()))?;
        Ok(())
    }

    /// Hands out the next table number.
    ///
    /// Seeded from the wall clock but clamped monotone, so concurrent-epoch
    /// flushes and clock steps cannot produce a filename that sorts before
    /// an existing one. Persisted by the next `save`.
    pub fn allocate_table_seq(&mut self) -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seq = nanos.max(self.next_table_seq);
        self.next_table_seq = seq + 1;
        seq
    }

    /// `true` if `filename` is referenced by any entry.
    #[must_use]
    pub fn references(&self, filename: &str) -> bool {
        self.entries.iter().any(|e| e.filename == filename)
    }
}

/// Formats a table number as its `.sst` basename. Zero-padded so that
/// lexicographic filename order equals numeric creation order.
#[must_use]
pub fn table_filename(seq: u64) -> String {
    format!("{seq:020}.sst")
}

/// The sibling filter basename for a table file.
#[must_use]
pub fn filter_filename(table: &str) -> String {
    match table.strip_suffix(".sst") {
        Some(stem) => format!("{stem}.filter"),
        None => format!("{table}.filter"),
    }
}
