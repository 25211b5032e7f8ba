//! # WAL — Write-Ahead Log
//!
//! Provides crash-safe durability for the DriftKV storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the WAL **before** the corresponding memtable update. On
//! restart the WAL is replayed to reconstruct the memtable, guaranteeing that
//! no acknowledged write is lost.
//!
//! ## Binary Record Format
//!
//! ```text
//! [key_len: u32 LE][value_len: u32 LE][key bytes][value bytes]
//! ```
//!
//! A `value_len` equal to `u32::MAX` marks a tombstone and is followed by no
//! value bytes. This keeps an empty-value put (`value_len == 0`)
//! distinguishable from a delete during replay.
//!
//! ## Crash behaviour
//!
//! Appends are fsynced before returning, so a record is durable once
//! `append` succeeds. A crash mid-append leaves a partial record at the
//! tail; [`recover`] applies every complete record, logs a warning, and
//! truncates the file back to the last record boundary so later appends
//! start from a clean state.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{recover, Wal, WalRecord};
//!
//! let mut w = Wal::open("wal.log", true).unwrap();
//! w.append(&WalRecord::Put {
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }).unwrap();
//! drop(w);
//!
//! recover("wal.log", |rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Reserved `value_len` marking a tombstone record.
pub const TOMBSTONE_LEN: u32 = u32::MAX;

/// Largest key the reader will allocate for (64 KiB).
const MAX_KEY_BYTES: u32 = 64 * 1024;
/// Largest value the reader will allocate for (10 MiB).
const MAX_VALUE_BYTES: u32 = 10 * 1024 * 1024;

/// A single WAL record representing either a key-value insertion or a
/// deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion. An empty value is legal and is not a delete.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// A key deletion (tombstone).
    Delete { key: Vec<u8> },
}

impl WalRecord {
    /// The record's key, for either variant.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Put { key, .. } | WalRecord::Delete { key } => key,
        }
    }
}

/// Errors that can occur during WAL operations.
///
/// Framing damage at the tail is *not* an error — [`recover`] repairs it.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Append-only WAL writer.
///
/// Records are serialized into a reusable scratch buffer and written with a
/// single `write_all` call. When `sync` is `true`, every append is followed
/// by `sync_all()` (fsync) so the record is durable before the call returns.
pub struct Wal {
    file: File,
    path: PathBuf,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl Wal {
    /// Opens (or creates) a WAL file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `sync` - if true, every `append` call is followed by `fsync`.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the WAL file.
    ///
    /// The write is a single frame: `[key_len][value_len][key][value]`.
    /// Returns only after the bytes have been handed to the kernel and, when
    /// `sync` is on, pushed to storage. A failure here must be treated as
    /// fatal for the write by the engine — the memtable must not be updated.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        self.buf.clear();
        match record {
            WalRecord::Put { key, value } => {
                self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                self.buf.write_u32::<LittleEndian>(value.len() as u32)?;
                self.buf.extend_from_slice(key);
                self.buf.extend_from_slice(value);
            }
            WalRecord::Delete { key } => {
                self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                self.buf.write_u32::<LittleEndian>(TOMBSTONE_LEN)?;
                self.buf.extend_from_slice(key);
            }
        }

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Forces all buffered data to disk via `sync_all()`.
    ///
    /// Useful when `sync` is `false` (batched mode) and the caller wants
    /// durability at a specific point.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Deletes the current log and opens a fresh empty one at the same path.
    ///
    /// Called only after the flush that drained this log's memtable has been
    /// published — the records being discarded are all durable in an SSTable
    /// by then.
    pub fn rotate(&mut self) -> Result<(), WalError> {
        std::fs::remove_file(&self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of a [`recover`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Complete records applied.
    pub records: usize,
    /// Bytes discarded from a corrupt tail, if any.
    pub truncated_bytes: u64,
}

/// Replays every complete record in the WAL at `path`, calling `apply` for
/// each one in append order.
///
/// # Termination
///
/// - Missing file -> `Ok` with zero records (fresh start).
/// - Clean EOF at a record boundary -> `Ok`.
/// - Short read mid-record, or an absurd length field -> the tail is a
///   partial record from a crash; a warning is logged, the file is truncated
///   back to the last record boundary, and replay returns `Ok`.
/// - Any other I/O error -> `Err(WalError::Io)`.
pub fn recover<P, F>(path: P, mut apply: F) -> Result<RecoveryStats, WalError>
where
    P: AsRef<Path>,
    F: FnMut(WalRecord),
{
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RecoveryStats::default()),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut rdr = BufReader::new(file);

    let mut stats = RecoveryStats::default();
    let mut good_offset: u64 = 0;

    loop {
        match read_record(&mut rdr)? {
            ReadOutcome::Record { record, frame_len } => {
                good_offset += frame_len;
                stats.records += 1;
                apply(record);
            }
            ReadOutcome::CleanEof => break,
            ReadOutcome::CorruptTail => {
                let discarded = file_len - good_offset;
                warn!(
                    path = %path.display(),
                    discarded_bytes = discarded,
                    "corrupt WAL tail, truncating to last record boundary"
                );
                let f = OpenOptions::new().write(true).open(path)?;
                f.set_len(good_offset)?;
                f.sync_all()?;
                stats.truncated_bytes = discarded;
                break;
            }
        }
    }

    Ok(stats)
}

enum ReadOutcome {
    Record { record: WalRecord, frame_len: u64 },
    CleanEof,
    CorruptTail,
}

/// Decodes one frame. Distinguishes "no more bytes" (clean end-of-log) from
/// "some bytes but not a whole record" (crash tail).
fn read_record<R: Read>(rdr: &mut R) -> Result<ReadOutcome, WalError> {
    let mut header = [0u8; 8];
    match read_full(rdr, &mut header)? {
        0 => return Ok(ReadOutcome::CleanEof),
        8 => {}
        _ => return Ok(ReadOutcome::CorruptTail),
    }

    let key_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let value_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    // An unwritable length field means the header itself is garbage from a
    // torn write; treat it the same as a short tail.
    if key_len == 0 || key_len > MAX_KEY_BYTES {
        return Ok(ReadOutcome::CorruptTail);
    }
    if value_len != TOMBSTONE_LEN && value_len > MAX_VALUE_BYTES {
        return Ok(ReadOutcome::CorruptTail);
    }

    let mut key = vec![0u8; key_len as usize];
    if read_full(rdr, &mut key)? != key.len() {
        return Ok(ReadOutcome::CorruptTail);
    }

    if value_len == TOMBSTONE_LEN {
        return Ok(ReadOutcome::Record {
            record: WalRecord::Delete { key },
            frame_len: 8 + key_len as u64,
        });
    }

    let mut value = vec![0u8; value_len as usize];
    if read_full(rdr, &mut value)? != value.len() {
        return Ok(ReadOutcome::CorruptTail);
    }

    Ok(ReadOutcome::Record {
        record: WalRecord::Put { key, value },
        frame_len: 8 + key_len as u64 + value_len as u64,
    })
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(rdr: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match rdr.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
