//! # Bloom Filter
//!
//! A space-efficient probabilistic set-membership test.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the
//! set (no false negatives), but may occasionally report that a key **is**
//! in the set when it isn't. The false positive rate depends on the number
//! of bits and hash functions used.
//!
//! ## Usage in DriftKV
//!
//! Every SSTable has a sibling `.filter` file built from its keys. During
//! point lookups the engine checks the filter first — if it says "not
//! present", the table is skipped entirely, avoiding the sparse-index probe
//! and the data-block read.
//!
//! ## Sibling file format
//!
//! ```text
//! [m_bits: u64 LE][k_hashes: u64 LE][bit-array bytes = ceil(m_bits / 8)]
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::path::Path;

/// A bloom filter backed by a bit vector with `k` hash functions.
///
/// Uses Kirsch–Mitzenmacher double hashing: `h(i) = h1 + i * h2`, where `h1`
/// and `h2` are FNV-1a hashes of the key with two different bases.
pub struct BloomFilter {
    /// The bit vector storing the filter state.
    bits: Vec<u8>,
    /// Number of bits in the filter.
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: u64,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at the given target
    /// `false_positive_rate`.
    ///
    /// Sizing: `m = round(-n * ln(p) / ln(2)^2)` bits (min 8) and
    /// `k = max(1, round((m / n) * ln(2)))` hashes.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in
    /// `(0, 1)`.
    #[must_use]
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).round() as u64;
        let m = m.max(8);

        let k = ((m as f64 / n) * std::f64::consts::LN_2).round() as u64;
        let k = k.max(1);

        let byte_len = m.div_ceil(8) as usize;
        Self {
            bits: vec![0u8; byte_len],
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Inserts a key into the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not**. A single unset bit proves absence.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            if (self.bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 0 {
                return false;
            }
        }
        true
    }

    /// Number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    /// Serializes the filter to a writer in the sibling-file format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.num_bits)?;
        w.write_u64::<LittleEndian>(self.num_hashes)?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a filter from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u64::<LittleEndian>()?;

        // Safety caps: a garbage header must not trigger a huge allocation,
        // and a zero-bit filter would divide by zero in `bit_index`.
        const MAX_FILTER_BYTES: u64 = 128 * 1024 * 1024;
        let byte_len = num_bits.div_ceil(8);
        if num_bits == 0 || byte_len > MAX_FILTER_BYTES || num_hashes == 0 || num_hashes > 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("implausible filter header: m={num_bits} k={num_hashes}"),
            ));
        }

        let mut bits = vec![0u8; byte_len as usize];
        r.read_exact(&mut bits)?;
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    /// Writes the filter to `path`, fsyncing before returning.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        self.write_to(&mut f)?;
        f.sync_all()?;
        Ok(())
    }

    /// Loads a filter from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut f = std::fs::File::open(path)?;
        Self::read_from(&mut f)
    }

    /// Double hashing: `h(i) = (h1 + i * h2) mod num_bits`.
    fn bit_index(&self, h1: u64, h2: u64, i: u64) -> u64 {
        h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// Two independent 64-bit hashes from FNV-1a with different bases.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    (
        fnv1a_64(key, 0xcbf2_9ce4_8422_2325),
        fnv1a_64(key, 0x517c_c1b7_2722_0a95),
    )
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
