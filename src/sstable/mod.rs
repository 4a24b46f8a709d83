//! Sorted Table (SSTable) Module
//!
//! An SSTable is an **immutable**, **disk-resident** sorted run of
//! `u64 → bytes` entries, produced either by flushing the write buffer or by
//! a compaction rebuild. Every table in every level keeps its
//! [`TableIndex`] resident in memory; values are read lazily from disk.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER        32 B   generation | entry_count | max_key | min_key  (u64 LE each)]
//! [BLOOM     10240 B   one byte per slot, 0x00 / 0x01                            ]
//! [KEYS   8*(n+1) B    ascending u64 LE keys, trailing sentinel u64::MAX         ]
//! [OFFSETS 4*(n+1) B   absolute u32 LE file offsets, trailing end-of-values      ]
//! [VALUES              value_0 value_1 … value_{n-1}, concatenated, no framing   ]
//! ```
//!
//! No padding anywhere. The index region (header + bloom + keys + offsets)
//! therefore has a size that depends only on `n`, and `offset[0]` must
//! equal it. Value `i` spans `offset[i] .. offset[i+1]`.
//!
//! # Tombstones
//!
//! A logical delete is stored as the literal value [`TOMBSTONE`]. Readers
//! translate it to "not found"; compaction may drop it when nothing deeper
//! can hold the key.
//!
//! # Sub-modules
//!
//! - [`builder`]: [`TableBuilder`] and the file writers.
//! - [`reader`]: loading a [`TableIndex`] and reading values back.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod reader;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports
// ------------------------------------------------------------------------------------------------

pub use builder::{TableBuilder, write_table_file};
pub use reader::{load_index, read_value, read_value_blob};

#[cfg(test)]
pub use builder::write_table;
#[cfg(test)]
pub use reader::read_table;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;

use crate::bloom::{BLOOM_SLOTS, BloomFilter};
use crate::encoding::{self, Decode, Encode, EncodingError};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of the fixed table header.
pub const HEADER_SIZE: usize = 32;

/// Size of the on-disk bloom region.
pub const BLOOM_SIZE: usize = BLOOM_SLOTS;

/// Bytes per key slot plus bytes per offset slot.
pub(crate) const INDEX_SLOT_SIZE: usize = size_of::<u64>() + size_of::<u32>();

/// Reserved value marking a logical delete.
pub const TOMBSTONE: &[u8] = b"~DELETE~";

/// Value written into the trailing key slot.
pub const KEY_SENTINEL: u64 = u64::MAX;

/// Size of the index region of a table holding `entry_count` entries.
pub const fn index_region_size(entry_count: usize) -> usize {
    HEADER_SIZE + BLOOM_SIZE + INDEX_SLOT_SIZE * (entry_count + 1)
}

/// Returns `true` if `value` is the tombstone marker.
#[inline]
pub fn is_tombstone(value: &[u8]) -> bool {
    value == TOMBSTONE
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file contents violate the table format.
    #[error("Corrupt table: {0}")]
    Corrupt(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Fixed 32-byte table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableHeader {
    /// Flush generation this table was stamped with.
    pub generation: u64,

    /// Number of entries indexed.
    pub entry_count: u64,

    /// Largest key in the table.
    pub max_key: u64,

    /// Smallest key in the table.
    pub min_key: u64,
}

impl Encode for TableHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.generation.encode_to(buf)?;
        self.entry_count.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (generation, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (entry_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                generation,
                entry_count,
                max_key,
                min_key,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// ValueHandle
// ------------------------------------------------------------------------------------------------

/// Location of one value inside a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueHandle {
    /// Absolute file offset of the first value byte.
    pub offset: u32,

    /// Value length in bytes.
    pub length: u32,
}

// ------------------------------------------------------------------------------------------------
// TableIndex
// ------------------------------------------------------------------------------------------------

/// In-memory index of one table: header, bloom filter, keys and offsets.
///
/// `keys` holds exactly `entry_count` keys (the on-disk sentinel slot is not
/// kept); `offsets` holds `entry_count + 1` absolute offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIndex {
    header: TableHeader,
    bloom: BloomFilter,
    keys: Vec<u64>,
    offsets: Vec<u32>,
    file_id: u64,
}

impl TableIndex {
    /// Assembles an index from already-validated parts.
    pub(crate) fn from_parts(
        header: TableHeader,
        bloom: BloomFilter,
        keys: Vec<u64>,
        offsets: Vec<u32>,
        file_id: u64,
    ) -> Self {
        Self {
            header,
            bloom,
            keys,
            offsets,
            file_id,
        }
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn generation(&self) -> u64 {
        self.header.generation
    }

    pub fn min_key(&self) -> u64 {
        self.header.min_key
    }

    pub fn max_key(&self) -> u64 {
        self.header.max_key
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The real keys, ascending, without the sentinel slot.
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    /// Sequence number of the file within its level directory.
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub(crate) fn set_file_id(&mut self, file_id: u64) {
        self.file_id = file_id;
    }

    /// Whether `key` lies within `[min_key, max_key]`.
    #[inline]
    pub fn covers(&self, key: u64) -> bool {
        self.header.min_key <= key && key <= self.header.max_key
    }

    /// Whether this table's key range intersects `[min, max]`.
    #[inline]
    pub fn overlaps(&self, min: u64, max: u64) -> bool {
        !(self.header.max_key < min || self.header.min_key > max)
    }

    /// Binary search for `key`, returning its entry position.
    pub fn find(&self, key: u64) -> Option<usize> {
        self.keys.binary_search(&key).ok()
    }

    /// Range check, bloom pre-check, then binary search.
    pub fn locate(&self, key: u64) -> Option<ValueHandle> {
        if !self.covers(key) || !self.bloom.may_contain(key) {
            return None;
        }
        self.find(key).map(|i| self.handle(i))
    }

    /// Whether the table holds `key` (exact, not probabilistic).
    pub fn contains(&self, key: u64) -> bool {
        self.locate(key).is_some()
    }

    /// File location of entry `i`.
    ///
    /// `i` must be `< len()`.
    pub fn handle(&self, i: usize) -> ValueHandle {
        let offset = self.offsets[i];
        ValueHandle {
            offset,
            length: self.offsets[i + 1] - offset,
        }
    }

    /// Absolute offset of the first value byte.
    pub fn values_start(&self) -> u32 {
        self.offsets.first().copied().unwrap_or(0)
    }

    /// Absolute offset one past the last value byte; equals the file size.
    pub fn values_end(&self) -> u32 {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Total size of the value blob.
    pub fn blob_len(&self) -> usize {
        (self.values_end() - self.values_start()) as usize
    }

    /// Size of the whole table file.
    pub fn file_len(&self) -> u64 {
        u64::from(self.values_end())
    }

    /// Serializes the index region (header, bloom, keys + sentinel, offsets).
    pub fn encode_region(&self) -> Result<Vec<u8>, SSTableError> {
        let mut buf = Vec::with_capacity(index_region_size(self.keys.len()));
        self.header.encode_to(&mut buf)?;
        buf.extend_from_slice(self.bloom.as_bytes());
        encoding::encode_slice(&self.keys, &mut buf)?;
        KEY_SENTINEL.encode_to(&mut buf)?;
        encoding::encode_slice(&self.offsets, &mut buf)?;
        Ok(buf)
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable
// ------------------------------------------------------------------------------------------------

/// A complete table held in memory: its index and the value blob.
///
/// Produced by [`TableBuilder::finish`]; consumed by the file writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTable {
    index: TableIndex,
    values: Vec<u8>,
}

impl SSTable {
    /// Pairs an index with its blob; the blob length must match the offsets.
    pub fn new(index: TableIndex, values: Vec<u8>) -> Result<Self, SSTableError> {
        if values.len() != index.blob_len() {
            return Err(SSTableError::Corrupt(format!(
                "value blob is {} bytes, index expects {}",
                values.len(),
                index.blob_len()
            )));
        }
        Ok(Self { index, values })
    }

    pub fn index(&self) -> &TableIndex {
        &self.index
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn generation(&self) -> u64 {
        self.index.generation()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn into_index(self) -> TableIndex {
        self.index
    }

    /// Value of entry `i`.
    pub fn value_at(&self, i: usize) -> &[u8] {
        let base = self.index.values_start();
        let h = self.index.handle(i);
        let start = (h.offset - base) as usize;
        &self.values[start..start + h.length as usize]
    }

    /// Point lookup inside the in-memory blob.
    pub fn get(&self, key: u64) -> Option<&[u8]> {
        self.index.find(key).map(|i| self.value_at(i))
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        self.index
            .keys()
            .iter()
            .enumerate()
            .map(move |(i, &k)| (k, self.value_at(i)))
    }
}
