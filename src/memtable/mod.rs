//! # Memtable Module
//!
//! The ordered, in-memory **write buffer** of the store.
//!
//! Every `put` lands here first. The buffer keeps its entries sorted by key
//! in a [`BTreeMap`], tracks the byte size the buffer would occupy once
//! serialized as a table, and maintains its own bloom filter so negative
//! lookups skip the map entirely.
//!
//! ## Capacity contract
//!
//! [`Memtable::add_entry`] never grows the buffer past the configured
//! [`BufferLimits`]. Instead of inserting, it returns `false`; the caller
//! then turns the current content into a table ([`Memtable::to_table`]),
//! clears the buffer and retries. Compaction rebuilds tables through the
//! exact same contract, so flushed and rebuilt tables obey one size rule.
//!
//! The projected size of a buffer holding `n` entries whose values total
//! `v` bytes is `32 + 10240 + 12 * (n + 1) + v`.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use crate::bloom::BloomFilter;
use crate::sstable::{SSTable, SSTableError, TableBuilder, index_region_size};

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Size limits shared by the write buffer and compaction rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    /// Maximum serialized table size in bytes.
    pub table_size_limit: usize,

    /// Optional cap on entries per table.
    pub max_entries: Option<usize>,
}

impl BufferLimits {
    /// Whether a single value of `value_len` bytes fits into an empty buffer.
    pub fn admits(&self, value_len: usize) -> bool {
        index_region_size(1)
            .checked_add(value_len)
            .is_some_and(|size| size <= self.table_size_limit)
            && self.max_entries != Some(0)
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// Ordered in-memory write buffer.
#[derive(Debug)]
pub struct Memtable {
    /// Ordered key-value mapping, at most one value per key.
    entries: BTreeMap<u64, Vec<u8>>,

    /// Membership filter over every key in `entries`.
    bloom: BloomFilter,

    /// Sum of all value lengths.
    value_bytes: usize,

    limits: BufferLimits,
}

impl Memtable {
    /// Creates an empty buffer bounded by `limits`.
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            entries: BTreeMap::new(),
            bloom: BloomFilter::new(),
            value_bytes: 0,
            limits,
        }
    }

    /// Inserts or overwrites `key`.
    ///
    /// Returns `false`, leaving the buffer untouched, when the insert would
    /// push the projected table size past `table_size_limit` or, for a new
    /// key, the entry count past `max_entries`.
    pub fn add_entry(&mut self, key: u64, value: &[u8]) -> bool {
        let previous = self.entries.get(&key).map(Vec::len);

        let count = self.entries.len() + usize::from(previous.is_none());
        if previous.is_none() && self.limits.max_entries.is_some_and(|max| count > max) {
            return false;
        }

        let value_bytes = self.value_bytes - previous.unwrap_or(0) + value.len();
        let projected = index_region_size(count).saturating_add(value_bytes);
        if projected > self.limits.table_size_limit {
            return false;
        }

        self.entries.insert(key, value.to_vec());
        self.bloom.insert(key);
        self.value_bytes = value_bytes;
        true
    }

    /// Looks up `key`, consulting the bloom filter first.
    pub fn search(&self, key: u64) -> Option<&[u8]> {
        if !self.bloom.may_contain(key) {
            return None;
        }
        self.entries.get(&key).map(Vec::as_slice)
    }

    /// Drops every entry and clears the bloom filter.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.bloom.clear();
        self.value_bytes = 0;
    }

    /// Entries in ascending key order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        self.entries.iter().map(|(&k, v)| (k, v.as_slice()))
    }

    pub fn min_key(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    pub fn max_key(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the table this buffer would serialize to.
    pub fn serialized_size(&self) -> usize {
        index_region_size(self.entries.len()) + self.value_bytes
    }

    /// Serializes the buffer into a table stamped with `generation`.
    ///
    /// The buffer itself is left unchanged.
    pub fn to_table(&self, generation: u64) -> Result<SSTable, SSTableError> {
        let mut builder = TableBuilder::new(generation);
        for (key, value) in self.entries() {
            builder.add(key, value)?;
        }
        builder.finish()
    }
}
