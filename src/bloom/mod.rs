//! Fixed-size bloom filter attached to every sorted table.
//!
//! Every table carries exactly [`BLOOM_SLOTS`] slots regardless of how
//! many keys it holds, so the filter region of a table file always has
//! the same size and the value blob always starts at a computable offset.
//! Each slot is stored as one byte (`0x00` or `0x01`).
//!
//! Slot positions come from one XXH3-128 hash of the key's little-endian
//! bytes, split into [`BLOOM_HASHES`] 32-bit words, each reduced modulo
//! the slot count.
//!
//! - If any slot is clear → the key is **definitely not** in the table.
//! - If all slots are set → the key is **probably** in the table.


use xxhash_rust::xxh3::xxh3_128;

/// Number of slots (and on-disk bytes) in every filter.
pub const BLOOM_SLOTS: usize = 10_240;

/// Number of slot positions derived per key.
pub const BLOOM_HASHES: usize = 4;

/// Probabilistic "is this key in the table?" structure.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    slots: Box<[u8; BLOOM_SLOTS]>,
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("set_slots", &self.set_slots())
            .finish()
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self {
            slots: Box::new([0u8; BLOOM_SLOTS]),
        }
    }

    /// Rebuilds a filter from its on-disk bytes.
    ///
    /// Returns `None` if `bytes` is not exactly [`BLOOM_SLOTS`] long or a
    /// slot holds anything other than `0x00` / `0x01`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BLOOM_SLOTS || bytes.iter().any(|&b| b > 1) {
            return None;
        }
        let mut slots = Box::new([0u8; BLOOM_SLOTS]);
        slots.copy_from_slice(bytes);
        Some(Self { slots })
    }

    /// Raw slot bytes, exactly as written to disk.
    pub fn as_bytes(&self) -> &[u8] {
        &self.slots[..]
    }

    /// Adds a key.
    pub fn insert(&mut self, key: u64) {
        for pos in Self::positions(key) {
            self.slots[pos] = 1;
        }
    }

    /// Returns `false` only when the key was definitely never inserted.
    pub fn may_contain(&self, key: u64) -> bool {
        Self::positions(key).into_iter().all(|pos| self.slots[pos] == 1)
    }

    /// Clears every slot.
    pub fn clear(&mut self) {
        self.slots.fill(0);
    }

    /// Number of set slots.
    pub fn set_slots(&self) -> usize {
        self.slots.iter().filter(|&&b| b == 1).count()
    }

    fn positions(key: u64) -> [usize; BLOOM_HASHES] {
        let hash = xxh3_128(&key.to_le_bytes());
        let mut out = [0usize; BLOOM_HASHES];
        for (i, pos) in out.iter_mut().enumerate() {
            let word = (hash >> (32 * i)) as u32;
            *pos = word as usize % BLOOM_SLOTS;
        }
        out
    }
}
