//! SSTable construction and file writing.
//!
//! [`TableBuilder`] accepts entries in **strictly ascending** key order and
//! produces an in-memory [`SSTable`]: header, bloom filter, key array,
//! absolute offset array and the owned value blob. Offsets are absolute
//! file offsets, so they can only be computed once the entry count (and
//! therefore the index region size) is known; the builder records relative
//! value boundaries while adding and rebases them in [`TableBuilder::finish`].
//!
//! # Writing
//!
//! - [`write_table_file`] writes the bytes to exactly the given path and
//!   syncs. Used when the caller manages its own staging names.
//! - `write_table` (test builds only) writes to `path.tmp`, syncs, then
//!   renames onto `path`.

use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::Path,
};

use tracing::trace;

use crate::bloom::BloomFilter;
use crate::encoding::len_to_u32;

use super::{SSTable, SSTableError, TableHeader, TableIndex, index_region_size};

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Accumulates sorted entries into an [`SSTable`].
///
/// # Example
///
/// ```rust,ignore
/// let mut b = TableBuilder::new(generation);
/// b.add(1, b"a")?;
/// b.add(7, b"b")?;
/// let table = b.finish()?;
/// ```
#[derive(Debug)]
pub struct TableBuilder {
    generation: u64,
    bloom: BloomFilter,
    keys: Vec<u64>,
    /// Relative end of each value inside `values`.
    ends: Vec<usize>,
    values: Vec<u8>,
}

impl TableBuilder {
    /// Starts an empty table stamped with `generation`.
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            bloom: BloomFilter::new(),
            keys: Vec::new(),
            ends: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Appends one entry. Keys must arrive strictly ascending.
    pub fn add(&mut self, key: u64, value: &[u8]) -> Result<(), SSTableError> {
        if let Some(&last) = self.keys.last() {
            if key <= last {
                return Err(SSTableError::Internal(format!(
                    "keys out of order: {key} after {last}"
                )));
            }
        }
        self.bloom.insert(key);
        self.keys.push(key);
        self.values.extend_from_slice(value);
        self.ends.push(self.values.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Serialized size the finished table would have.
    pub fn serialized_size(&self) -> usize {
        index_region_size(self.keys.len()) + self.values.len()
    }

    /// Computes the absolute offsets and returns the finished table.
    ///
    /// # Errors
    ///
    /// - [`SSTableError::Internal`] for an empty builder.
    /// - [`SSTableError::Encoding`] if the file would exceed `u32::MAX` bytes.
    pub fn finish(self) -> Result<SSTable, SSTableError> {
        let (Some(&min_key), Some(&max_key)) = (self.keys.first(), self.keys.last()) else {
            return Err(SSTableError::Internal(
                "empty builder cannot produce a table".into(),
            ));
        };

        let base = index_region_size(self.keys.len());
        let mut offsets = Vec::with_capacity(self.keys.len() + 1);
        offsets.push(len_to_u32(base)?);
        for end in &self.ends {
            offsets.push(len_to_u32(base + end)?);
        }

        let header = TableHeader {
            generation: self.generation,
            entry_count: self.keys.len() as u64,
            max_key,
            min_key,
        };
        let index = TableIndex::from_parts(header, self.bloom, self.keys, offsets, 0);
        SSTable::new(index, self.values)
    }
}

// ------------------------------------------------------------------------------------------------
// File writers
// ------------------------------------------------------------------------------------------------

/// Writes `table` to exactly `path` and syncs it.
pub fn write_table_file(path: &Path, table: &SSTable) -> Result<(), SSTableError> {
    let region = table.index().encode_region()?;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(&mut file);
    writer.write_all(&region)?;
    writer.write_all(table.values())?;
    writer.flush()?;
    drop(writer);
    file.sync_all()?;

    trace!(
        path = %path.display(),
        entries = table.len(),
        bytes = region.len() + table.values().len(),
        "table file written"
    );
    Ok(())
}

/// Writes `table` to `path` through a `.tmp` file and an atomic rename.
#[cfg(test)]
pub fn write_table(path: &Path, table: &SSTable) -> Result<(), SSTableError> {
    let tmp_path = path.with_extension("tmp");
    write_table_file(&tmp_path, table)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
