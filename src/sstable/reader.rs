//! Reading tables back from disk.
//!
//! Only the index region is loaded eagerly ([`load_index`]); values are
//! fetched on demand, either one at a time ([`read_value`]) for point
//! lookups or as the whole blob ([`read_value_blob`]) when compaction needs
//! every entry of a table.
//!
//! Every structural property of the index region is validated when it is
//! loaded. A file that fails any check is reported as
//! [`SSTableError::Corrupt`] and never partially trusted.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::bloom::BloomFilter;
use crate::encoding::{self, decode_array};

use super::{
    BLOOM_SIZE, HEADER_SIZE, INDEX_SLOT_SIZE, SSTableError, TableHeader, TableIndex,
    ValueHandle, index_region_size,
};

/// Loads and validates the index region of the table at `path`.
///
/// # Checks
///
/// - the file holds at least a header and a bloom region;
/// - `entry_count ≥ 1` and the index region fits in the file;
/// - bloom slots are all `0x00` / `0x01`;
/// - keys strictly ascend, starting at `min_key` and ending at `max_key`;
/// - offsets start at the index region size, never decrease, and end at
///   the file length.
pub fn load_index(path: &Path, file_id: u64) -> Result<TableIndex, SSTableError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    if file_len < (HEADER_SIZE + BLOOM_SIZE) as u64 {
        return Err(SSTableError::Corrupt(format!(
            "{}: file too small ({file_len} bytes)",
            path.display()
        )));
    }

    let mut head = [0u8; HEADER_SIZE];
    file.read_exact(&mut head)?;
    let (header, _) = encoding::decode_from_slice::<TableHeader>(&head)?;

    let count = usize::try_from(header.entry_count)
        .ok()
        .filter(|&n| n >= 1)
        .ok_or_else(|| {
            SSTableError::Corrupt(format!(
                "{}: invalid entry count {}",
                path.display(),
                header.entry_count
            ))
        })?;

    let region_len = count
        .checked_mul(INDEX_SLOT_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE + BLOOM_SIZE + INDEX_SLOT_SIZE))
        .filter(|&n| n as u64 <= file_len)
        .ok_or_else(|| {
            SSTableError::Corrupt(format!(
                "{}: {count} entries do not fit in {file_len} bytes",
                path.display()
            ))
        })?;

    let mut region = vec![0u8; region_len - HEADER_SIZE];
    file.read_exact(&mut region)?;

    let bloom = BloomFilter::from_bytes(&region[..BLOOM_SIZE]).ok_or_else(|| {
        SSTableError::Corrupt(format!("{}: malformed bloom region", path.display()))
    })?;

    let (mut keys, used) = decode_array::<u64>(&region[BLOOM_SIZE..], count + 1)?;
    let (offsets, _) = decode_array::<u32>(&region[BLOOM_SIZE + used..], count + 1)?;
    keys.truncate(count);

    validate_keys(path, &header, &keys)?;
    validate_offsets(path, count, &offsets, file_len)?;

    Ok(TableIndex::from_parts(header, bloom, keys, offsets, file_id))
}

fn validate_keys(path: &Path, header: &TableHeader, keys: &[u64]) -> Result<(), SSTableError> {
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(SSTableError::Corrupt(format!(
            "{}: keys not strictly ascending",
            path.display()
        )));
    }
    if keys.first() != Some(&header.min_key) || keys.last() != Some(&header.max_key) {
        return Err(SSTableError::Corrupt(format!(
            "{}: key range does not match header [{}, {}]",
            path.display(),
            header.min_key,
            header.max_key
        )));
    }
    Ok(())
}

fn validate_offsets(
    path: &Path,
    count: usize,
    offsets: &[u32],
    file_len: u64,
) -> Result<(), SSTableError> {
    if offsets.first().map(|&o| o as usize) != Some(index_region_size(count)) {
        return Err(SSTableError::Corrupt(format!(
            "{}: first offset does not match index region size {}",
            path.display(),
            index_region_size(count)
        )));
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(SSTableError::Corrupt(format!(
            "{}: offsets decrease",
            path.display()
        )));
    }
    if offsets.last().map(|&o| u64::from(o)) != Some(file_len) {
        return Err(SSTableError::Corrupt(format!(
            "{}: last offset does not match file length {file_len}",
            path.display()
        )));
    }
    Ok(())
}

/// Reads the whole value blob `offset[0] .. offset[entry_count]`.
pub fn read_value_blob(path: &Path, index: &TableIndex) -> Result<Vec<u8>, SSTableError> {
    if index.values_start() as usize != index_region_size(index.len()) {
        return Err(SSTableError::Corrupt(format!(
            "{}: value blob does not start after the index region",
            path.display()
        )));
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(u64::from(index.values_start())))?;
    let mut blob = vec![0u8; index.blob_len()];
    file.read_exact(&mut blob)?;
    Ok(blob)
}

/// Reads one value.
pub fn read_value(path: &Path, handle: ValueHandle) -> Result<Vec<u8>, SSTableError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(u64::from(handle.offset)))?;
    let mut value = vec![0u8; handle.length as usize];
    file.read_exact(&mut value)?;
    Ok(value)
}

/// Loads a complete table (index and blob) into memory.
#[cfg(test)]
pub fn read_table(path: &Path, file_id: u64) -> Result<super::SSTable, SSTableError> {
    let index = load_index(path, file_id)?;
    let blob = read_value_blob(path, &index)?;
    super::SSTable::new(index, blob)
}
