//! Table build / write / load tests.
//!
//! Coverage:
//! - Builder output: header fields, absolute offsets, blob layout
//! - Builder input validation (ordering, empty input)
//! - Exact on-disk byte layout of the index region
//! - Write → load round trip, including the atomic `.tmp` rename

#[cfg(test)]
mod tests {
    use crate::sstable::{
        self, BLOOM_SIZE, HEADER_SIZE, KEY_SENTINEL, SSTable, SSTableError, TableBuilder,
        index_region_size,
    };
    use std::fs;
    use tempfile::TempDir;

    fn build(generation: u64, entries: &[(u64, &[u8])]) -> SSTable {
        let mut b = TableBuilder::new(generation);
        for (k, v) in entries {
            b.add(*k, v).unwrap();
        }
        b.finish().unwrap()
    }

    #[test]
    fn builder_computes_header_and_offsets() {
        let t = build(7, &[(3, b"aa"), (10, b"b"), (42, b"cccc")]);
        let idx = t.index();

        assert_eq!(idx.generation(), 7);
        assert_eq!(idx.header().entry_count, 3);
        assert_eq!(idx.min_key(), 3);
        assert_eq!(idx.max_key(), 42);
        assert_eq!(idx.keys(), &[3, 10, 42]);

        let base = index_region_size(3) as u32;
        assert_eq!(base, 32 + 10240 + 12 * 4);
        assert_eq!(idx.offsets(), &[base, base + 2, base + 3, base + 7]);
        assert_eq!(idx.file_len(), u64::from(base + 7));
        assert_eq!(t.values(), b"aabcccc");
    }

    #[test]
    fn builder_size_matches_finished_table() {
        let mut b = TableBuilder::new(1);
        b.add(1, b"hello").unwrap();
        b.add(2, b"world!").unwrap();
        let projected = b.serialized_size();
        let t = b.finish().unwrap();
        assert_eq!(projected as u64, t.index().file_len());
    }

    #[test]
    fn builder_rejects_unsorted_and_duplicate_keys() {
        let mut b = TableBuilder::new(1);
        b.add(5, b"x").unwrap();
        assert!(matches!(b.add(5, b"y"), Err(SSTableError::Internal(_))));
        assert!(matches!(b.add(4, b"y"), Err(SSTableError::Internal(_))));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn builder_rejects_empty_table() {
        let b = TableBuilder::new(1);
        assert!(b.is_empty());
        assert!(matches!(b.finish(), Err(SSTableError::Internal(_))));
    }

    #[test]
    fn on_disk_layout_is_exact() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.sst");
        let t = build(9, &[(1, b"one"), (2, b"two")]);
        sstable::write_table(&path, &t).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, t.index().file_len());

        let u64_at = |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());

        // generation, entry_count, max_key, min_key
        assert_eq!(u64_at(0), 9);
        assert_eq!(u64_at(8), 2);
        assert_eq!(u64_at(16), 2);
        assert_eq!(u64_at(24), 1);

        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + BLOOM_SIZE], t.index().bloom().as_bytes());

        let keys_at = HEADER_SIZE + BLOOM_SIZE;
        assert_eq!(u64_at(keys_at), 1);
        assert_eq!(u64_at(keys_at + 8), 2);
        assert_eq!(u64_at(keys_at + 16), KEY_SENTINEL);

        let offsets_at = keys_at + 24;
        let base = index_region_size(2);
        assert_eq!(u32_at(offsets_at) as usize, base);
        assert_eq!(u32_at(offsets_at + 4) as usize, base + 3);
        assert_eq!(u32_at(offsets_at + 8) as usize, base + 6);

        assert_eq!(&bytes[base..], b"onetwo");
    }

    #[test]
    fn write_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("3.sst");
        let t = build(4, &[(100, b"a"), (200, b"bb"), (u64::MAX - 1, b"ccc")]);
        sstable::write_table(&path, &t).unwrap();

        assert!(!path.with_extension("tmp").exists());

        let idx = sstable::load_index(&path, 3).unwrap();
        assert_eq!(idx.file_id(), 3);
        assert_eq!(idx.header(), t.index().header());
        assert_eq!(idx.keys(), t.index().keys());
        assert_eq!(idx.offsets(), t.index().offsets());
        assert_eq!(idx.bloom(), t.index().bloom());

        let loaded = sstable::read_table(&path, 0).unwrap();
        assert_eq!(loaded, t);
    }

    #[test]
    fn write_table_file_uses_exact_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("staged-0.tmp");
        let t = build(1, &[(1, b"v")]);
        sstable::write_table_file(&path, &t).unwrap();
        assert!(path.exists());
        assert_eq!(sstable::read_table(&path, 0).unwrap(), t);
    }

    #[test]
    fn single_entry_table() {
        let t = build(1, &[(0, b"z")]);
        assert_eq!(t.index().min_key(), 0);
        assert_eq!(t.index().max_key(), 0);
        assert_eq!(t.get(0), Some(&b"z"[..]));
        assert_eq!(t.get(1), None);
    }
}
