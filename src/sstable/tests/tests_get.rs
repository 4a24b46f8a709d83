//! Point lookup tests against the resident index and the value blob.

#[cfg(test)]
mod tests {
    use crate::sstable::{self, SSTable, TOMBSTONE, TableBuilder, ValueHandle, is_tombstone};
    use tempfile::TempDir;

    fn build(generation: u64, entries: &[(u64, &[u8])]) -> SSTable {
        let mut b = TableBuilder::new(generation);
        for (k, v) in entries {
            b.add(*k, v).unwrap();
        }
        b.finish().unwrap()
    }

    #[test]
    fn locate_finds_every_key() {
        let entries: Vec<(u64, Vec<u8>)> =
            (0..200u64).map(|i| (i * 3, format!("v{i}").into_bytes())).collect();
        let mut b = TableBuilder::new(1);
        for (k, v) in &entries {
            b.add(*k, v).unwrap();
        }
        let t = b.finish().unwrap();

        for (i, (k, v)) in entries.iter().enumerate() {
            let h = t.index().locate(*k).unwrap();
            assert_eq!(h, t.index().handle(i));
            assert_eq!(h.length as usize, v.len());
            assert_eq!(t.value_at(i), &v[..]);
        }
    }

    #[test]
    fn locate_misses_return_none() {
        let t = build(1, &[(10, b"a"), (20, b"b"), (30, b"c")]);
        let idx = t.index();

        // Outside the key range: skipped before the bloom check.
        assert_eq!(idx.locate(0), None);
        assert_eq!(idx.locate(31), None);
        assert_eq!(idx.locate(u64::MAX), None);

        // Inside the range but absent.
        for k in [11, 15, 19, 21, 29] {
            assert_eq!(idx.locate(k), None, "key {k}");
            assert!(!idx.contains(k));
        }
        assert!(idx.contains(20));
    }

    #[test]
    fn first_key_is_found_not_confused_with_missing() {
        let t = build(1, &[(5, b"first"), (6, b"second")]);
        assert_eq!(t.index().find(5), Some(0));
        assert_eq!(t.get(5), Some(&b"first"[..]));
    }

    #[test]
    fn read_value_from_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.sst");
        let t = build(2, &[(1, b"alpha"), (2, b"beta"), (3, b"gamma")]);
        sstable::write_table(&path, &t).unwrap();

        let idx = sstable::load_index(&path, 0).unwrap();
        let h = idx.locate(2).unwrap();
        assert_eq!(sstable::read_value(&path, h).unwrap(), b"beta");

        let blob = sstable::read_value_blob(&path, &idx).unwrap();
        assert_eq!(blob, b"alphabetagamma");
    }

    #[test]
    fn read_value_past_end_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.sst");
        let t = build(2, &[(1, b"x")]);
        sstable::write_table(&path, &t).unwrap();

        let bogus = ValueHandle {
            offset: t.index().values_end(),
            length: 16,
        };
        assert!(sstable::read_value(&path, bogus).is_err());
    }

    #[test]
    fn iter_yields_entries_in_key_order() {
        let t = build(1, &[(1, b"a"), (5, TOMBSTONE), (9, b"c")]);
        let got: Vec<(u64, Vec<u8>)> = t.iter().map(|(k, v)| (k, v.to_vec())).collect();
        assert_eq!(
            got,
            vec![(1, b"a".to_vec()), (5, TOMBSTONE.to_vec()), (9, b"c".to_vec())]
        );
        assert!(is_tombstone(t.get(5).unwrap()));
        assert!(!is_tombstone(t.get(1).unwrap()));
    }

    #[test]
    fn overlaps_uses_inclusive_bounds() {
        let t = build(1, &[(10, b"a"), (20, b"b")]);
        let idx = t.index();
        assert!(idx.overlaps(0, 10));
        assert!(idx.overlaps(20, 30));
        assert!(idx.overlaps(12, 15));
        assert!(idx.overlaps(0, u64::MAX));
        assert!(!idx.overlaps(0, 9));
        assert!(!idx.overlaps(21, 40));
    }
}
