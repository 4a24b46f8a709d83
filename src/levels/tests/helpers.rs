use crate::sstable::{SSTable, TableBuilder};

/// Table stamped `generation` whose value for `k` is `"<generation>:<k>"`.
pub fn table(generation: u64, keys: &[u64]) -> SSTable {
    let mut b = TableBuilder::new(generation);
    for &k in keys {
        b.add(k, format!("{generation}:{k}").as_bytes()).unwrap();
    }
    b.finish().unwrap()
}

pub fn value(generation: u64, key: u64) -> Vec<u8> {
    format!("{generation}:{key}").into_bytes()
}
